//! The neural detector/tracker is out of scope (SPEC_FULL §1): consumed as
//! a black box `Detect(frame, conf_threshold) -> detections[]` that
//! preserves track identifiers across frames. This trait is the seam;
//! production wiring wraps whatever model runtime is configured via
//! `--model`, `--device`, `--classes`.

use av_telemetry::Detection;

use crate::frame::Image;

pub trait Detector: Send + Sync {
    fn detect(&mut self, image: &Image, conf_threshold: f64) -> Vec<Detection>;
}

/// Detector that finds nothing. Used when no model is wired up (e.g. unit
/// tests exercising the pipeline plumbing without GPU/model dependencies).
pub struct NullDetector;

impl Detector for NullDetector {
    fn detect(&mut self, _image: &Image, _conf_threshold: f64) -> Vec<Detection> {
        Vec::new()
    }
}
