//! On-disk artifact logger: every `detection_log_interval` wall-clock
//! seconds, writes the current metadata packet as JSON and, if enabled,
//! a cropped JPEG per detection. Grounded on
//! `original_source/src/outputs/file.py` for the naming scheme and
//! interval-gated write, reusing `image` (already pulled in for the
//! MJPEG sink) for JPEG crop encoding.

use std::path::PathBuf;
use std::time::Instant;

use av_telemetry::EnrichedDetection;
use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tracing::warn;

use crate::frame::Image;

pub struct DiskLogger {
    dir: PathBuf,
    interval_secs: f64,
    save_crops: bool,
    last_write: Option<Instant>,
}

impl DiskLogger {
    pub fn new(dir: &str, interval_secs: f64, save_crops: bool) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: PathBuf::from(dir),
            interval_secs,
            save_crops,
            last_write: None,
        })
    }

    fn due(&self) -> bool {
        match self.last_write {
            None => true,
            Some(t) => t.elapsed().as_secs_f64() >= self.interval_secs,
        }
    }

    /// Writes the packet and crops if the interval has elapsed; no-ops
    /// otherwise. `image` is the full-frame BGR24 buffer the crops are
    /// sliced from.
    pub fn maybe_write(
        &mut self,
        packet: &av_telemetry::MetadataPacket,
        image: &Image,
    ) {
        if !self.due() {
            return;
        }
        self.last_write = Some(Instant::now());

        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let json_path = self.dir.join(format!("detections_{stamp}.json"));
        match serde_json::to_vec_pretty(packet) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&json_path, bytes) {
                    warn!("disk logger: write {json_path:?} failed: {e}");
                }
            }
            Err(e) => warn!("disk logger: serialize packet failed: {e}"),
        }

        if self.save_crops {
            let crops_dir = self.dir.join(format!("crops_{stamp}"));
            if let Err(e) = std::fs::create_dir_all(&crops_dir) {
                warn!("disk logger: create {crops_dir:?} failed: {e}");
                return;
            }
            for (index, det) in packet.detections.iter().enumerate() {
                self.save_crop(&crops_dir, index, det, image);
            }
        }
    }

    fn save_crop(&self, dir: &PathBuf, index: usize, det: &EnrichedDetection, image: &Image) {
        let bbox = det.detection.bbox;
        let x1 = bbox.x1.max(0.0) as u32;
        let y1 = bbox.y1.max(0.0) as u32;
        let x2 = (bbox.x2 as u32).min(image.width);
        let y2 = (bbox.y2 as u32).min(image.height);
        if x2 <= x1 || y2 <= y1 {
            return;
        }
        let crop_w = x2 - x1;
        let crop_h = y2 - y1;

        let mut rgb = Vec::with_capacity((crop_w * crop_h * 3) as usize);
        for y in y1..y2 {
            let row_start = ((y * image.width + x1) * 3) as usize;
            let row_end = row_start + (crop_w * 3) as usize;
            for px in image.data[row_start..row_end].chunks_exact(3) {
                rgb.push(px[2]);
                rgb.push(px[1]);
                rgb.push(px[0]);
            }
        }

        let geo_suffix = det
            .geo_coordinates
            .map(|g| format!("_lat{:.6}_lon{:.6}", g.latitude, g.longitude))
            .unwrap_or_default();
        let filename = format!(
            "{index:03}_{}_{:.2}{geo_suffix}.jpg",
            det.detection.class_name, det.detection.confidence
        );

        let mut jpeg = Vec::new();
        if let Err(e) = JpegEncoder::new_with_quality(&mut jpeg, 85).write_image(
            &rgb,
            crop_w,
            crop_h,
            ExtendedColorType::Rgb8,
        ) {
            warn!("disk logger: crop encode failed: {e}");
            return;
        }
        if let Err(e) = std::fs::write(dir.join(filename), jpeg) {
            warn!("disk logger: crop write failed: {e}");
        }
    }
}
