use std::time::Instant;

use av_telemetry::{Detection, Telemetry};

/// Raw decoded image, BGR24, row-major, no padding — the pixel format every
/// sink in this crate agrees on.
#[derive(Clone)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Image {
    pub fn resize_nearest(&self, width: u32, height: u32) -> Image {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut out = vec![0u8; (width * height * 3) as usize];
        for y in 0..height {
            let sy = (y as u64 * self.height as u64 / height as u64) as u32;
            for x in 0..width {
                let sx = (x as u64 * self.width as u64 / width as u64) as u32;
                let src = ((sy * self.width + sx) * 3) as usize;
                let dst = ((y * width + x) * 3) as usize;
                out[dst..dst + 3].copy_from_slice(&self.data[src..src + 3]);
            }
        }
        Image {
            width,
            height,
            data: out,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Timings {
    pub inference_ms: Option<f64>,
    pub drawing_ms: Option<f64>,
    pub write_ms: Option<f64>,
    pub total_ms: Option<f64>,
}

/// The unit of work flowing through Capture → Inference → Output. Created
/// by the Stream Source once a video frame is fully decoded; mutated
/// exclusively by each stage in sequence; dropped after Output or when
/// displaced from a bounded queue by a newer frame.
pub struct FrameData {
    pub image: Image,
    pub capture_instant: Instant,
    pub telemetry: Telemetry,
    pub frame_count: u64,
    pub detections: Vec<Detection>,
    pub annotated_image: Option<Image>,
    pub timings: Timings,
}

impl FrameData {
    pub fn new(image: Image, telemetry: Telemetry, frame_count: u64) -> Self {
        Self {
            image,
            capture_instant: Instant::now(),
            telemetry,
            frame_count,
            detections: Vec::new(),
            annotated_image: None,
            timings: Timings::default(),
        }
    }
}
