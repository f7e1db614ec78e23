//! CLI surface, mirroring the `--input-srt`/`--output-*`/`--tak-*` flags in
//! SPEC_FULL §6/§10, plus an optional TOML overlay (`--config PATH`) for the
//! tunable constants the spec calls out as "default N" (reconnect backoff,
//! batch window, rate-limit interval, queue capacities) — the same
//! CLI-plus-TOML-overlay shape as `uwb-simulator`'s `Args`/`config.toml`.

use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug, Clone)]
#[command(name = "aerostream", about = "SRT → detector → RTSP/HLS/SSE/TAK pipeline")]
pub struct Args {
    /// Input SRT URL (e.g. srt://host:port), or a plain file path for batch mode.
    #[arg(long)]
    pub input_srt: String,

    /// Output RTSP URL.
    #[arg(long, default_value = "rtsp://localhost:8554/detected_stream")]
    pub output_rtsp: String,
    #[arg(long, value_enum, default_value = "rtsp")]
    pub output_format: OutputFormat,
    #[arg(long)]
    pub output_webrtc: Option<u16>,
    #[arg(long)]
    pub output_mjpeg: Option<u16>,
    #[arg(long)]
    pub batch_output: Option<String>,

    #[arg(long, default_value = "models/yolov8n.pt")]
    pub model: String,
    #[arg(long, default_value_t = 0.25)]
    pub conf: f64,
    #[arg(long, value_delimiter = ',')]
    pub classes: Option<Vec<i64>>,
    #[arg(long)]
    pub no_overlay: bool,
    #[arg(long)]
    pub metadata_file: Option<String>,
    #[arg(long, default_value_t = 0)]
    pub skip_frames: u32,
    #[arg(long, default_value_t = 1500)]
    pub srt_latency: u32,
    #[arg(long)]
    pub metadata_host: Option<String>,
    #[arg(long, default_value_t = 5555)]
    pub metadata_port: u16,
    #[arg(long)]
    pub sse_port: Option<u16>,
    #[arg(long, default_value_t = 30)]
    pub id3_interval: u32,
    #[arg(long)]
    pub detections_dir: Option<String>,
    #[arg(long, default_value_t = 5.0)]
    pub detection_log_interval: f64,
    #[arg(long)]
    pub save_detection_images: bool,

    #[arg(long)]
    pub tak_enable: bool,
    #[arg(long, default_value = "localhost")]
    pub tak_host: String,
    #[arg(long, default_value_t = 8089)]
    pub tak_port: u16,
    #[arg(long, default_value = "certs/user1.pem")]
    pub tak_cert: String,
    #[arg(long, default_value = "certs/user1.key")]
    pub tak_key: String,
    #[arg(long, default_value_t = 600)]
    pub tak_stale: u32,

    #[arg(long)]
    pub config: Option<String>,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Rtsp,
    Hls,
}

/// Tunable constants overridable via `--config PATH` TOML; defaults mirror
/// the values named throughout SPEC_FULL (§4.4, §4.6, §5).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Tunables {
    pub inference_queue_capacity: usize,
    pub output_queue_capacity: usize,
    pub reconnect_base_delay_secs: f64,
    pub reconnect_max_retries: u32,
    pub consecutive_error_threshold: u32,
    pub tak_update_interval_secs: f64,
    pub tak_batch_window_secs: f64,
    pub tak_max_per_batch: usize,
    pub tak_max_pending: usize,
    pub tak_send_queue_capacity: usize,
    pub sse_subscriber_capacity: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            inference_queue_capacity: 2,
            output_queue_capacity: 2,
            reconnect_base_delay_secs: 3.0,
            reconnect_max_retries: 5,
            consecutive_error_threshold: 5,
            tak_update_interval_secs: 3.0,
            tak_batch_window_secs: 5.0,
            tak_max_per_batch: 5,
            tak_max_pending: 20,
            tak_send_queue_capacity: 1000,
            sse_subscriber_capacity: 1000,
        }
    }
}

impl Tunables {
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                Ok(toml::from_str(&text)?)
            }
        }
    }
}
