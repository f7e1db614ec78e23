//! Run-wide counters, logged on shutdown (SPEC_FULL §7: "Metrics visible on
//! shutdown"). Mirrors the teacher's `STARTUP_MS: AtomicU64` pattern in
//! `main.rs` — plain atomics behind `Arc`, no lock needed since every field
//! is independently incremented.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Default)]
struct Counters {
    total_frames: AtomicU64,
    processed_frames: AtomicU64,
    klv_packets: AtomicU64,
    detections: AtomicU64,
    tak_sent: AtomicU64,
    tak_dropped: AtomicU64,
}

#[derive(Clone)]
pub struct PipelineStats {
    counters: Arc<Counters>,
    started_at: Instant,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            started_at: Instant::now(),
        }
    }

    pub fn incr_total_frames(&self) {
        self.counters.total_frames.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_processed_frames(&self) {
        self.counters
            .processed_frames
            .fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_klv_packets(&self) {
        self.counters.klv_packets.fetch_add(1, Ordering::Relaxed);
    }
    pub fn add_detections(&self, n: u64) {
        self.counters.detections.fetch_add(n, Ordering::Relaxed);
    }
    pub fn incr_tak_sent(&self) {
        self.counters.tak_sent.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_tak_dropped(&self) {
        self.counters.tak_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let processed = self.counters.processed_frames.load(Ordering::Relaxed);
        StatsSnapshot {
            total_frames: self.counters.total_frames.load(Ordering::Relaxed),
            processed_frames: processed,
            klv_packets: self.counters.klv_packets.load(Ordering::Relaxed),
            detections: self.counters.detections.load(Ordering::Relaxed),
            tak_sent: self.counters.tak_sent.load(Ordering::Relaxed),
            tak_dropped: self.counters.tak_dropped.load(Ordering::Relaxed),
            elapsed_secs: elapsed,
            average_fps: if elapsed > 0.0 {
                processed as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsSnapshot {
    pub total_frames: u64,
    pub processed_frames: u64,
    pub klv_packets: u64,
    pub detections: u64,
    pub tak_sent: u64,
    pub tak_dropped: u64,
    pub elapsed_secs: f64,
    pub average_fps: f64,
}
