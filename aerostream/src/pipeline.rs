//! Pipeline Orchestrator (C4): three concurrent stages connected by
//! bounded queues — Capture (Stream Source) → Inference (external
//! detector) → Output (georeference, draw, sink fan-out). Grounded on
//! `original_source/src/core/pipeline.py::ThreadedPipeline` for stage
//! responsibilities and the `backend-rust/src/main.rs` `tokio::spawn`
//! task-per-stage pattern.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use av_telemetry::{georeference, EnrichedDetection, MetadataPacket};
use chrono::Utc;
use tracing::{info, warn};

use crate::config::Tunables;
use crate::detector::Detector;
use crate::error::PipelineError;
use crate::frame::FrameData;
use crate::queue::BoundedQueue;
use crate::sinks::disk::DiskLogger;
use crate::sinks::udp::UdpMetadataSink;
use crate::sinks::FrameSink;
use crate::sse::Broadcaster;
use crate::stats::PipelineStats;
use crate::tactical;

/// Everything Stage C needs besides the frame itself. Owns the single
/// configured encoder sink plus the always-on side channels.
pub struct OutputContext {
    pub sink: Box<dyn FrameSink>,
    pub udp: Option<UdpMetadataSink>,
    pub sse: Option<Broadcaster>,
    pub disk: Option<DiskLogger>,
    pub tactical: Option<tactical::Handle>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub stats: PipelineStats,
}

/// Stage B: pops from the inference queue, runs the external detector,
/// pushes onto the output queue (drop-oldest in live mode, blocking in
/// batch mode per SPEC_FULL §4.4).
pub async fn run_inference_stage(
    inference_queue: BoundedQueue<FrameData>,
    output_queue: BoundedQueue<FrameData>,
    mut detector: Box<dyn Detector>,
    conf_threshold: f64,
    batch_mode: bool,
    stats: PipelineStats,
    stop: Arc<AtomicBool>,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let mut frame = inference_queue.recv().await;

        let t0 = Instant::now();
        frame.detections = detector.detect(&frame.image, conf_threshold);
        frame.timings.inference_ms = Some(t0.elapsed().as_secs_f64() * 1000.0);
        stats.add_detections(frame.detections.len() as u64);

        if batch_mode {
            output_queue.send_blocking(frame).await;
        } else {
            output_queue.send_displacing(frame).await;
        }
    }
}

/// Stage C: georeferences each detection, builds the metadata packet,
/// hands the frame to the encoder sink, and fans metadata out to UDP,
/// SSE, disk, and the Tactical Dispatcher.
pub async fn run_output_stage(
    output_queue: BoundedQueue<FrameData>,
    mut ctx: OutputContext,
    stop: Arc<AtomicBool>,
) -> Result<(), PipelineError> {
    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let mut frame = output_queue.recv().await;
        let t0 = Instant::now();

        let enriched: Vec<EnrichedDetection> = frame
            .detections
            .iter()
            .map(|det| {
                let geo = georeference(
                    &det.bbox,
                    &frame.telemetry,
                    ctx.frame_width as f64,
                    ctx.frame_height as f64,
                );
                EnrichedDetection {
                    detection: det.clone(),
                    geo_coordinates: geo,
                }
            })
            .collect();

        if let Some(tac) = &ctx.tactical {
            for det in enriched.iter().filter(|d| d.geo_coordinates.is_some()) {
                tac.submit(det.clone(), frame.frame_count);
            }
        }

        let packet = MetadataPacket {
            frame: frame.frame_count,
            timestamp: Utc::now().to_rfc3339(),
            telemetry: frame.telemetry.clone(),
            detection_count: enriched.len(),
            detections: enriched,
        };

        // Overlay drawing is an external collaborator (out of scope); the
        // decoded frame is handed to the sink as-is.
        if let Err(e) = ctx.sink.write_frame(&frame.image) {
            warn!("output stage: encoder sink write failed: {e}");
        }
        if let Err(e) = ctx.sink.inject_metadata(&packet) {
            warn!("output stage: encoder sink metadata failed: {e}");
        }

        if let Some(udp) = &ctx.udp {
            udp.send(&packet);
        }
        if let Some(sse) = &ctx.sse {
            if let Ok(json) = serde_json::to_string(&packet) {
                sse.publish(json).await;
            }
        }
        if let Some(disk) = &mut ctx.disk {
            disk.maybe_write(&packet, &frame.image);
        }

        ctx.stats.incr_processed_frames();
        frame
            .timings
            .total_ms
            .replace(t0.elapsed().as_secs_f64() * 1000.0);
    }

    if let Some(tac) = ctx.tactical.take() {
        tac.stop().await;
    }
    ctx.sink.close()?;
    info!("output stage: stopped");
    Ok(())
}

/// Optional per-capture-interval skip: keep only every `(skip_frames+1)`th
/// frame. Already applied inside `source::run_capture`; kept here as the
/// single source of truth for the Tunables the orchestrator threads
/// through both stages.
pub fn stage_queues(tunables: &Tunables) -> (BoundedQueue<FrameData>, BoundedQueue<FrameData>) {
    (
        BoundedQueue::new(tunables.inference_queue_capacity),
        BoundedQueue::new(tunables.output_queue_capacity),
    )
}
