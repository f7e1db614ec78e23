mod config;
mod detector;
mod error;
mod frame;
mod pipeline;
mod queue;
mod sinks;
mod source;
mod sse;
mod stats;
mod tactical;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{watch, RwLock};
use tracing::{error, info};

use config::{Args, OutputFormat, Tunables};
use detector::NullDetector;
use error::PipelineError;
use pipeline::OutputContext;
use sinks::batch::BatchSink;
use sinks::disk::DiskLogger;
use sinks::hls::HlsSink;
use sinks::mjpeg::MjpegSink;
use sinks::rtsp::RtspSink;
use sinks::udp::UdpMetadataSink;
use sinks::webrtc::WebRtcSink;
use sinks::FrameSink;
use source::{run_capture, StreamInfo, StreamSourceConfig};
use sse::Broadcaster;
use stats::PipelineStats;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aerostream=info".into()),
        )
        .init();

    let args = Args::parse();
    let tunables = Tunables::load(args.config.as_deref())?;
    info!("aerostream v{} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args, tunables).await {
        error!("fatal: {e}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: Args, tunables: Tunables) -> Result<(), PipelineError> {
    let batch_mode = args.batch_output.is_some();
    let stop = Arc::new(AtomicBool::new(false));
    let stats = PipelineStats::new();
    let latest_telemetry: source::LatestTelemetry = Arc::new(RwLock::new(None));

    let (inference_queue, output_queue) = pipeline::stage_queues(&tunables);

    let capture_cfg = StreamSourceConfig {
        input_url: args.input_srt.clone(),
        batch_mode,
        srt_latency_ms: args.srt_latency,
        skip_frames: args.skip_frames,
    };

    // The encoder sinks and the georeferencer both need the transport's
    // real width/height/fps, which is only known once `run_capture` opens
    // and probes the stream. Spawn capture first and block here until it
    // publishes that probe.
    let (probe_tx, mut probe_rx) = watch::channel::<Option<StreamInfo>>(None);
    let probe_tx = Arc::new(probe_tx);

    let capture_task = tokio::spawn(run_capture(
        capture_cfg,
        tunables.clone(),
        latest_telemetry,
        inference_queue.clone(),
        stats.clone(),
        stop.clone(),
        probe_tx,
    ));

    probe_rx
        .changed()
        .await
        .map_err(|_| PipelineError::Fatal("stream source closed before probing dimensions".into()))?;
    let StreamInfo { width, height, fps } = probe_rx
        .borrow()
        .clone()
        .ok_or_else(|| PipelineError::Fatal("stream source probe produced no data".into()))?;

    let sink: Box<dyn FrameSink> = match (
        args.output_format,
        args.output_webrtc,
        args.output_mjpeg,
        &args.batch_output,
    ) {
        (_, _, _, Some(dir)) => Box::new(BatchSink::new(dir, width, height, fps)?),
        (_, Some(port), _, None) => Box::new(WebRtcSink::new(port)?),
        (_, None, Some(port), None) => Box::new(MjpegSink::new(port)?),
        (OutputFormat::Hls, None, None, None) => {
            Box::new(HlsSink::new("hls_output", width, height, fps)?)
        }
        (OutputFormat::Rtsp, None, None, None) => {
            Box::new(RtspSink::new(&args.output_rtsp, width, height, fps)?)
        }
    };

    let udp = args
        .metadata_host
        .as_deref()
        .map(|host| UdpMetadataSink::new(host, args.metadata_port))
        .transpose()
        .map_err(|e| PipelineError::Fatal(format!("udp sink bind failed: {e}")))?;

    let sse = args.sse_port.map(|_| Broadcaster::new(tunables.sse_subscriber_capacity));
    if let (Some(port), Some(broadcaster)) = (args.sse_port, sse.clone()) {
        let router = broadcaster.router();
        tokio::spawn(async move {
            let addr = format!("0.0.0.0:{port}");
            match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => {
                    info!("sse broadcaster: listening on {addr}");
                    let _ = axum::serve(listener, router).await;
                }
                Err(e) => error!("sse broadcaster: bind {addr} failed: {e}"),
            }
        });
    }

    let disk = args
        .detections_dir
        .as_deref()
        .map(|dir| DiskLogger::new(dir, args.detection_log_interval, args.save_detection_images))
        .transpose()
        .map_err(|e| PipelineError::Fatal(format!("disk logger init failed: {e}")))?;

    let tactical_handle = if args.tak_enable {
        Some(tactical::spawn(
            tactical::TacticalConfig {
                host: args.tak_host.clone(),
                port: args.tak_port,
                cert_path: args.tak_cert.clone(),
                key_path: args.tak_key.clone(),
                stale_secs: args.tak_stale,
            },
            tunables.clone(),
            stats.clone(),
        ))
    } else {
        None
    };

    let detector: Box<dyn detector::Detector> = Box::new(NullDetector);
    let inference_task = tokio::spawn(pipeline::run_inference_stage(
        inference_queue,
        output_queue.clone(),
        detector,
        args.conf,
        batch_mode,
        stats.clone(),
        stop.clone(),
    ));

    let output_ctx = OutputContext {
        sink,
        udp,
        sse,
        disk,
        tactical: tactical_handle,
        frame_width: width,
        frame_height: height,
        stats: stats.clone(),
    };
    let output_task = tokio::spawn(pipeline::run_output_stage(
        output_queue,
        output_ctx,
        stop.clone(),
    ));

    if batch_mode {
        capture_task
            .await
            .map_err(|e| PipelineError::Fatal(format!("capture task panicked: {e}")))??;
        stop.store(true, Ordering::Relaxed);
    } else {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| PipelineError::Fatal(format!("signal handler failed: {e}")))?;
        info!("shutdown requested");
        stop.store(true, Ordering::Relaxed);
    }

    let _ = inference_task.await;
    output_task
        .await
        .map_err(|e| PipelineError::Fatal(format!("output task panicked: {e}")))??;

    let snapshot = stats.snapshot();
    info!(
        "shutdown complete: {} frames, {} processed, {} klv packets, {} detections, {:.1} avg fps, {} tak sent, {} tak dropped",
        snapshot.total_frames,
        snapshot.processed_frames,
        snapshot.klv_packets,
        snapshot.detections,
        snapshot.average_fps,
        snapshot.tak_sent,
        snapshot.tak_dropped,
    );

    Ok(())
}
