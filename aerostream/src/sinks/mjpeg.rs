//! MJPEG-over-HTTP: serves `GET /stream.mjpg` as a
//! `multipart/x-mixed-replace` motion-JPEG stream. Grounded on
//! `original_source/src/outputs/mjpeg.py::MJPEGWriter`, using the `image`
//! crate for JPEG encoding (the crate `cosmic-utils-camera` already reaches
//! for in this pack) and `axum` for the HTTP surface (teacher's web
//! framework).

use std::sync::Arc;

use av_telemetry::MetadataPacket;
use axum::body::Body;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::frame::Image;

use super::FrameSink;

const BOUNDARY: &str = "aerostreamframe";

pub struct MjpegSink {
    frame_tx: watch::Sender<Arc<Vec<u8>>>,
}

impl MjpegSink {
    pub fn new(port: u16) -> Result<Self, PipelineError> {
        let (frame_tx, frame_rx) = watch::channel(Arc::new(Vec::new()));

        let app = Router::new().route(
            "/stream.mjpg",
            get(move || stream_handler(frame_rx.clone())),
        );
        let addr = format!("0.0.0.0:{port}");
        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => {
                    info!("mjpeg sink: listening on {addr}");
                    if let Err(e) = axum::serve(listener, app).await {
                        warn!("mjpeg sink: server exited: {e}");
                    }
                }
                Err(e) => warn!("mjpeg sink: bind {addr} failed: {e}"),
            }
        });

        Ok(Self { frame_tx })
    }
}

async fn stream_handler(mut frame_rx: watch::Receiver<Arc<Vec<u8>>>) -> impl IntoResponse {
    let stream = async_stream::stream! {
        loop {
            if frame_rx.changed().await.is_err() {
                break;
            }
            let jpeg = frame_rx.borrow_and_update().clone();
            if jpeg.is_empty() {
                continue;
            }
            let mut chunk = format!(
                "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                jpeg.len()
            )
            .into_bytes();
            chunk.extend_from_slice(&jpeg);
            chunk.extend_from_slice(b"\r\n");
            yield Ok::<_, std::io::Error>(chunk);
        }
    };

    let body = Body::from_stream(stream);
    ([(
        axum::http::header::CONTENT_TYPE,
        format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
    )], body)
}

impl FrameSink for MjpegSink {
    fn write_frame(&mut self, image: &Image) -> Result<(), PipelineError> {
        let mut rgb = vec![0u8; image.data.len()];
        for px in image.data.chunks_exact(3).zip(rgb.chunks_exact_mut(3)) {
            let (src, dst) = px;
            dst[0] = src[2];
            dst[1] = src[1];
            dst[2] = src[0];
        }

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 80)
            .write_image(&rgb, image.width, image.height, ExtendedColorType::Rgb8)
            .map_err(|e| PipelineError::Fatal(format!("mjpeg encode: {e}")))?;

        let _ = self.frame_tx.send(Arc::new(jpeg));
        Ok(())
    }

    fn inject_metadata(&mut self, _packet: &MetadataPacket) -> Result<(), PipelineError> {
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), PipelineError> {
        Ok(())
    }
}
