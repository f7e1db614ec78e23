//! RTSP republish: pipes raw BGR24 frames to an `ffmpeg` process pushing
//! H.264 over RTSP. Grounded on
//! `original_source/src/outputs/rtsp.py::BasicRTSPWriter`.

use std::process::{Child, Command, Stdio};

use av_telemetry::MetadataPacket;

use crate::error::PipelineError;
use crate::frame::Image;

use super::pipe_writer::PipeWriter;
use super::FrameSink;

pub struct RtspSink {
    child: Child,
    writer: Option<PipeWriter>,
}

impl RtspSink {
    pub fn new(url: &str, width: u32, height: u32, fps: u32) -> Result<Self, PipelineError> {
        let mut child = Command::new("ffmpeg")
            .args([
                "-y",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "bgr24",
                "-s",
                &format!("{width}x{height}"),
                "-r",
                &fps.to_string(),
                "-i",
                "-",
                "-c:v",
                "libx264",
                "-preset",
                "ultrafast",
                "-tune",
                "zerolatency",
                "-pix_fmt",
                "yuv420p",
                "-f",
                "rtsp",
                "-rtsp_transport",
                "tcp",
                url,
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PipelineError::EncoderStartup(format!("spawn ffmpeg: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::EncoderStartup("ffmpeg stdin not piped".into()))?;
        Ok(Self { child, writer: Some(PipeWriter::new(stdin, "rtsp sink")) })
    }
}

impl FrameSink for RtspSink {
    fn write_frame(&mut self, image: &Image) -> Result<(), PipelineError> {
        if let Some(w) = &self.writer {
            w.push(image.data.clone());
        }
        Ok(())
    }

    fn inject_metadata(&mut self, _packet: &MetadataPacket) -> Result<(), PipelineError> {
        // RTSP has no side channel for structured metadata; UDP/SSE carry it.
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<(), PipelineError> {
        if let Some(w) = self.writer.take() {
            w.close();
        }
        let _ = self.child.wait();
        Ok(())
    }
}
