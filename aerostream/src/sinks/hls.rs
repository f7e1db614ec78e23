//! HLS segmenting: pipes raw BGR24 frames to an `ffmpeg` process writing
//! rolling `.ts` segments and a playlist into a directory. Grounded on
//! `original_source/src/outputs/hls.py::HLSWriter`.

use std::process::{Child, Command, Stdio};

use av_telemetry::MetadataPacket;

use crate::error::PipelineError;
use crate::frame::Image;

use super::pipe_writer::PipeWriter;
use super::FrameSink;

pub struct HlsSink {
    child: Child,
    writer: Option<PipeWriter>,
}

impl HlsSink {
    pub fn new(out_dir: &str, width: u32, height: u32, fps: u32) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(out_dir)
            .map_err(|e| PipelineError::EncoderStartup(format!("create {out_dir}: {e}")))?;
        let playlist = format!("{out_dir}/stream.m3u8");
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
                "-pix_fmt",
                "yuv420p",
                "-f",
                "hls",
                "-hls_time",
                "2",
                "-hls_list_size",
                "6",
                "-hls_flags",
                "delete_segments",
                &playlist,
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
        Ok(Self { child, writer: Some(PipeWriter::new(stdin, "hls sink")) })
    }
}

impl FrameSink for HlsSink {
    fn write_frame(&mut self, image: &Image) -> Result<(), PipelineError> {
        if let Some(w) = &self.writer {
            w.push(image.data.clone());
        }
        Ok(())
    }

    fn inject_metadata(&mut self, _packet: &MetadataPacket) -> Result<(), PipelineError> {
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
