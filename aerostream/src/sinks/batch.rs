//! Batch (file) output: pipes raw BGR24 frames to an external `ffmpeg`
//! process that muxes them into an MP4, and writes every metadata packet
//! as a JSON sidecar on close. Grounded on
//! `original_source/src/outputs/batch.py::BatchVideoWriter`.

use std::fs::File;
use std::io::Write;
use std::process::{Child, Command, Stdio};

use av_telemetry::MetadataPacket;

use crate::error::PipelineError;
use crate::frame::Image;

use super::pipe_writer::PipeWriter;
use super::FrameSink;

pub struct BatchSink {
    child: Child,
    writer: Option<PipeWriter>,
    out_dir: String,
    packets: Vec<MetadataPacket>,
}

impl BatchSink {
    pub fn new(out_dir: &str, width: u32, height: u32, fps: u32) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(out_dir)
            .map_err(|e| PipelineError::EncoderStartup(format!("create {out_dir}: {e}")))?;
        let video_path = format!("{out_dir}/output.mp4");
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
                "-pix_fmt",
                "yuv420p",
                &video_path,
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
        Ok(Self {
            child,
            writer: Some(PipeWriter::new(stdin, "batch sink")),
            out_dir: out_dir.to_string(),
            packets: Vec::new(),
        })
    }
}

impl FrameSink for BatchSink {
    fn write_frame(&mut self, image: &Image) -> Result<(), PipelineError> {
        if let Some(w) = &self.writer {
            w.push(image.data.clone());
        }
        Ok(())
    }

    fn inject_metadata(&mut self, packet: &MetadataPacket) -> Result<(), PipelineError> {
        self.packets.push(packet.clone());
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<(), PipelineError> {
        if let Some(w) = self.writer.take() {
            w.close();
        }
        let _ = self.child.wait();

        let json = serde_json::to_vec_pretty(&self.packets)
            .map_err(|e| PipelineError::Fatal(format!("serialize sidecar: {e}")))?;
        let mut f = File::create(format!("{}/metadata.json", self.out_dir))
            .map_err(|e| PipelineError::Fatal(format!("create sidecar: {e}")))?;
        f.write_all(&json)
            .map_err(|e| PipelineError::Fatal(format!("write sidecar: {e}")))
    }
}
