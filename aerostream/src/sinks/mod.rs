//! Sink Fan-out (C5): the single configured encoder sink plus the
//! always-on UDP metadata and disk-logger side channels. SSE and the
//! Tactical Dispatcher live in their own top-level modules since they are
//! shared services rather than per-run encoder variants.

use av_telemetry::MetadataPacket;

use crate::error::PipelineError;
use crate::frame::Image;

pub mod batch;
pub mod disk;
pub mod hls;
pub mod mjpeg;
pub(crate) mod pipe_writer;
pub mod rtsp;
pub mod udp;
pub mod webrtc;

/// Shared contract for every encoder sink variant (SPEC_FULL §9, "writer
/// polymorphism"). Grounded on `original_source/src/outputs/*.py`'s
/// `BasicRTSPWriter`/`HLSWriter`/`MJPEGWriter`/`WebRTCWriter`/`BatchVideoWriter`
/// family, which all expose exactly these three operations and own their
/// background I/O.
pub trait FrameSink: Send {
    fn write_frame(&mut self, image: &Image) -> Result<(), PipelineError>;
    fn inject_metadata(&mut self, packet: &MetadataPacket) -> Result<(), PipelineError>;
    fn close(self: Box<Self>) -> Result<(), PipelineError>;
}
