//! Best-effort UDP metadata push: one compact JSON datagram per frame.
//! Grounded on `packages/uwb-simulator/src/udp_tx.rs` (fire-and-forget
//! `UdpSocket::send_to`, errors logged at `trace!` and otherwise
//! swallowed — never propagated to the output stage, per SPEC_FULL §7).

use std::net::UdpSocket;

use av_telemetry::MetadataPacket;
use tracing::trace;

pub struct UdpMetadataSink {
    socket: UdpSocket,
    target: String,
}

impl UdpMetadataSink {
    pub fn new(host: &str, port: u16) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            target: format!("{host}:{port}"),
        })
    }

    pub fn send(&self, packet: &MetadataPacket) {
        match serde_json::to_vec(packet) {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, &self.target) {
                    trace!("udp metadata sink: send to {} failed: {e}", self.target);
                }
            }
            Err(e) => trace!("udp metadata sink: encode failed: {e}"),
        }
    }
}
