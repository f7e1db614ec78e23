//! WebRTC encoder sink: the actual media encode/publish path is the
//! opaque "media encoder/muxer" contract (out of scope, per spec's
//! Non-goals — "does not define ... WebRTC protocol beyond what the
//! public writer contract requires"). What this sink owns is the
//! data-channel metadata side, which SPEC_FULL calls out explicitly:
//! an HTTP signaling endpoint plus a reliable data channel carrying each
//! frame's metadata packet as JSON, grounded on the `webrtc` crate usage
//! in `other_examples/manifests/angkira-rpi-webrtc-streamer`.

use std::sync::Arc;

use av_telemetry::MetadataPacket;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tokio::sync::Mutex;
use tracing::{info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::error::PipelineError;
use crate::frame::Image;

use super::FrameSink;

struct SignalingState {
    config: RTCConfiguration,
    channels: Mutex<Vec<Arc<RTCDataChannel>>>,
}

pub struct WebRtcSink {
    state: Arc<SignalingState>,
}

impl WebRtcSink {
    pub fn new(port: u16) -> Result<Self, PipelineError> {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let state = Arc::new(SignalingState {
            config,
            channels: Mutex::new(Vec::new()),
        });

        let app_state = state.clone();
        let app = Router::new()
            .route("/offer", post(handle_offer))
            .with_state(app_state);
        let addr = format!("0.0.0.0:{port}");
        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => {
                    info!("webrtc sink: signaling listening on {addr}");
                    if let Err(e) = axum::serve(listener, app).await {
                        warn!("webrtc sink: signaling server exited: {e}");
                    }
                }
                Err(e) => warn!("webrtc sink: bind {addr} failed: {e}"),
            }
        });

        Ok(Self { state })
    }
}

/// A malformed or rejected offer from a client returns 400 rather than
/// panicking the handler task.
struct SignalingError(String);

impl IntoResponse for SignalingError {
    fn into_response(self) -> Response {
        warn!("webrtc sink: signaling offer rejected: {}", self.0);
        (StatusCode::BAD_REQUEST, self.0).into_response()
    }
}

fn signaling_err(e: impl std::fmt::Display) -> SignalingError {
    SignalingError(e.to_string())
}

async fn handle_offer(
    State(state): State<Arc<SignalingState>>,
    Json(offer): Json<RTCSessionDescription>,
) -> Result<Json<RTCSessionDescription>, SignalingError> {
    let mut media_engine = MediaEngine::default();
    let _ = media_engine.register_default_codecs();
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine).unwrap_or_default();
    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = api
        .new_peer_connection(state.config.clone())
        .await
        .map_err(signaling_err)?;
    let data_channel = pc
        .create_data_channel("metadata", None)
        .await
        .map_err(signaling_err)?;
    state.channels.lock().await.push(data_channel);

    pc.set_remote_description(offer).await.map_err(signaling_err)?;
    let answer = pc.create_answer(None).await.map_err(signaling_err)?;
    pc.set_local_description(answer.clone())
        .await
        .map_err(signaling_err)?;

    Ok(Json(answer))
}

impl FrameSink for WebRtcSink {
    fn write_frame(&mut self, _image: &Image) -> Result<(), PipelineError> {
        // Video publishing goes through the opaque encoder/muxer contract;
        // this sink's in-scope responsibility is the metadata data channel.
        Ok(())
    }

    fn inject_metadata(&mut self, packet: &MetadataPacket) -> Result<(), PipelineError> {
        let json = serde_json::to_string(packet)
            .map_err(|e| PipelineError::Fatal(format!("webrtc metadata encode: {e}")))?;
        let channels = self.state.clone();
        tokio::spawn(async move {
            let channels = channels.channels.lock().await;
            for ch in channels.iter() {
                let _ = ch.send_text(json.clone()).await;
            }
        });
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), PipelineError> {
        Ok(())
    }
}
