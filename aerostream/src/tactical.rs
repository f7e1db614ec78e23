//! Tactical Dispatcher (C6): batches, rate-limits, and transmits
//! Cursor-on-Target messages over a client-certificate TLS socket.
//!
//! Re-architected per SPEC_FULL §9 from the original's two background
//! threads guarded by three separate mutexes
//! (`original_source/src/modules/tak.py::TAKCoTSender`) into a single
//! actor task owning all state privately and driven by three message
//! kinds (`Submit`/`Tick`/`Stop`) over one channel — no locks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use av_telemetry::EnrichedDetection;
use chrono::{Duration as ChronoDuration, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{info, trace, warn};
use uuid::Uuid;

use crate::config::Tunables;
use crate::error::TacticalError;
use crate::stats::PipelineStats;

#[derive(Debug)]
pub enum Message {
    Submit(Box<EnrichedDetection>, u64),
    Tick,
    Stop,
}

#[derive(Clone)]
pub struct Handle {
    tx: mpsc::Sender<Message>,
}

impl Handle {
    pub fn submit(&self, detection: EnrichedDetection, frame_num: u64) {
        let _ = self.tx.try_send(Message::Submit(Box::new(detection), frame_num));
    }

    pub async fn stop(&self) {
        let _ = self.tx.send(Message::Stop).await;
    }
}

pub struct TacticalConfig {
    pub host: String,
    pub port: u16,
    pub cert_path: String,
    pub key_path: String,
    pub stale_secs: u32,
}

pub fn spawn(cfg: TacticalConfig, tunables: Tunables, stats: PipelineStats) -> Handle {
    let (tx, rx) = mpsc::channel(256);

    tokio::spawn(actor_loop(cfg, tunables.clone(), rx, stats));

    let tick_tx = tx.clone();
    let window = Duration::from_secs_f64(tunables.tak_batch_window_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(window);
        loop {
            interval.tick().await;
            if tick_tx.send(Message::Tick).await.is_err() {
                break;
            }
        }
    });

    Handle { tx }
}

struct PendingItem {
    detection: EnrichedDetection,
    frame_num: u64,
}

async fn actor_loop(
    cfg: TacticalConfig,
    tunables: Tunables,
    mut rx: mpsc::Receiver<Message>,
    stats: PipelineStats,
) {
    let mut pending: VecDeque<PendingItem> = VecDeque::new();
    let mut last_send: HashMap<u64, Instant> = HashMap::new();
    let mut send_queue: VecDeque<String> = VecDeque::new();
    let mut socket: Option<TlsStream<TcpStream>> = None;
    let mut ready = false;

    match connect(&cfg).await {
        Ok(s) => {
            socket = Some(s);
            ready = true;
            info!("tactical dispatcher: connected to {}:{}", cfg.host, cfg.port);
        }
        Err(e) => warn!("tactical dispatcher: initial connect failed: {e}"),
    }

    loop {
        let Some(msg) = rx.recv().await else { break };
        match msg {
            Message::Submit(detection, frame_num) => {
                if !ready {
                    continue;
                }
                pending.push_back(PendingItem {
                    detection: *detection,
                    frame_num,
                });
                if pending.len() > tunables.tak_max_pending {
                    let excess = pending.len() - tunables.tak_max_pending;
                    for _ in 0..excess {
                        pending.pop_front();
                    }
                }
            }
            Message::Tick => {
                drain_batch(
                    &mut pending,
                    &mut last_send,
                    &mut send_queue,
                    &tunables,
                    cfg.stale_secs,
                    &stats,
                );
                flush_send_queue(&mut socket, &mut send_queue, &stats).await;
                if socket.is_none() {
                    if let Ok(s) = connect(&cfg).await {
                        socket = Some(s);
                        ready = true;
                        info!("tactical dispatcher: reconnected");
                    }
                }
            }
            Message::Stop => {
                drain_batch(
                    &mut pending,
                    &mut last_send,
                    &mut send_queue,
                    &tunables,
                    cfg.stale_secs,
                    &stats,
                );
                flush_send_queue(&mut socket, &mut send_queue, &stats).await;
                if let Some(mut s) = socket.take() {
                    let _ = s.shutdown().await;
                }
                break;
            }
        }
    }
}

fn drain_batch(
    pending: &mut VecDeque<PendingItem>,
    last_send: &mut HashMap<u64, Instant>,
    send_queue: &mut VecDeque<String>,
    tunables: &Tunables,
    stale_secs: u32,
    stats: &PipelineStats,
) {
    let take = tunables.tak_max_per_batch.min(pending.len());
    for item in pending.drain(..take) {
        if let Some(track_id) = item.detection.detection.track_id {
            let now = Instant::now();
            if let Some(last) = last_send.get(&track_id) {
                if now.duration_since(*last).as_secs_f64() < tunables.tak_update_interval_secs {
                    continue;
                }
            }
            last_send.insert(track_id, now);

            if last_send.len() > 1000 {
                let cutoff = Duration::from_secs(60);
                last_send.retain(|_, t| now.duration_since(*t) < cutoff);
            }
        }

        if let Some(xml) = build_cot_message(&item.detection, item.frame_num, stale_secs) {
            if send_queue.len() >= tunables.tak_send_queue_capacity {
                // Drop-on-full: the new message is discarded, the existing
                // queue is left untouched.
                stats.incr_tak_dropped();
            } else {
                send_queue.push_back(xml);
            }
        }
    }
}

async fn flush_send_queue(
    socket: &mut Option<TlsStream<TcpStream>>,
    send_queue: &mut VecDeque<String>,
    stats: &PipelineStats,
) {
    while let Some(msg) = send_queue.pop_front() {
        let Some(s) = socket.as_mut() else {
            stats.incr_tak_dropped();
            continue;
        };
        match s.write_all(msg.as_bytes()).await {
            Ok(()) => stats.incr_tak_sent(),
            Err(e) => {
                trace!("tactical dispatcher: send failed: {e}");
                *socket = None;
                stats.incr_tak_dropped();
            }
        }
    }
}

async fn connect(cfg: &TacticalConfig) -> Result<TlsStream<TcpStream>, TacticalError> {
    let certs = load_certs(&cfg.cert_path)?;
    let key = load_key(&cfg.key_path)?;

    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_client_auth_cert(certs, key)
        .map_err(|e| TacticalError::Tls(e.to_string()))?;

    let connector = TlsConnector::from(Arc::new(config));
    let tcp = TcpStream::connect((cfg.host.as_str(), cfg.port)).await?;
    let server_name = ServerName::try_from(cfg.host.clone())
        .map_err(|e| TacticalError::Tls(format!("invalid server name: {e}")))?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| TacticalError::Tls(e.to_string()))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TacticalError> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TacticalError::Tls(format!("parse cert {path}: {e}")))
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>, TacticalError> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TacticalError::Tls(format!("parse key {path}: {e}")))?
        .ok_or_else(|| TacticalError::Tls(format!("no private key found in {path}")))
}

/// Accepts any server certificate and signature, matching spec.md's
/// "hostname verification disabled; peer verification disabled by
/// default (accepts self-signed servers)".
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

const HOSTILE_KEYWORDS: [&str; 3] = ["weapon", "gun", "threat"];

fn cot_type(class_name: &str) -> &'static str {
    let lower = class_name.to_lowercase();
    if HOSTILE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        "a-h-G-U-C"
    } else {
        "a-n-G-U-C"
    }
}

fn build_cot_message(
    detection: &EnrichedDetection,
    frame_num: u64,
    stale_secs: u32,
) -> Option<String> {
    let geo = detection.geo_coordinates?;
    let class_name = &detection.detection.class_name;
    let confidence = detection.detection.confidence;
    let track_id = detection.detection.track_id;

    let uid = match track_id {
        Some(tid) => format!("YOLO-{class_name}-{tid}"),
        None => format!(
            "YOLO-{class_name}-{frame_num}-{}",
            &Uuid::new_v4().simple().to_string()[..8]
        ),
    };
    let callsign = match track_id {
        Some(tid) => format!("{class_name}_ID{tid}_{:.0}%", confidence * 100.0),
        None => format!("{class_name}_{:.0}%", confidence * 100.0),
    };

    let now = Utc::now();
    let stale = now + ChronoDuration::seconds(stale_secs as i64);
    let time_str = now.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string();
    let stale_str = stale.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string();

    let verb = if track_id.is_some() { "Tracked" } else { "Detected" };
    let track_suffix = track_id.map(|t| format!(" (ID:{t})")).unwrap_or_default();

    Some(format!(
        r#"<event version="2.0" uid="{uid}" type="{cot_type}" time="{time_str}" start="{time_str}" stale="{stale_str}" how="m-g">
  <point lat="{lat:.6}" lon="{lon:.6}" hae="0.0" ce="10.0" le="10.0"/>
  <detail>
    <contact callsign="{callsign}" endpoint="*:-1:stcp"/>
    <uid Droid="{callsign}"/>
    <__group name="Yellow" role="Team Member"/>
    <status battery="100"/>
    <takv device="YOLO Detection" platform="aerostream" os="Linux" version="1.0"/>
    <track speed="0.0" course="{az:.1}"/>
    <remarks>{verb}: {class_name}{track_suffix} | Distance: {dist:.0}m | Camera: Az={az:.1}° El={el:.1}° | Conf={conf:.1}%</remarks>
    <precisionlocation altsrc="DTED0" geopointsrc="Photogrammetry"/>
  </detail>
</event>
"#,
        cot_type = cot_type(class_name),
        lat = geo.latitude,
        lon = geo.longitude,
        az = geo.camera_azimuth_deg,
        el = geo.camera_elevation_deg,
        dist = geo.estimated_ground_distance_m,
        conf = confidence * 100.0,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use av_telemetry::{BBox, Detection, GimbalMethod};

    fn enriched(track_id: Option<u64>) -> EnrichedDetection {
        EnrichedDetection {
            detection: Detection {
                bbox: BBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 },
                class_name: "person".into(),
                class_id: 0,
                confidence: 0.9,
                track_id,
            },
            geo_coordinates: Some(av_telemetry::GeoCoordinates {
                latitude: 34.0,
                longitude: -118.0,
                estimated_ground_distance_m: 250.0,
                camera_azimuth_deg: 45.0,
                camera_elevation_deg: -10.0,
                gimbal_method: GimbalMethod::AbsoluteWorldFrame,
                has_camera_specs: true,
                calculation_method: "photogrammetry",
            }),
        }
    }

    fn pending(track_id: Option<u64>) -> PendingItem {
        PendingItem { detection: enriched(track_id), frame_num: 1 }
    }

    #[test]
    fn rate_limit_suppresses_duplicate_track_within_same_batch() {
        // Five submissions for the same track_id land in one batch (the
        // every-500ms-for-10s scenario collapsed into a single drain): only
        // the first is allowed through, the rest fall inside the 3s window.
        let tunables = Tunables { tak_max_per_batch: 5, ..Tunables::default() };
        let mut pend: VecDeque<PendingItem> = (0..5).map(|_| pending(Some(7))).collect();
        let mut last_send = HashMap::new();
        let mut send_queue = VecDeque::new();
        let stats = PipelineStats::new();

        drain_batch(&mut pend, &mut last_send, &mut send_queue, &tunables, 600, &stats);

        assert_eq!(send_queue.len(), 1);
    }

    #[test]
    fn rate_limit_allows_resend_once_interval_elapses() {
        let tunables = Tunables::default();
        let mut last_send = HashMap::new();
        last_send.insert(
            7u64,
            Instant::now() - Duration::from_secs_f64(tunables.tak_update_interval_secs + 0.1),
        );
        let mut pend: VecDeque<PendingItem> = VecDeque::from([pending(Some(7))]);
        let mut send_queue = VecDeque::new();
        let stats = PipelineStats::new();

        drain_batch(&mut pend, &mut last_send, &mut send_queue, &tunables, 600, &stats);

        assert_eq!(send_queue.len(), 1);
    }

    #[test]
    fn send_queue_drops_new_message_past_capacity_keeping_existing_entries() {
        // 1001 distinct (untracked, so unrate-limited) detections pushed in
        // one drain: the 1001st entry is dropped rather than evicting the
        // oldest queued message (drop-on-full, not drop-oldest).
        let tunables = Tunables { tak_max_per_batch: 2000, tak_send_queue_capacity: 1000, ..Tunables::default() };
        let mut pend: VecDeque<PendingItem> = (0..1001).map(|_| pending(None)).collect();
        let mut last_send = HashMap::new();
        let mut send_queue = VecDeque::new();
        let stats = PipelineStats::new();

        drain_batch(&mut pend, &mut last_send, &mut send_queue, &tunables, 600, &stats);

        assert_eq!(send_queue.len(), 1000);
        assert_eq!(stats.snapshot().tak_dropped, 1);
    }

    #[test]
    fn cot_uid_is_stable_across_messages_for_the_same_track() {
        let det = enriched(Some(42));
        let first = build_cot_message(&det, 1, 600).unwrap();
        let second = build_cot_message(&det, 2, 600).unwrap();

        let extract_uid = |xml: &str| {
            let start = xml.find("uid=\"").unwrap() + 5;
            let end = xml[start..].find('"').unwrap() + start;
            xml[start..end].to_string()
        };
        assert_eq!(extract_uid(&first), "YOLO-person-42");
        assert_eq!(extract_uid(&first), extract_uid(&second));
    }

    #[test]
    fn cot_uid_differs_without_a_track_id() {
        let det = enriched(None);
        let xml = build_cot_message(&det, 9, 600).unwrap();
        assert!(xml.contains("uid=\"YOLO-person-9-"));
    }

    #[test]
    fn cot_type_flags_hostile_keywords_case_insensitively() {
        assert_eq!(cot_type("Armed Gunman"), "a-h-G-U-C");
        assert_eq!(cot_type("WEAPON"), "a-h-G-U-C");
        assert_eq!(cot_type("person"), "a-n-G-U-C");
    }
}
