//! One WebRTC-like media session per remote participant.
//! Grounded on a `webrtc`-crate peer-connection wrapper: media engine with
//! Opus registered, ICE candidate/track callbacks wired at construction,
//! SDP offer/answer/candidate plumbing, and RTP framing for outbound audio.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::header::Header as RtpHeader;
use webrtc::rtp::packet::Packet as RtpPacket;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

use crate::error::{VoiceError, VoiceResult};
use crate::ice::IceConfig;
use crate::jitter::JitterBuffer;
use crate::metrics_hooks::VoiceMetrics;
use crate::pcm::{CHANNELS, FRAME_SAMPLES, SAMPLE_RATE};

const OPUS_PAYLOAD_TYPE: u8 = 111;
const QUALITY_SAMPLE_INTERVAL: Duration = Duration::from_secs(2);
const ICE_FAILURE_GRACE: Duration = Duration::from_secs(5);
const MIN_SAMPLES_FOR_QUALITY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityLabel {
    Unknown,
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QualitySample {
    pub loss_pct: f32,
    pub jitter_ms: f32,
    pub rtt_ms: f32,
}

/// Events a [`PeerSession`] raises for the orchestrator/engine to react to.
pub enum PeerEvent {
    LocalCandidate(Option<RTCIceCandidateInit>),
    RemoteTrackStarted,
    DecodedFrame { pcm: Vec<i16> },
    OpusFrameTee { data: Vec<u8> },
    PeerLost,
}

struct QualityState {
    samples: Vec<QualitySample>,
    label: QualityLabel,
    /// Cumulative (packets_lost, packets_received) from the previous sample,
    /// so `loss_pct` reflects the delta over one sampling interval rather
    /// than the connection's lifetime ratio.
    prev_packets: Option<(i64, u64)>,
}

impl Default for QualityState {
    fn default() -> Self {
        Self { samples: Vec::new(), label: QualityLabel::Unknown, prev_packets: None }
    }
}

/// One remote participant's media + ICE endpoint.
pub struct PeerSession {
    pub peer_id: String,
    pub user_id: String,
    pub display_name: String,
    connection: Arc<RTCPeerConnection>,
    audio_track: Arc<TrackLocalStaticRTP>,
    events: mpsc::UnboundedSender<PeerEvent>,
    closed: Arc<AtomicBool>,
    rtp_seq: AtomicU16,
    rtp_ts: AtomicU32,
    rtp_ssrc: u32,
    jitter: Arc<Mutex<JitterBuffer>>,
    quality: Mutex<QualityState>,
    muted: AtomicBool,
    deafened: AtomicBool,
    screen_sharing: AtomicBool,
    last_heard_audio: Mutex<Option<Instant>>,
    metrics: Arc<dyn VoiceMetrics>,
}

impl PeerSession {
    pub async fn new(
        peer_id: String,
        user_id: String,
        display_name: String,
        ice_config: &IceConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
        metrics: Arc<dyn VoiceMetrics>,
    ) -> VoiceResult<Arc<Self>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| VoiceError::Internal(format!("media engine: {e}")))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| VoiceError::Internal(format!("interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = ice_config
            .servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone().unwrap_or_default(),
                credential: s.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        let config = RTCConfiguration { ice_servers, ..Default::default() };

        let connection = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| VoiceError::Internal(format!("new_peer_connection: {e}")))?,
        );

        let audio_track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: SAMPLE_RATE,
                channels: CHANNELS as u16,
                ..Default::default()
            },
            "audio".to_string(),
            format!("concord-{peer_id}"),
        ));
        connection
            .add_track(Arc::clone(&audio_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| VoiceError::Internal(format!("add_track: {e}")))?;

        let closed = Arc::new(AtomicBool::new(false));

        let mut jitter_buffer = JitterBuffer::default();
        jitter_buffer.set_metrics(Arc::clone(&metrics));

        let session = Arc::new(Self {
            peer_id: peer_id.clone(),
            user_id,
            display_name,
            connection: Arc::clone(&connection),
            audio_track,
            events: events.clone(),
            closed: Arc::clone(&closed),
            rtp_seq: AtomicU16::new(0),
            rtp_ts: AtomicU32::new(0),
            rtp_ssrc: rand::random(),
            jitter: Arc::new(Mutex::new(jitter_buffer)),
            quality: Mutex::new(QualityState::default()),
            muted: AtomicBool::new(false),
            deafened: AtomicBool::new(false),
            screen_sharing: AtomicBool::new(false),
            last_heard_audio: Mutex::new(None),
            metrics,
        });

        session.wire_callbacks();
        session.spawn_quality_sampler();
        session.spawn_playback_pump()?;
        session.metrics.peer_session_opened();
        Ok(session)
    }

    fn wire_callbacks(self: &Arc<Self>) {
        let events = self.events.clone();
        self.connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = events.clone();
            Box::pin(async move {
                let init = match candidate {
                    Some(c) => match c.to_json() {
                        Ok(json) => Some(RTCIceCandidateInit {
                            candidate: json.candidate,
                            sdp_mid: json.sdp_mid,
                            sdp_mline_index: json.sdp_mline_index,
                            username_fragment: json.username_fragment,
                        }),
                        Err(e) => {
                            tracing::warn!("failed to serialize local ICE candidate: {e}");
                            return;
                        }
                    },
                    None => None,
                };
                let _ = events.send(PeerEvent::LocalCandidate(init));
            })
        }));

        let peer_id = self.peer_id.clone();
        let closed = Arc::clone(&self.closed);
        let events = self.events.clone();
        let session_for_state = Arc::clone(self);
        self.connection.on_peer_connection_state_change(Box::new(move |state| {
            tracing::info!(peer_id = %peer_id, ?state, "peer connection state changed");
            if matches!(state, RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected) {
                let closed = Arc::clone(&closed);
                let events = events.clone();
                let session = Arc::clone(&session_for_state);
                tokio::spawn(async move {
                    tokio::time::sleep(ICE_FAILURE_GRACE).await;
                    if closed.load(Ordering::SeqCst) {
                        return;
                    }
                    let still_bad = matches!(
                        session.connection.connection_state(),
                        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected
                    );
                    if still_bad {
                        closed.store(true, Ordering::SeqCst);
                        session.metrics.peer_session_closed("ice_failed");
                        let _ = events.send(PeerEvent::PeerLost);
                    }
                });
            }
            Box::pin(async {})
        }));

        let events = self.events.clone();
        let jitter = Arc::clone(&self.jitter);
        let peer_id = self.peer_id.clone();
        self.connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = events.clone();
            let jitter = jitter.clone();
            let peer_id = peer_id.clone();
            Box::pin(async move {
                let _ = events.send(PeerEvent::RemoteTrackStarted);
                tokio::spawn(run_inbound_media_loop(track, jitter, events, peer_id));
            })
        }));
    }

    /// Every frame tick, drain the jitter buffer and decode into PCM for the
    /// playback sink; a `None` pop (packet not ready/lost) is concealed via
    /// Opus PLC rather than leaving a gap.
    fn spawn_playback_pump(self: &Arc<Self>) -> VoiceResult<()> {
        let mut codec = crate::opus_codec::OpusCodec::new()?;
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(crate::pcm::FRAME_MS as u64));
            let mut pcm_buf = vec![0i16; FRAME_SAMPLES];
            loop {
                ticker.tick().await;
                if session.closed.load(Ordering::SeqCst) {
                    break;
                }
                let popped = session.jitter.lock().pop();
                let decoded = match popped {
                    Some(payload) => codec.decode(&payload, &mut pcm_buf),
                    None => codec.decode_lost(&mut pcm_buf),
                };
                match decoded {
                    Ok(samples) => {
                        *session.last_heard_audio.lock() = Some(Instant::now());
                        let _ = session.events.send(PeerEvent::DecodedFrame { pcm: pcm_buf[..samples].to_vec() });
                    }
                    Err(e) => tracing::warn!(peer_id = %session.peer_id, "opus decode failed: {e}"),
                }
            }
        });
        Ok(())
    }

    fn spawn_quality_sampler(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(QUALITY_SAMPLE_INTERVAL);
            loop {
                ticker.tick().await;
                if session.closed.load(Ordering::SeqCst) {
                    break;
                }
                session.sample_quality_once().await;
            }
        });
    }

    async fn sample_quality_once(&self) {
        let stats = self.connection.get_stats().await;
        let transport = extract_transport_stats(&stats);

        let mut q = self.quality.lock();
        let loss_pct = match (transport.packets_lost, transport.packets_received) {
            (Some(lost), Some(received)) => {
                let (delta_lost, delta_received) = match q.prev_packets {
                    Some((prev_lost, prev_received)) => ((lost - prev_lost).max(0) as u64, received.saturating_sub(prev_received)),
                    // No prior sample to diff against: treat the lifetime
                    // cumulative counts as the first interval's delta.
                    None => (lost.max(0) as u64, received),
                };
                q.prev_packets = Some((lost, received));
                let delta_total = delta_lost + delta_received;
                if delta_total > 0 {
                    100.0 * delta_lost as f32 / delta_total as f32
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        let sample = QualitySample { loss_pct, jitter_ms: transport.jitter_ms, rtt_ms: transport.rtt_ms };
        q.samples.push(sample);
        if q.samples.len() > 16 {
            q.samples.remove(0);
        }
        q.label = if q.samples.len() < MIN_SAMPLES_FOR_QUALITY {
            QualityLabel::Unknown
        } else {
            label_for_score(score_from(sample.loss_pct, sample.jitter_ms, sample.rtt_ms))
        };
        let label = q.label;
        drop(q);
        self.metrics.quality_sample(label);
    }

    pub fn quality_label(&self) -> QualityLabel {
        self.quality.lock().label
    }

    pub async fn create_offer(&self) -> VoiceResult<String> {
        self.guard_open()?;
        let offer = self
            .connection
            .create_offer(None)
            .await
            .map_err(|e| VoiceError::Internal(format!("create_offer: {e}")))?;
        self.connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| VoiceError::Internal(format!("set_local_description: {e}")))?;
        Ok(offer.sdp)
    }

    pub async fn handle_offer(&self, sdp: &str) -> VoiceResult<String> {
        self.guard_open()?;
        let offer = RTCSessionDescription::offer(sdp.to_string()).map_err(|e| {
            tracing::debug!("malformed offer sdp: {e}");
            VoiceError::InvalidArgument("malformed offer sdp")
        })?;
        self.connection
            .set_remote_description(offer)
            .await
            .map_err(|e| VoiceError::Internal(format!("set_remote_description: {e}")))?;
        let answer = self
            .connection
            .create_answer(None)
            .await
            .map_err(|e| VoiceError::Internal(format!("create_answer: {e}")))?;
        self.connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| VoiceError::Internal(format!("set_local_description: {e}")))?;
        Ok(answer.sdp)
    }

    pub async fn handle_answer(&self, sdp: &str) -> VoiceResult<()> {
        self.guard_open()?;
        let answer = RTCSessionDescription::answer(sdp.to_string()).map_err(|e| {
            tracing::debug!("malformed answer sdp: {e}");
            VoiceError::InvalidArgument("malformed answer sdp")
        })?;
        self.connection
            .set_remote_description(answer)
            .await
            .map_err(|e| VoiceError::Internal(format!("set_remote_description: {e}")))?;
        Ok(())
    }

    /// Idempotent; candidates arriving after close are dropped silently.
    pub async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.connection.add_ice_candidate(candidate).await {
            tracing::warn!(peer_id = %self.peer_id, "failed to add remote ICE candidate: {e}");
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn set_deafened(&self, deafened: bool) {
        self.deafened.store(deafened, Ordering::SeqCst);
    }

    pub fn set_screen_sharing(&self, sharing: bool) {
        self.screen_sharing.store(sharing, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn is_deafened(&self) -> bool {
        self.deafened.load(Ordering::SeqCst)
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen_sharing.load(Ordering::SeqCst)
    }

    /// Encode-and-send is performed by the caller; this writes a pre-encoded
    /// Opus payload as one RTP packet, stamping seq/ts monotonically.
    pub async fn send_opus_frame(&self, opus_payload: &[u8]) -> VoiceResult<()> {
        if self.closed.load(Ordering::SeqCst) || self.muted.load(Ordering::SeqCst) {
            return Ok(());
        }
        let seq = self.rtp_seq.fetch_add(1, Ordering::Relaxed);
        let ts = self.rtp_ts.fetch_add(FRAME_SAMPLES as u32, Ordering::Relaxed);
        let packet = RtpPacket {
            header: RtpHeader {
                version: 2,
                payload_type: OPUS_PAYLOAD_TYPE,
                sequence_number: seq,
                timestamp: ts,
                ssrc: self.rtp_ssrc,
                marker: false,
                ..Default::default()
            },
            payload: Bytes::copy_from_slice(opus_payload),
        };
        self.audio_track
            .write_rtp(&packet)
            .await
            .map_err(|e| VoiceError::Internal(format!("write_rtp: {e}")))?;
        Ok(())
    }

    fn guard_open(&self) -> VoiceResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(VoiceError::NoSession)
        } else {
            Ok(())
        }
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.metrics.peer_session_closed("closed");
        self.jitter.lock().reset();
        if let Err(e) = self.connection.close().await {
            tracing::warn!(peer_id = %self.peer_id, "error closing peer connection: {e}");
        }
    }
}

async fn run_inbound_media_loop(
    track: Arc<webrtc::track::track_remote::TrackRemote>,
    jitter: Arc<Mutex<JitterBuffer>>,
    events: mpsc::UnboundedSender<PeerEvent>,
    peer_id: String,
) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _)) => {
                if packet.payload.is_empty() {
                    continue;
                }
                let _ = events.send(PeerEvent::OpusFrameTee { data: packet.payload.to_vec() });
                jitter.lock().push(packet.payload.to_vec(), packet.header.sequence_number, packet.header.timestamp);
            }
            Err(e) => {
                tracing::warn!(peer_id = %peer_id, "rtp read error: {e}");
                break;
            }
        }
    }
}

/// score = 100 - 2*loss_pct - 0.5*jitter_ms - 0.1*rtt_ms, clamped [0,100].
fn score_from(loss_pct: f32, jitter_ms: f32, rtt_ms: f32) -> f32 {
    (100.0 - 2.0 * loss_pct - 0.5 * jitter_ms - 0.1 * rtt_ms).clamp(0.0, 100.0)
}

fn label_for_score(score: f32) -> QualityLabel {
    if score >= 80.0 {
        QualityLabel::Good
    } else if score >= 50.0 {
        QualityLabel::Fair
    } else {
        QualityLabel::Poor
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TransportStats {
    packets_lost: Option<i64>,
    packets_received: Option<u64>,
    jitter_ms: f32,
    rtt_ms: f32,
}

/// Walks every report in one `get_stats()` snapshot: `CandidatePair` for
/// RTT, `RemoteInboundRTP` for the receiver-reported loss/jitter pair (the
/// standard source for both per the WebRTC stats model), falling back to
/// `InboundRTP`'s own counters when the remote-inbound report is absent.
fn extract_transport_stats(stats: &webrtc::stats::StatsReport) -> TransportStats {
    let mut out = TransportStats::default();
    for report in stats.reports.values() {
        match report {
            webrtc::stats::StatsReportType::CandidatePair(pair) if pair.nominated => {
                out.rtt_ms = (pair.current_round_trip_time * 1000.0) as f32;
            }
            webrtc::stats::StatsReportType::RemoteInboundRTP(remote) => {
                out.packets_lost = Some(remote.packets_lost as i64);
                out.jitter_ms = (remote.jitter * 1000.0) as f32;
                if out.rtt_ms == 0.0 {
                    out.rtt_ms = (remote.round_trip_time * 1000.0) as f32;
                }
            }
            webrtc::stats::StatsReportType::InboundRTP(inbound) => {
                out.packets_received = Some(inbound.packets_received as u64);
                if out.packets_lost.is_none() {
                    out.packets_lost = Some(inbound.packets_lost as i64);
                }
                if out.jitter_ms == 0.0 {
                    out.jitter_ms = (inbound.jitter * 1000.0) as f32;
                }
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_clamps_to_unit_range() {
        assert_eq!(score_from(0.0, 0.0, 0.0), 100.0);
        assert_eq!(score_from(1000.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn labels_match_score_bands() {
        assert_eq!(label_for_score(100.0), QualityLabel::Good);
        assert_eq!(label_for_score(80.0), QualityLabel::Good);
        assert_eq!(label_for_score(79.9), QualityLabel::Fair);
        assert_eq!(label_for_score(50.0), QualityLabel::Fair);
        assert_eq!(label_for_score(49.9), QualityLabel::Poor);
    }
}
