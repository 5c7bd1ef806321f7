//! Local authority for voice state. One lock serialises every
//! mutation; reads hand back a cheap snapshot copy. Grounded on the gateway's
//! `GatewayState` map-of-maps pattern, narrowed to a single process's view of
//! its own channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{VoiceError, VoiceResult};
use crate::metrics_hooks::{self, VoiceMetrics};
use crate::peer::{PeerSession, QualityLabel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct SpeakerSnapshot {
    pub peer_id: String,
    pub user_id: String,
    pub display_name: String,
    pub volume: f32,
    pub speaking: bool,
    pub dominant: bool,
    pub muted: bool,
    pub deafened: bool,
    pub quality: QualityLabel,
}

#[derive(Debug, Clone)]
pub struct ScreenShareEntry {
    pub peer_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub state: EngineState,
    pub channel_id: String,
    pub muted: bool,
    pub deafened: bool,
    pub peer_count: usize,
    pub speakers: Vec<SpeakerSnapshot>,
    pub screen_shares: Vec<ScreenShareEntry>,
    pub channel_started_at: Option<u64>,
    pub diagnostics: Option<String>,
}

/// Events an upper layer (orchestrator/UI) subscribes to. Emitted without the
/// engine lock held
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StateChanged(EngineState),
    SpeakersChanged(Vec<SpeakerSnapshot>),
}

struct LocalUser {
    user_id: String,
    display_name: String,
    peer_id: String,
}

struct Inner {
    state: EngineState,
    channel_id: String,
    local_user: Option<LocalUser>,
    muted: bool,
    deafened: bool,
    channel_started_at: Option<u64>,
    peers: HashMap<String, Arc<PeerSession>>,
    screen_shares: HashMap<String, ()>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: EngineState::Disconnected,
            channel_id: String::new(),
            local_user: None,
            muted: false,
            deafened: false,
            channel_started_at: None,
            peers: HashMap::new(),
            screen_shares: HashMap::new(),
        }
    }
}

/// Owns local voice state and every `PeerSession` in the current channel.
pub struct Engine {
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<EngineEvent>,
    metrics: Arc<dyn VoiceMetrics>,
}

impl Engine {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        Self::new_with_metrics(metrics_hooks::noop())
    }

    pub fn new_with_metrics(metrics: Arc<dyn VoiceMetrics>) -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { inner: Mutex::new(Inner::default()), events: tx, metrics }), rx)
    }

    /// Valid only in `Disconnected`. Allocates a transient local peer id.
    pub fn join(&self, channel_id: &str, user_id: &str, display_name: &str) -> VoiceResult<String> {
        let mut guard = self.inner.lock();
        if guard.state != EngineState::Disconnected {
            return Err(VoiceError::InvalidArgument("join called outside Disconnected state"));
        }
        let peer_id = Uuid::new_v4().to_string();
        guard.channel_id = channel_id.to_string();
        guard.local_user = Some(LocalUser {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            peer_id: peer_id.clone(),
        });
        guard.channel_started_at = Some(now_unix());
        guard.state = EngineState::Connecting;
        drop(guard);
        self.emit_state_change(EngineState::Connecting);
        Ok(peer_id)
    }

    /// Call once the signalling handshake (and first-peer SDP round-trip, if
    /// any) has completed.
    pub fn mark_connected(&self) {
        let mut guard = self.inner.lock();
        if guard.state != EngineState::Connecting {
            return;
        }
        guard.state = EngineState::Connected;
        drop(guard);
        self.emit_state_change(EngineState::Connected);
    }

    pub fn mark_join_failed(&self) {
        let mut guard = self.inner.lock();
        guard.state = EngineState::Disconnected;
        guard.channel_id.clear();
        guard.local_user = None;
        drop(guard);
        self.emit_state_change(EngineState::Disconnected);
    }

    /// Idempotent: closes every peer session and resets mute/deafen.
    pub async fn leave(&self) {
        let peers: Vec<Arc<PeerSession>> = {
            let mut guard = self.inner.lock();
            if guard.state == EngineState::Disconnected && guard.peers.is_empty() {
                return;
            }
            let peers = guard.peers.drain().map(|(_, p)| p).collect();
            guard.state = EngineState::Disconnected;
            guard.channel_id.clear();
            guard.local_user = None;
            guard.muted = false;
            guard.deafened = false;
            guard.channel_started_at = None;
            guard.screen_shares.clear();
            peers
        };
        for peer in &peers {
            peer.close().await;
        }
        self.emit_state_change(EngineState::Disconnected);
        self.emit_speakers_change();
    }

    pub fn add_peer(&self, peer: Arc<PeerSession>) {
        let mut guard = self.inner.lock();
        guard.peers.entry(peer.peer_id.clone()).or_insert(peer);
        drop(guard);
        self.emit_speakers_change();
    }

    pub fn peer(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        self.inner.lock().peers.get(peer_id).cloned()
    }

    pub async fn remove_peer(&self, peer_id: &str) {
        let removed = {
            let mut guard = self.inner.lock();
            guard.screen_shares.remove(peer_id);
            guard.peers.remove(peer_id)
        };
        if let Some(peer) = removed {
            peer.close().await;
            self.emit_speakers_change();
        }
    }

    /// Mute gates the outbound track only.
    pub fn set_mute(&self, muted: bool) {
        let mut guard = self.inner.lock();
        guard.muted = muted;
        drop(guard);
        self.emit_speakers_change();
    }

    /// Deafen gates inbound playback and implies mute; releasing deafen does
    /// not release mute.
    pub fn set_deafen(&self, deafened: bool) {
        let mut guard = self.inner.lock();
        guard.deafened = deafened;
        if deafened {
            guard.muted = true;
        }
        drop(guard);
        self.emit_speakers_change();
    }

    pub fn toggle_mute(&self) {
        let next = !self.inner.lock().muted;
        self.set_mute(next);
    }

    pub fn toggle_deafen(&self) {
        let next = !self.inner.lock().deafened;
        self.set_deafen(next);
    }

    pub fn set_screen_sharing(&self, peer_id: &str, sharing: bool) {
        let mut guard = self.inner.lock();
        if sharing {
            guard.screen_shares.insert(peer_id.to_string(), ());
        } else {
            guard.screen_shares.remove(peer_id);
        }
        drop(guard);
        self.emit_speakers_change();
    }

    pub fn get_status(&self) -> StatusSnapshot {
        let guard = self.inner.lock();
        let speakers = guard
            .local_user
            .iter()
            .map(|u| SpeakerSnapshot {
                peer_id: u.peer_id.clone(),
                user_id: u.user_id.clone(),
                display_name: u.display_name.clone(),
                volume: 1.0,
                speaking: false,
                dominant: false,
                muted: guard.muted,
                deafened: guard.deafened,
                quality: QualityLabel::Unknown,
            })
            .chain(guard.peers.values().map(|p| SpeakerSnapshot {
                peer_id: p.peer_id.clone(),
                user_id: p.user_id.clone(),
                display_name: p.display_name.clone(),
                volume: 1.0,
                speaking: false,
                dominant: false,
                muted: p.is_muted(),
                deafened: p.is_deafened(),
                quality: p.quality_label(),
            }))
            .collect();

        let screen_shares = guard
            .screen_shares
            .keys()
            .filter_map(|peer_id| {
                guard
                    .peers
                    .get(peer_id)
                    .map(|p| ScreenShareEntry { peer_id: peer_id.clone(), user_id: p.user_id.clone() })
            })
            .collect();

        StatusSnapshot {
            state: guard.state,
            channel_id: guard.channel_id.clone(),
            muted: guard.muted,
            deafened: guard.deafened,
            peer_count: guard.peers.len(),
            speakers,
            screen_shares,
            channel_started_at: guard.channel_started_at,
            diagnostics: None,
        }
    }

    fn emit_state_change(&self, state: EngineState) {
        let label = match state {
            EngineState::Disconnected => "disconnected",
            EngineState::Connecting => "connecting",
            EngineState::Connected => "connected",
        };
        self.metrics.engine_state_changed(label);
        let _ = self.events.send(EngineEvent::StateChanged(state));
    }

    fn emit_speakers_change(&self) {
        let snapshot = self.get_status().speakers;
        let _ = self.events.send(EngineEvent::SpeakersChanged(snapshot));
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct StateRecorder {
        seen: Mutex<Vec<String>>,
    }

    impl VoiceMetrics for StateRecorder {
        fn engine_state_changed(&self, state: &str) {
            self.seen.lock().push(state.to_string());
        }
    }

    #[test]
    fn state_transitions_are_reported_to_metrics() {
        let recorder = Arc::new(StateRecorder::default());
        let (engine, _rx) = Engine::new_with_metrics(recorder.clone());
        engine.join("ch-1", "u1", "Alice").unwrap();
        engine.mark_connected();
        tokio_test_block_on(engine.leave());
        assert_eq!(*recorder.seen.lock(), vec!["connecting", "connected", "disconnected"]);
    }

    #[test]
    fn solo_join_then_leave_matches_scenario_a() {
        let (engine, _rx) = Engine::new();
        engine.join("ch-1", "u1", "Alice").unwrap();
        engine.mark_connected();
        let status = engine.get_status();
        assert_eq!(status.state, EngineState::Connected);
        assert_eq!(status.channel_id, "ch-1");
        assert_eq!(status.peer_count, 0);
        assert_eq!(status.speakers.len(), 1);

        tokio_test_block_on(engine.leave());
        let status = engine.get_status();
        assert_eq!(status.state, EngineState::Disconnected);
        assert_eq!(status.channel_id, "");
        assert_eq!(status.peer_count, 0);
        assert!(status.speakers.is_empty());
    }

    #[test]
    fn deafen_implies_mute_and_release_does_not_unmute() {
        let (engine, _rx) = Engine::new();
        engine.join("ch-1", "u1", "Alice").unwrap();
        engine.set_deafen(true);
        let status = engine.get_status();
        assert!(status.muted);
        assert!(status.deafened);

        engine.set_deafen(false);
        let status = engine.get_status();
        assert!(status.muted, "releasing deafen must not release mute");
        assert!(!status.deafened);
    }

    #[test]
    fn join_outside_disconnected_is_rejected() {
        let (engine, _rx) = Engine::new();
        engine.join("ch-1", "u1", "Alice").unwrap();
        let err = engine.join("ch-2", "u1", "Alice").unwrap_err();
        assert!(matches!(err, VoiceError::InvalidArgument(_)));
    }

    #[test]
    fn leave_twice_is_a_noop_second_time() {
        let (engine, _rx) = Engine::new();
        engine.join("ch-1", "u1", "Alice").unwrap();
        tokio_test_block_on(engine.leave());
        tokio_test_block_on(engine.leave());
        assert_eq!(engine.get_status().state, EngineState::Disconnected);
    }

    fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
    }
}
