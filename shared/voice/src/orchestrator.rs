//! Glues the signalling client to the engine and drives the SDP/ICE dance.
//! Holds owning references to the engine and signalling client rather than
//! a cyclic engine<->orchestrator callback: the engine emits snapshot events
//! on a channel, the orchestrator reacts and issues commands back through
//! its own handles. No back-reference from the engine to the orchestrator
//! exists.

use std::sync::Arc;

use tokio::sync::mpsc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

use crate::engine::Engine;
use crate::ice::IceConfig;
use crate::metrics_hooks::{self, VoiceMetrics};
use crate::peer::{PeerEvent, PeerSession};
use crate::signaling::envelope::{Envelope, SignalPayload};
use crate::signaling::SignalingClient;
use crate::translator::Translator;

/// Runs for the lifetime of one joined channel. Dropping it does not tear
/// anything down by itself; callers drive `Engine::leave()` separately.
pub struct Orchestrator {
    engine: Arc<Engine>,
    signaling: Arc<SignalingClient>,
    ice_config: IceConfig,
    local_peer_id: String,
    local_user_id: String,
    /// Decoded per-peer PCM, for the owning binary's playout mixer. `None`
    /// until `with_playback_sink` is called (headless/tooling uses of this
    /// orchestrator may not want audio out at all).
    playback_tx: Option<mpsc::UnboundedSender<(String, Vec<i16>)>>,
    /// Optional STT->translate->TTS tee; `None` disables it
    /// entirely so the hot path never touches the breaker.
    translator: Option<Arc<Translator>>,
    metrics: Arc<dyn VoiceMetrics>,
}

impl Orchestrator {
    pub fn new(engine: Arc<Engine>, signaling: Arc<SignalingClient>, ice_config: IceConfig, local_peer_id: String, local_user_id: String) -> Self {
        Self {
            engine,
            signaling,
            ice_config,
            local_peer_id,
            local_user_id,
            playback_tx: None,
            translator: None,
            metrics: metrics_hooks::noop(),
        }
    }

    pub fn with_playback_sink(mut self, tx: mpsc::UnboundedSender<(String, Vec<i16>)>) -> Self {
        self.playback_tx = Some(tx);
        self
    }

    pub fn with_translator(mut self, translator: Arc<Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Propagates to every `PeerSession` this orchestrator spawns and to its
    /// signalling client's reconnect-attempt counter.
    pub fn with_metrics(mut self, metrics: Arc<dyn VoiceMetrics>) -> Self {
        self.signaling.set_metrics(Arc::clone(&metrics));
        self.metrics = metrics;
        self
    }

    /// Registers handlers for every inbound envelope type this orchestrator
    /// reacts to and starts the dispatch loops. Each handler only forwards
    /// work; none blocks the signalling read task.
    pub fn start(self: &Arc<Self>) {
        for kind in ["peer_list", "peer_joined", "peer_left", "offer", "answer", "ice_candidate", "error"] {
            let (tx, rx) = mpsc::unbounded_channel();
            self.signaling.on(kind, tx);
            let orchestrator = Arc::clone(self);
            let kind = kind.to_string();
            tokio::spawn(async move { orchestrator.drain(kind, rx).await });
        }

        if let Some(mut exhausted_rx) = self.signaling.take_reconnect_exhausted() {
            let engine = Arc::clone(&self.engine);
            tokio::spawn(async move {
                if exhausted_rx.recv().await.is_some() {
                    tracing::warn!("signalling reconnect budget exhausted, tearing down every peer session");
                    engine.leave().await;
                }
            });
        }
    }

    async fn drain(&self, kind: String, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = rx.recv().await {
            if let Err(e) = self.handle(envelope).await {
                tracing::warn!(kind = %kind, "orchestrator failed to handle envelope: {e}");
            }
        }
    }

    async fn handle(&self, envelope: Envelope) -> crate::error::VoiceResult<()> {
        match envelope.payload {
            // Deterministic initiator = the joiner: on our own peer_list we
            // offer to every already-present peer.
            SignalPayload::PeerList { peers } => {
                let remote_peers: Vec<_> = peers.into_iter().filter(|p| p.peer_id != self.local_peer_id).collect();
                if remote_peers.is_empty() {
                    // Empty channel: nothing to round-trip with, connect immediately.
                    self.engine.mark_connected();
                } else {
                    for peer in remote_peers {
                        let session = self.spawn_peer(peer.peer_id.clone(), peer.user_id).await?;
                        let sdp = session.create_offer().await?;
                        self.send_offer(&session.peer_id, &sdp);
                    }
                    // Connected transition is deferred to the first handled
                    // SignalPayload::Answer below.
                }
            }
            // A peer_joined means someone else arrived after us; we
            // pre-create a session and wait for their offer (glare avoidance).
            SignalPayload::PeerJoined { peer_id, user_id } => {
                self.spawn_peer(peer_id, user_id).await?;
            }
            SignalPayload::PeerLeft { peer_id, .. } => {
                self.engine.remove_peer(&peer_id).await;
            }
            SignalPayload::Offer { peer_id, sdp } => {
                let session = match self.engine.peer(&peer_id) {
                    Some(s) => s,
                    None => self.spawn_peer(peer_id.clone(), peer_id.clone()).await?,
                };
                let answer = session.handle_offer(&sdp).await?;
                self.send_answer(&peer_id, &answer);
            }
            SignalPayload::Answer { peer_id, sdp } => {
                // Late answer after leave: drop silently.
                if let Some(session) = self.engine.peer(&peer_id) {
                    session.handle_answer(&sdp).await?;
                    // No-op once already Connected, so this only fires the
                    // transition on the first peer's round-trip.
                    self.engine.mark_connected();
                }
            }
            SignalPayload::IceCandidate { candidate, sdp_mid, sdp_m_line_index } => {
                if let Some(from) = &envelope.from {
                    if let Some(session) = self.engine.peer(from) {
                        session
                            .add_remote_candidate(RTCIceCandidateInit {
                                candidate,
                                sdp_mid,
                                sdp_mline_index: sdp_m_line_index,
                                username_fragment: None,
                            })
                            .await;
                    }
                }
            }
            SignalPayload::Error { code, message } => {
                tracing::warn!(code = %code, message = %message, "signalling server reported an error");
            }
            SignalPayload::Join { .. } | SignalPayload::Leave => {
                // Outbound-only envelope types; nothing to react to.
            }
        }
        Ok(())
    }

    async fn spawn_peer(&self, peer_id: String, user_id: String) -> crate::error::VoiceResult<Arc<PeerSession>> {
        if let Some(existing) = self.engine.peer(&peer_id) {
            return Ok(existing);
        }
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let session = PeerSession::new(peer_id.clone(), user_id, String::new(), &self.ice_config, events_tx, Arc::clone(&self.metrics)).await?;
        self.engine.add_peer(Arc::clone(&session));

        let signaling = Arc::clone(&self.signaling);
        let engine = Arc::clone(&self.engine);
        let local_peer_id = self.local_peer_id.clone();
        let peer_id_for_events = peer_id.clone();
        let playback_tx = self.playback_tx.clone();
        let translator = self.translator.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    PeerEvent::LocalCandidate(Some(candidate)) => {
                        let payload = SignalPayload::IceCandidate {
                            candidate: candidate.candidate,
                            sdp_mid: candidate.sdp_mid,
                            sdp_m_line_index: candidate.sdp_mline_index,
                        };
                        let envelope = Envelope::new(Some(local_peer_id.clone()), Some(peer_id_for_events.clone()), None, None, payload);
                        let _ = signaling.send(&envelope);
                    }
                    PeerEvent::LocalCandidate(None) => {
                        tracing::debug!(peer_id = %peer_id_for_events, "ICE gathering complete");
                    }
                    PeerEvent::RemoteTrackStarted => {
                        tracing::debug!(peer_id = %peer_id_for_events, "remote track started");
                    }
                    PeerEvent::DecodedFrame { pcm } => {
                        if let Some(tx) = &playback_tx {
                            let _ = tx.send((peer_id_for_events.clone(), pcm));
                        }
                    }
                    PeerEvent::OpusFrameTee { data } => {
                        if let Some(translator) = &translator {
                            translator.push_opus_frame(&peer_id_for_events, &data);
                        }
                    }
                    PeerEvent::PeerLost => {
                        engine.remove_peer(&peer_id_for_events).await;
                        break;
                    }
                }
            }
        });

        Ok(session)
    }

    fn send_offer(&self, peer_id: &str, sdp: &str) {
        let payload = SignalPayload::Offer { peer_id: self.local_peer_id.clone(), sdp: sdp.to_string() };
        let envelope = Envelope::new(Some(self.local_peer_id.clone()), Some(peer_id.to_string()), None, None, payload);
        if let Err(e) = self.signaling.send(&envelope) {
            tracing::warn!(peer_id = %peer_id, "failed to send offer: {e}");
        }
    }

    fn send_answer(&self, peer_id: &str, sdp: &str) {
        let payload = SignalPayload::Answer { peer_id: self.local_peer_id.clone(), sdp: sdp.to_string() };
        let envelope = Envelope::new(Some(self.local_peer_id.clone()), Some(peer_id.to_string()), None, None, payload);
        if let Err(e) = self.signaling.send(&envelope) {
            tracing::warn!(peer_id = %peer_id, "failed to send answer: {e}");
        }
    }

    pub fn join(&self) {
        let payload = SignalPayload::Join {
            user_id: self.local_user_id.clone(),
            peer_id: self.local_peer_id.clone(),
            addresses: Vec::new(),
            public_key: None,
        };
        let envelope = Envelope::new(Some(self.local_peer_id.clone()), None, None, None, payload);
        if let Err(e) = self.signaling.send(&envelope) {
            tracing::warn!("failed to send join envelope: {e}");
        }
    }
}
