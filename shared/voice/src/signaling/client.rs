//! WebSocket signalling client: one task owns the write half and serialises
//! every outbound frame, one task owns the read half and fans decoded
//! envelopes out to registered per-type handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{VoiceError, VoiceResult};
use crate::metrics_hooks::{self, VoiceMetrics};
use crate::signaling::envelope::Envelope;

const WRITE_DEADLINE: Duration = Duration::from_secs(5);
const RECONNECT_BACKOFFS_SECS: &[u64] = &[1, 2, 4, 8, 16, 30];
const MAX_RECONNECT_ATTEMPTS: usize = 6;
const RECONNECT_POLL_INTERVAL: Duration = Duration::from_millis(200);

type Handler = mpsc::UnboundedSender<Envelope>;

struct Shared {
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    handlers: Mutex<HashMap<String, Handler>>,
    last_join: Mutex<Option<Envelope>>,
    connected: AtomicBool,
    reconnect_exhausted: mpsc::UnboundedSender<()>,
    metrics: Mutex<Arc<dyn VoiceMetrics>>,
}

/// One WebSocket signalling connection, with automatic reconnect.
pub struct SignalingClient {
    shared: Arc<Shared>,
    reconnect_exhausted_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
}

impl SignalingClient {
    pub fn new() -> Self {
        let (exhausted_tx, exhausted_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                outbound: Mutex::new(None),
                handlers: Mutex::new(HashMap::new()),
                last_join: Mutex::new(None),
                connected: AtomicBool::new(false),
                reconnect_exhausted: exhausted_tx,
                metrics: Mutex::new(metrics_hooks::noop()),
            }),
            reconnect_exhausted_rx: Mutex::new(Some(exhausted_rx)),
        }
    }

    pub fn set_metrics(&self, metrics: Arc<dyn VoiceMetrics>) {
        *self.shared.metrics.lock() = metrics;
    }

    /// Takes the reconnect-exhaustion notification channel. Fires once the
    /// reconnect loop gives up after `MAX_RECONNECT_ATTEMPTS`, so whoever
    /// holds this can tear the session down. Only one consumer may hold it;
    /// later callers get `None`.
    pub fn take_reconnect_exhausted(&self) -> Option<mpsc::UnboundedReceiver<()>> {
        self.reconnect_exhausted_rx.lock().take()
    }

    /// Registers a dispatcher for envelopes whose `type` equals `kind`.
    /// Unknown types received off the wire are logged and dropped, never
    /// routed here.
    pub fn on(&self, kind: &str, handler: mpsc::UnboundedSender<Envelope>) {
        self.shared.handlers.lock().insert(kind.to_string(), handler);
    }

    pub async fn connect(&self, url: &str, bearer_token: Option<&str>) -> VoiceResult<()> {
        establish(&self.shared, url, bearer_token).await?;
        let shared = Arc::clone(&self.shared);
        let url = url.to_string();
        let bearer_token = bearer_token.map(str::to_string);
        tokio::spawn(async move { reconnect_loop(shared, url, bearer_token).await });
        Ok(())
    }

    pub fn send(&self, envelope: &Envelope) -> VoiceResult<()> {
        if envelope.kind() == "join" {
            *self.shared.last_join.lock() = Some(envelope.clone());
        }
        let encoded = envelope.encode().map_err(|e| VoiceError::Internal(format!("encode envelope: {e}")))?;
        let guard = self.shared.outbound.lock();
        let Some(tx) = guard.as_ref() else { return Err(VoiceError::NotConnected) };
        tx.send(Message::Text(encoded)).map_err(|_| VoiceError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Default for SignalingClient {
    fn default() -> Self {
        Self::new()
    }
}

fn build_request(url: &str, bearer_token: Option<&str>) -> VoiceResult<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| VoiceError::InvalidArgument("invalid signalling url").logged(e))?;
    if let Some(token) = bearer_token {
        let value = format!("Bearer {token}")
            .parse()
            .map_err(|_| VoiceError::InvalidArgument("invalid bearer token"))?;
        request.headers_mut().insert("Authorization", value);
    }
    Ok(request)
}

/// Dial once, install the write/read tasks, and flip `connected`. Shared by
/// the initial `connect()` and every reconnect attempt.
async fn establish(shared: &Arc<Shared>, url: &str, bearer_token: Option<&str>) -> VoiceResult<()> {
    let request = build_request(url, bearer_token)?;
    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| VoiceError::TransportClosed.logged(e))?;
    let (mut write, mut read) = ws_stream.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    *shared.outbound.lock() = Some(out_tx.clone());
    shared.connected.store(true, Ordering::SeqCst);

    if let Some(join) = shared.last_join.lock().clone() {
        if let Ok(encoded) = join.encode() {
            let _ = out_tx.send(Message::Text(encoded));
        }
    }

    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if tokio::time::timeout(WRITE_DEADLINE, write.send(msg)).await.is_err() {
                tracing::warn!("signalling write deadline exceeded");
                break;
            }
        }
    });

    let shared_reader = Arc::clone(shared);
    tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => dispatch(&shared_reader, &text),
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        shared_reader.connected.store(false, Ordering::SeqCst);
        *shared_reader.outbound.lock() = None;
    });

    Ok(())
}

fn dispatch(shared: &Arc<Shared>, raw: &str) {
    let envelope = match Envelope::decode(raw) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("dropping malformed signalling envelope: {e}");
            return;
        }
    };
    let handlers = shared.handlers.lock();
    match handlers.get(envelope.kind()) {
        Some(handler) => {
            let _ = handler.send(envelope);
        }
        None => tracing::debug!(kind = envelope.kind(), "no handler registered, dropping envelope"),
    }
}

/// Watches for the socket dropping and reconnects with exponential backoff,
/// re-issuing the last `join` envelope once the new socket is up. Gives up
/// after `MAX_RECONNECT_ATTEMPTS`; media on already-established peer
/// sessions is unaffected either way (signalling is not on the media path).
async fn reconnect_loop(shared: Arc<Shared>, url: String, bearer_token: Option<String>) {
    loop {
        tokio::time::sleep(RECONNECT_POLL_INTERVAL).await;
        if shared.connected.load(Ordering::SeqCst) {
            continue;
        }

        let mut attempt = 0;
        loop {
            if attempt >= MAX_RECONNECT_ATTEMPTS {
                tracing::warn!("signalling reconnect budget exhausted");
                let _ = shared.reconnect_exhausted.send(());
                return;
            }
            let backoff = RECONNECT_BACKOFFS_SECS[attempt.min(RECONNECT_BACKOFFS_SECS.len() - 1)];
            tokio::time::sleep(Duration::from_secs(backoff)).await;

            shared.metrics.lock().signaling_reconnect_attempt();
            match establish(&shared, &url, bearer_token.as_deref()).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!("signalling reconnect attempt {attempt} failed: {e}");
                    attempt += 1;
                }
            }
        }
    }
}

trait Logged<E> {
    fn logged(self, err: E) -> Self;
}

impl<E: std::fmt::Display> Logged<E> for VoiceError {
    fn logged(self, err: E) -> Self {
        tracing::debug!("{self}: {err}");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::envelope::SignalPayload;

    #[test]
    fn send_without_connection_fails_not_connected() {
        let client = SignalingClient::new();
        let envelope = Envelope::new(None, None, None, None, SignalPayload::Leave);
        assert!(matches!(client.send(&envelope), Err(VoiceError::NotConnected)));
    }

    #[test]
    fn is_connected_false_before_connect() {
        let client = SignalingClient::new();
        assert!(!client.is_connected());
    }

    #[test]
    fn reconnect_exhausted_channel_is_single_consumer() {
        let client = SignalingClient::new();
        assert!(client.take_reconnect_exhausted().is_some());
        assert!(client.take_reconnect_exhausted().is_none());
    }
}
