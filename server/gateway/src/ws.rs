//! WebSocket connection handling. Grounded on
//! `concord_voice::signaling::client`'s split: one task owns the write half
//! and serialises every outbound frame, one task owns the read half and
//! dispatches by envelope kind — mirrored here server-side, per connection.

use std::sync::Arc;

use concord_metrics::gateway::GatewayMetrics;
use concord_voice::signaling::PeerListEntry;
use concord_voice::{Envelope, SignalPayload};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

use crate::auth::BearerAuth;
use crate::state::{GatewayState, PeerHandle};

struct HandshakeInfo {
    bearer: Option<String>,
    server_id: Option<String>,
    channel_id: Option<String>,
}

fn parse_query(query: &str) -> std::collections::HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn extract_handshake_info(request: &Request) -> HandshakeInfo {
    let bearer = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let params = request.uri().query().map(parse_query).unwrap_or_default();
    HandshakeInfo {
        bearer,
        server_id: params.get("server_id").cloned(),
        channel_id: params.get("channel_id").cloned(),
    }
}

/// Accepts one raw TCP connection, verifies the bearer credential during
/// the handshake, then runs the signalling loop until the peer leaves or
/// the socket drops.
pub async fn handle_connection(
    stream: TcpStream,
    state: Arc<GatewayState>,
    auth: Arc<dyn BearerAuth>,
    metrics: Arc<GatewayMetrics>,
) {
    metrics.conn_accepted();

    let mut info: Option<HandshakeInfo> = None;
    let callback = |request: &Request, response: Response| {
        info = Some(extract_handshake_info(request));
        Ok(response)
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!("websocket handshake failed: {e}");
            return;
        }
    };

    let Some(info) = info else {
        metrics.conn_closed();
        return;
    };

    let authed = match auth.authenticate(info.bearer.as_deref()) {
        Ok(u) => u,
        Err(_) => {
            metrics.auth_failed();
            metrics.conn_closed();
            return;
        }
    };
    metrics.auth_success();

    let Some(server_id) = info.server_id else {
        metrics.conn_closed();
        return;
    };
    let Some(channel_id) = info.channel_id else {
        metrics.conn_closed();
        return;
    };

    run_session(ws_stream, state.clone(), metrics.clone(), authed.user_id, server_id, channel_id).await;
    metrics.conn_closed();
}

async fn run_session(
    ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    state: Arc<GatewayState>,
    metrics: Arc<GatewayMetrics>,
    user_id: String,
    server_id: String,
    channel_id: String,
) {
    let (mut write, mut read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut peer_id: Option<String> = None;
    let room = state.room(&server_id, &channel_id);

    while let Some(frame) = read.next().await {
        let text = match frame {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(_) => break,
        };

        let envelope = match Envelope::decode(&text) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!("dropping malformed envelope from {user_id}: {e}");
                continue;
            }
        };
        metrics.envelope_rx(envelope.kind());

        match envelope.payload {
            SignalPayload::Join { peer_id: pid, addresses, public_key, .. } => {
                let peer_list: Vec<PeerListEntry> = room
                    .peer_ids()
                    .into_iter()
                    .filter_map(|existing_id| room.get(&existing_id).map(|h| PeerListEntry {
                        user_id: h.user_id.clone(),
                        peer_id: existing_id,
                        addresses: h.addresses.clone(),
                        public_key: h.public_key.clone(),
                    }))
                    .collect();

                room.insert(
                    pid.clone(),
                    PeerHandle { user_id: user_id.clone(), addresses, public_key, tx: out_tx.clone() },
                );
                peer_id = Some(pid.clone());

                send_to(&out_tx, &metrics, Envelope::new(None, None, Some(server_id.clone()), Some(channel_id.clone()), SignalPayload::PeerList { peers: peer_list }));

                broadcast_except(&room, &metrics, &pid, Envelope::new(
                    Some(pid.clone()),
                    None,
                    Some(server_id.clone()),
                    Some(channel_id.clone()),
                    SignalPayload::PeerJoined { user_id: user_id.clone(), peer_id: pid.clone() },
                ));
            }
            SignalPayload::Offer { .. } | SignalPayload::Answer { .. } | SignalPayload::IceCandidate { .. } => {
                let Some(to) = envelope.to.clone() else { continue };
                if let Some(target) = room.get(&to) {
                    let forwarded = Envelope::new(envelope.from.clone(), Some(to), Some(server_id.clone()), Some(channel_id.clone()), envelope.payload);
                    send_to(&target.tx, &metrics, forwarded);
                }
            }
            SignalPayload::Leave => break,
            _ => tracing::debug!(kind = envelope.kind(), "ignoring client-to-server envelope of this kind"),
        }
    }

    if let Some(pid) = peer_id {
        room.remove(&pid);
        broadcast_except(&room, &metrics, &pid, Envelope::new(
            Some(pid.clone()),
            None,
            Some(server_id.clone()),
            Some(channel_id.clone()),
            SignalPayload::PeerLeft { user_id, peer_id: pid.clone() },
        ));
        state.prune_if_empty(&server_id, &channel_id);
    }
}

fn send_to(tx: &mpsc::UnboundedSender<Message>, metrics: &GatewayMetrics, envelope: Envelope) {
    if let Ok(encoded) = envelope.encode() {
        metrics.envelope_tx(envelope.kind());
        let _ = tx.send(Message::Text(encoded));
    }
}

fn broadcast_except(room: &crate::state::Room, metrics: &GatewayMetrics, except_peer_id: &str, envelope: Envelope) {
    for id in room.peer_ids() {
        if id == except_peer_id {
            continue;
        }
        if let Some(handle) = room.get(&id) {
            send_to(&handle.tx, metrics, envelope.clone());
        }
    }
}
