//! Signalling room registry: `(server_id, channel_id) -> map<peer_id, conn>`.
//! One registry per concern, each guarded by its own lock, readers getting
//! owned snapshots rather than holding a lock across a send.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone)]
pub struct PeerHandle {
    pub user_id: String,
    pub addresses: Vec<String>,
    pub public_key: Option<String>,
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Spectator-facing view of one participant.
/// `muted`/`deafened`/`screen_sharing` are not carried by any signalling
/// envelope (those are local `Engine` state) so this registry
/// can only report what it actually observes: identity and reachability.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ParticipantView {
    pub peer_id: String,
    pub user_id: String,
    pub muted: bool,
    pub deafened: bool,
    pub screen_sharing: bool,
}

#[derive(Default)]
pub struct Room {
    peers: DashMap<String, PeerHandle>,
}

impl Room {
    pub fn insert(&self, peer_id: String, handle: PeerHandle) {
        self.peers.insert(peer_id, handle);
    }

    pub fn remove(&self, peer_id: &str) -> Option<PeerHandle> {
        self.peers.remove(peer_id).map(|(_, h)| h)
    }

    pub fn get(&self, peer_id: &str) -> Option<PeerHandle> {
        self.peers.get(peer_id).map(|e| e.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Owned snapshot; never holds the map lock while a handler sends.
    pub fn peer_ids(&self) -> Vec<String> {
        self.peers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn participants(&self) -> Vec<ParticipantView> {
        self.peers
            .iter()
            .map(|e| ParticipantView {
                peer_id: e.key().clone(),
                user_id: e.value().user_id.clone(),
                muted: false,
                deafened: false,
                screen_sharing: false,
            })
            .collect()
    }
}

type RoomKey = (String, String);

#[derive(Default)]
pub struct GatewayState {
    rooms: DashMap<RoomKey, Arc<Room>>,
}

impl GatewayState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room(&self, server_id: &str, channel_id: &str) -> Arc<Room> {
        self.rooms
            .entry((server_id.to_string(), channel_id.to_string()))
            .or_insert_with(|| Arc::new(Room::default()))
            .clone()
    }

    pub fn find_room(&self, server_id: &str, channel_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(&(server_id.to_string(), channel_id.to_string())).map(|e| e.clone())
    }

    /// Drops the room entry once its last peer leaves, so the registry does
    /// not grow unboundedly across the lifetime of a long-running gateway.
    pub fn prune_if_empty(&self, server_id: &str, channel_id: &str) {
        let key = (server_id.to_string(), channel_id.to_string());
        if let Some(room) = self.rooms.get(&key) {
            if room.is_empty() {
                drop(room);
                self.rooms.remove(&key);
            }
        }
    }

    pub fn participants(&self, server_id: &str, channel_id: &str) -> Vec<ParticipantView> {
        self.find_room(server_id, channel_id).map(|r| r.participants()).unwrap_or_default()
    }
}
