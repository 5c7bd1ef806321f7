//! Signal envelope wire format: one discriminated union per
//! `type`, one envelope per WebSocket text frame.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerListEntry {
    pub user_id: String,
    pub peer_id: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    Join {
        user_id: String,
        peer_id: String,
        #[serde(default)]
        addresses: Vec<String>,
        #[serde(default)]
        public_key: Option<String>,
    },
    Leave,
    Offer {
        peer_id: String,
        sdp: String,
    },
    Answer {
        peer_id: String,
        sdp: String,
    },
    IceCandidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u16>,
    },
    PeerList {
        peers: Vec<PeerListEntry>,
    },
    PeerJoined {
        user_id: String,
        peer_id: String,
    },
    PeerLeft {
        user_id: String,
        peer_id: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl SignalPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            SignalPayload::Join { .. } => "join",
            SignalPayload::Leave => "leave",
            SignalPayload::Offer { .. } => "offer",
            SignalPayload::Answer { .. } => "answer",
            SignalPayload::IceCandidate { .. } => "ice_candidate",
            SignalPayload::PeerList { .. } => "peer_list",
            SignalPayload::PeerJoined { .. } => "peer_joined",
            SignalPayload::PeerLeft { .. } => "peer_left",
            SignalPayload::Error { .. } => "error",
        }
    }
}

/// Full envelope: `{type, from, to, server_id, channel_id, payload}`. `type`
/// is carried redundantly by the payload's own tag for convenient matching,
/// and duplicated at the top level so a handler can dispatch before decoding
/// the variant-specific fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(flatten)]
    pub payload: SignalPayload,
}

impl Envelope {
    pub fn new(from: Option<String>, to: Option<String>, server_id: Option<String>, channel_id: Option<String>, payload: SignalPayload) -> Self {
        Self { from, to, server_id, channel_id, payload }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.type_name()
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Malformed envelopes are the caller's concern to log and drop; this
    /// only reports the decode failure.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips_for_every_variant() {
        let samples = vec![
            SignalPayload::Join { user_id: "u1".into(), peer_id: "p1".into(), addresses: vec!["1.2.3.4:9".into()], public_key: Some("abc".into()) },
            SignalPayload::Leave,
            SignalPayload::Offer { peer_id: "p2".into(), sdp: "v=0...".into() },
            SignalPayload::Answer { peer_id: "p2".into(), sdp: "v=0...".into() },
            SignalPayload::IceCandidate { candidate: "candidate:1 1 UDP".into(), sdp_mid: Some("0".into()), sdp_m_line_index: Some(0) },
            SignalPayload::PeerList { peers: vec![PeerListEntry { user_id: "u2".into(), peer_id: "p2".into(), addresses: vec![], public_key: None }] },
            SignalPayload::PeerJoined { user_id: "u2".into(), peer_id: "p2".into() },
            SignalPayload::PeerLeft { user_id: "u2".into(), peer_id: "p2".into() },
            SignalPayload::Error { code: "bad_request".into(), message: "nope".into() },
        ];

        for payload in samples {
            let envelope = Envelope::new(Some("p1".into()), Some("p2".into()), Some("srv-1".into()), Some("ch-1".into()), payload);
            let encoded = envelope.encode().unwrap();
            let decoded = Envelope::decode(&encoded).unwrap();
            assert_eq!(decoded.kind(), envelope.kind());
            assert_eq!(decoded.encode().unwrap(), encoded);
        }
    }

    #[test]
    fn malformed_json_is_a_decode_error_not_a_panic() {
        assert!(Envelope::decode("not json").is_err());
        assert!(Envelope::decode(r#"{"type":"offer"}"#).is_err());
    }
}
