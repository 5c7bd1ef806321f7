pub mod client;
pub mod envelope;

pub use client::SignalingClient;
pub use envelope::{Envelope, PeerListEntry, SignalPayload};
