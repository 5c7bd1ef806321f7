//! The real-time voice plane: NAT-traversing encrypted P2P mesh, Opus/RTP
//! media, jitter buffering, VAD, and the optional speech-to-text ->
//! translate -> text-to-speech pipeline.
//!
//! Everything outside this crate (authentication beyond bearer-credential
//! verification, chat persistence, server/channel CRUD, UI rendering) is an
//! external collaborator this crate never reaches into.

pub mod engine;
pub mod error;
pub mod ice;
pub mod jitter;
pub mod metrics_hooks;
pub mod mixer;
pub mod opus_codec;
pub mod orchestrator;
pub mod pcm;
pub mod peer;
pub mod signaling;
pub mod translator;
pub mod vad;

pub use engine::{Engine, EngineEvent, EngineState, StatusSnapshot};
pub use error::{VoiceError, VoiceResult};
pub use ice::{build_config, IceConfig, TurnSettings};
pub use jitter::JitterBuffer;
pub use mixer::Mixer;
pub use opus_codec::OpusCodec;
pub use orchestrator::Orchestrator;
pub use peer::{PeerEvent, PeerSession, QualityLabel};
pub use signaling::{Envelope, SignalPayload, SignalingClient};
pub use translator::{Translator, TranslatorStatus};
pub use vad::VadContext;
