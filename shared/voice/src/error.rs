use thiserror::Error;

pub type VoiceResult<T> = Result<T, VoiceError>;

/// Abstract error kinds for the voice plane. Each variant maps to
/// exactly one propagation policy; callers match on kind, not on message text.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("not connected")]
    NotConnected,

    #[error("no session")]
    NoSession,

    #[error("signal timed out: {0}")]
    SignalTimeout(&'static str),

    #[error("ice failure: {0}")]
    IceFailure(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("stt failure: {0}")]
    SttFailure(String),

    #[error("translation failure: {0}")]
    TranslationFailure(String),

    #[error("tts failure: {0}")]
    TtsFailure(String),

    #[error("breaker open")]
    BreakerOpen,

    #[error("internal error: {0}")]
    Internal(String),
}
