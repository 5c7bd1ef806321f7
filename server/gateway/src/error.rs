use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Abstract error kinds for the signalling gateway, mirroring the one-enum-
/// per-crate-boundary shape `concord_voice::VoiceError` uses.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("room not found")]
    RoomNotFound,

    #[error("peer not found: {0}")]
    PeerNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Unauthorized => 401,
            GatewayError::BadRequest(_) => 400,
            GatewayError::RoomNotFound | GatewayError::PeerNotFound(_) => 404,
            GatewayError::Internal(_) => 500,
        }
    }
}
