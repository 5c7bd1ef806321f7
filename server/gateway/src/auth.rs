//! Bearer-credential verification for the signalling WebSocket.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::GatewayError;

#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: String,
}

pub trait BearerAuth: Send + Sync {
    fn authenticate(&self, bearer: Option<&str>) -> Result<AuthedUser, GatewayError>;
}

/// Accepts exactly one configured token; every caller is "dev-user". For
/// local development and the reference client's `--dev-token` flag.
pub struct DevBearerAuth {
    token: String,
}

impl DevBearerAuth {
    pub fn new(token: String) -> Self {
        Self { token }
    }
}

impl BearerAuth for DevBearerAuth {
    fn authenticate(&self, bearer: Option<&str>) -> Result<AuthedUser, GatewayError> {
        match bearer {
            Some(t) if t == self.token => Ok(AuthedUser { user_id: "dev-user".to_string() }),
            _ => Err(GatewayError::Unauthorized),
        }
    }
}

/// Verifies tokens of the form `"{user_id}.{hex_hmac_sha256(secret, user_id)}"`,
/// the same shared-secret HMAC shape `concord_voice::ice` uses for TURN
/// credentials, so a single secret can mint both.
pub struct SharedSecretBearerAuth {
    secret: String,
}

impl SharedSecretBearerAuth {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }
}

impl BearerAuth for SharedSecretBearerAuth {
    fn authenticate(&self, bearer: Option<&str>) -> Result<AuthedUser, GatewayError> {
        let token = bearer.ok_or(GatewayError::Unauthorized)?;
        let (user_id, sig_hex) = token.rsplit_once('.').ok_or(GatewayError::Unauthorized)?;

        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes()).map_err(|_| GatewayError::Unauthorized)?;
        mac.update(user_id.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        if expected == sig_hex {
            Ok(AuthedUser { user_id: user_id.to_string() })
        } else {
            Err(GatewayError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_auth_accepts_only_the_configured_token() {
        let auth = DevBearerAuth::new("dev".to_string());
        assert!(auth.authenticate(Some("dev")).is_ok());
        assert!(auth.authenticate(Some("wrong")).is_err());
        assert!(auth.authenticate(None).is_err());
    }

    #[test]
    fn shared_secret_auth_round_trips_a_minted_token() {
        let auth = SharedSecretBearerAuth::new("topsecret".to_string());
        let mut mac = Hmac::<Sha256>::new_from_slice(b"topsecret").unwrap();
        mac.update(b"user-42");
        let sig = hex::encode(mac.finalize().into_bytes());
        let token = format!("user-42.{sig}");

        let user = auth.authenticate(Some(&token)).unwrap();
        assert_eq!(user.user_id, "user-42");
    }

    #[test]
    fn shared_secret_auth_rejects_tampered_signature() {
        let auth = SharedSecretBearerAuth::new("topsecret".to_string());
        assert!(auth.authenticate(Some("user-42.deadbeef")).is_err());
    }
}
