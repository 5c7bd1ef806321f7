//! Time-boxed TURN credential minting and ICE server list construction.
//! The HMAC-SHA1 shared-secret scheme is the same one the gateway's
//! signalling surface hands out over `GET /voice/ice-config`.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;

use crate::error::VoiceResult;

const DEFAULT_TTL_SECS: u64 = 12 * 60 * 60;
const MIN_TTL_SECS: u64 = 5 * 60;
const OPEN_RELAY_FALLBACK: &str = "turn:openrelay.metered.ca:80";
const OPEN_RELAY_USERNAME: &str = "openrelayproject";
const OPEN_RELAY_CREDENTIAL: &str = "openrelayproject";

/// Wire-compatible with `GET /voice/ice-config`'s JSON body, so the client
/// can deserialize the gateway's response straight into this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerEntry {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    pub servers: Vec<IceServerEntry>,
    pub ttl_seconds: u64,
    pub expires_at: u64,
}

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub host: String,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub tls_port: u16,
    pub shared_secret: String,
    pub ttl_seconds: u64,
    pub stun_servers: Vec<String>,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            udp_port: 3478,
            tcp_port: 3478,
            tls_port: 5349,
            shared_secret: String::new(),
            ttl_seconds: DEFAULT_TTL_SECS,
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
        }
    }
}

/// Replace `:` with `_`; empty input maps to `"anonymous"`.
fn sanitize_user_id(user_id: &str) -> String {
    if user_id.is_empty() {
        "anonymous".to_string()
    } else {
        user_id.replace(':', "_")
    }
}

fn hmac_credential(secret: &str, username: &str) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(username.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// `build_config(user_id, request_host, now_unix) -> IceConfig`.
/// `now_unix` is threaded in explicitly rather than read from the system
/// clock so callers can get deterministic output (scenario G).
pub fn build_config(settings: &TurnSettings, user_id: &str, request_host: &str, now_unix: u64) -> VoiceResult<IceConfig> {
    let ttl = settings.ttl_seconds.max(MIN_TTL_SECS);
    let expires_at = now_unix + ttl;

    let mut servers: Vec<IceServerEntry> = settings
        .stun_servers
        .iter()
        .map(|url| IceServerEntry { urls: vec![url.clone()], username: None, credential: None })
        .collect();

    if settings.shared_secret.is_empty() {
        return Ok(IceConfig { servers, ttl_seconds: ttl, expires_at });
    }

    let host = if !settings.host.is_empty() {
        settings.host.as_str()
    } else if !request_host.is_empty() {
        request_host
    } else {
        return Ok(IceConfig { servers, ttl_seconds: ttl, expires_at });
    };

    let username = format!("{expires_at}:{}", sanitize_user_id(user_id));
    let credential = hmac_credential(&settings.shared_secret, &username);

    servers.push(IceServerEntry {
        urls: vec![format!("turn:{host}:{}?transport=udp", settings.udp_port)],
        username: Some(username.clone()),
        credential: Some(credential.clone()),
    });
    servers.push(IceServerEntry {
        urls: vec![format!("turns:{host}:{}?transport=tcp", settings.tls_port)],
        username: Some(username.clone()),
        credential: Some(credential.clone()),
    });
    servers.push(IceServerEntry {
        urls: vec![OPEN_RELAY_FALLBACK.to_string()],
        username: Some(OPEN_RELAY_USERNAME.to_string()),
        credential: Some(OPEN_RELAY_CREDENTIAL.to_string()),
    });

    Ok(IceConfig { servers, ttl_seconds: ttl, expires_at })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_secret_yields_stun_only() {
        let settings = TurnSettings { shared_secret: String::new(), ..Default::default() };
        let cfg = build_config(&settings, "user:42", "example.com", 1_000).unwrap();
        assert_eq!(cfg.servers.len(), 2);
        assert!(cfg.servers.iter().all(|s| s.username.is_none()));
    }

    #[test]
    fn deterministic_credential_matches_scenario_g() {
        let settings = TurnSettings {
            host: "turn.example.com".to_string(),
            shared_secret: "my-secret".to_string(),
            ttl_seconds: 600,
            stun_servers: vec![],
            ..Default::default()
        };
        let cfg = build_config(&settings, "user:42", "ignored-host", 0).unwrap();
        let turn = cfg.servers.iter().find(|s| s.urls[0].starts_with("turn:")).unwrap();
        let username = turn.username.as_deref().unwrap();
        assert_eq!(username, "600:user_42");
        let expected = hmac_credential("my-secret", username);
        assert_eq!(turn.credential.as_deref().unwrap(), expected);
    }

    #[test]
    fn falls_back_to_request_host_when_configured_host_empty() {
        let settings = TurnSettings { host: String::new(), shared_secret: "s".to_string(), stun_servers: vec![], ..Default::default() };
        let cfg = build_config(&settings, "u", "req-host.example", 10).unwrap();
        let turn = cfg.servers.iter().find(|s| s.urls[0].starts_with("turn:")).unwrap();
        assert!(turn.urls[0].contains("req-host.example"));
    }

    #[test]
    fn sanitize_maps_empty_to_anonymous_and_strips_colons() {
        assert_eq!(sanitize_user_id(""), "anonymous");
        assert_eq!(sanitize_user_id("a:b:c"), "a_b_c");
    }

    #[test]
    fn ttl_is_floored_at_minimum() {
        let settings = TurnSettings { ttl_seconds: 1, shared_secret: String::new(), stun_servers: vec![], ..Default::default() };
        let cfg = build_config(&settings, "u", "h", 0).unwrap();
        assert_eq!(cfg.ttl_seconds, MIN_TTL_SECS);
    }

    #[test]
    fn open_relay_fallback_is_always_present_when_turn_configured() {
        let settings = TurnSettings { host: "h".to_string(), shared_secret: "s".to_string(), stun_servers: vec![], ..Default::default() };
        let cfg = build_config(&settings, "u", "h", 0).unwrap();
        assert!(cfg.servers.iter().any(|s| s.urls[0].contains("openrelay")));
    }
}
