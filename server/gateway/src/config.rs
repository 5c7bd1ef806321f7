use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "concord-gateway", about = "Concord voice-plane signalling gateway")]
pub struct Config {
    /// WebSocket signalling listener.
    #[arg(long, default_value = "0.0.0.0:7880")]
    pub listen: String,

    /// HTTP listener for /voice/ice-config and /voice/participants.
    #[arg(long, default_value = "0.0.0.0:7881")]
    pub http_listen: String,

    /// Prometheus scrape listener.
    #[arg(long, default_value = "0.0.0.0:9100")]
    pub metrics_listen: String,

    /// Dev-mode bearer token; if set, overrides the shared-secret verifier.
    #[arg(long, env = "CONCORD_DEV_TOKEN")]
    pub dev_token: Option<String>,

    /// Shared HMAC secret for bearer verification and TURN credentials.
    #[arg(long, env = "CONCORD_SHARED_SECRET", default_value = "")]
    pub shared_secret: String,

    /// TURN host; empty means STUN-only ICE configs.
    #[arg(long, env = "CONCORD_TURN_HOST", default_value = "")]
    pub turn_host: String,

    #[arg(long, default_value_t = 3478)]
    pub turn_udp_port: u16,

    #[arg(long, default_value_t = 3478)]
    pub turn_tcp_port: u16,

    #[arg(long, default_value_t = 5349)]
    pub turn_tls_port: u16,

    #[arg(long, default_value_t = 12 * 60 * 60)]
    pub turn_ttl_seconds: u64,
}
