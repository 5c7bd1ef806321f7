use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "concord-client", about = "Headless reference client for the Concord voice plane")]
pub struct Config {
    /// Signalling WebSocket URL.
    #[arg(long, default_value = "ws://127.0.0.1:7880")]
    pub server: String,

    /// HTTP base URL for /voice/ice-config.
    #[arg(long, default_value = "http://127.0.0.1:7881")]
    pub http_server: String,

    /// Bearer credential presented at the signalling handshake.
    #[arg(long, env = "CONCORD_DEV_TOKEN", default_value = "dev")]
    pub dev_token: String,

    #[arg(long, default_value = "default")]
    pub server_id: String,

    #[arg(long)]
    pub channel_id: String,

    /// Display name shown to other users.
    #[arg(long, default_value = "User")]
    pub display_name: String,

    /// User id presented to the gateway and other peers.
    #[arg(long, default_value = "user")]
    pub user_id: String,

    /// Prometheus scrape listener for this client's own voice-plane metrics.
    #[arg(long, default_value = "0.0.0.0:9101")]
    pub metrics_listen: String,

    /// Enable push-to-talk; without it the mic is gated by VAD only.
    #[arg(long, default_value_t = false)]
    pub push_to_talk: bool,

    /// Disable RNNoise noise suppression on the capture path.
    #[arg(long)]
    pub no_noise_suppression: bool,

    /// Disable automatic gain control on the capture path.
    #[arg(long)]
    pub no_agc: bool,

    /// VAD threshold (0.0 = very sensitive, 1.0 = very strict).
    #[arg(long, default_value_t = 0.5)]
    pub vad_threshold: f32,

    /// Enable the optional STT -> translate -> TTS pipeline.
    #[arg(long, default_value_t = false)]
    pub translate: bool,

    #[arg(long, default_value = "en")]
    pub translate_src_lang: String,

    #[arg(long, default_value = "en")]
    pub translate_tgt_lang: String,

    #[arg(long, env = "CONCORD_STT_URL", default_value = "")]
    pub stt_url: String,
    #[arg(long, env = "CONCORD_STT_API_KEY", default_value = "")]
    pub stt_api_key: String,
    #[arg(long, default_value = "whisper-1")]
    pub stt_model: String,

    #[arg(long, env = "CONCORD_TRANSLATE_URL", default_value = "")]
    pub translate_url: String,
    #[arg(long, env = "CONCORD_TRANSLATE_API_KEY", default_value = "")]
    pub translate_api_key: String,

    #[arg(long, env = "CONCORD_TTS_URL", default_value = "")]
    pub tts_url: String,
    #[arg(long, env = "CONCORD_TTS_API_KEY", default_value = "")]
    pub tts_api_key: String,
    #[arg(long, default_value = "alloy")]
    pub tts_voice: String,
    #[arg(long, default_value = "opus")]
    pub tts_format: String,
}

impl Config {
    pub fn external_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
}
