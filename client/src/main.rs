//! Headless reference client for the voice plane: joins a channel over the
//! signalling WebSocket, meshes up with every other participant via
//! `Orchestrator`, and pumps real audio hardware through the capture/playout
//! DSP chain. No UI: control is CLI flags only, matching the non-goal on UI
//! rendering.

mod audio;
mod config;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use concord_metrics::voice::PrometheusVoiceMetrics;
use concord_metrics::{MetricsConfig, MetricsServer};
use concord_voice::ice::IceConfig;
use concord_voice::metrics_hooks::VoiceMetrics;
use concord_voice::opus_codec::OpusCodec;
use concord_voice::pcm::{f32_to_i16, i16_to_f32, CHANNELS, FRAME_MS, FRAME_SAMPLES, SAMPLE_RATE};
use concord_voice::translator::http_clients::{HttpClients, SttConfig, TranslateConfig, TtsConfig};
use concord_voice::translator::Translator;
use concord_voice::{Engine, Mixer, Orchestrator, SignalingClient};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use audio::capture::Capture;
use audio::dsp::{vad::VadHysteresis, CaptureDsp, PlayoutDsp};
use audio::playout::Playout;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())).init();

    let cfg = Config::parse();
    let ice_config = fetch_ice_config(&cfg).await.context("fetching ice config")?;

    let voice_metrics = PrometheusVoiceMetrics::new("concord");
    let metrics_server = MetricsServer::install(MetricsConfig { listen: cfg.metrics_listen.clone(), namespace: "concord" })?;
    tokio::spawn(async move {
        let _ = metrics_server.serve().await;
    });

    let (engine, mut engine_events) = Engine::new_with_metrics(Arc::clone(&voice_metrics));
    tokio::spawn(async move { while engine_events.recv().await.is_some() {} });
    let peer_id = engine.join(&cfg.channel_id, &cfg.user_id, &cfg.display_name)?;
    info!(peer_id = %peer_id, channel_id = %cfg.channel_id, "joined channel locally");

    let signaling = Arc::new(SignalingClient::new());

    let (playback_tx, playback_rx) = mpsc::unbounded_channel::<(String, Vec<i16>)>();
    let mut orchestrator_builder =
        Orchestrator::new(Arc::clone(&engine), Arc::clone(&signaling), ice_config, peer_id.clone(), cfg.user_id.clone())
            .with_playback_sink(playback_tx)
            .with_metrics(Arc::clone(&voice_metrics));

    if cfg.translate {
        let translator = build_translator(&cfg, Arc::clone(&voice_metrics));
        orchestrator_builder = orchestrator_builder.with_translator(translator);
    }
    let orchestrator = Arc::new(orchestrator_builder);
    orchestrator.start();

    let ws_url = format!("{}/?server_id={}&channel_id={}", cfg.server, cfg.server_id, cfg.channel_id);
    signaling.connect(&ws_url, Some(&cfg.dev_token)).await.context("connecting signalling socket")?;
    orchestrator.join();

    let capture_handle = spawn_capture_loop(&cfg, Arc::clone(&engine), peer_id.clone())?;
    let playout_handle = spawn_playout_loop(playback_rx, Arc::clone(&engine))?;

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    capture_handle.abort();
    playout_handle.abort();
    engine.leave().await;
    Ok(())
}

async fn fetch_ice_config(cfg: &Config) -> Result<IceConfig> {
    let url = format!("{}/voice/ice-config?user={}", cfg.http_server, cfg.user_id);
    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .bearer_auth(&cfg.dev_token)
        .timeout(cfg.external_timeout())
        .send()
        .await
        .context("ice-config request")?;
    response.json::<IceConfig>().await.context("decoding ice-config response")
}

fn build_translator(cfg: &Config, metrics: Arc<dyn VoiceMetrics>) -> Arc<Translator> {
    let stt = SttConfig { url: cfg.stt_url.clone(), api_key: cfg.stt_api_key.clone(), model: cfg.stt_model.clone(), timeout: cfg.external_timeout() };
    let translate = TranslateConfig { url: cfg.translate_url.clone(), api_key: cfg.translate_api_key.clone(), timeout: cfg.external_timeout() };
    let tts = TtsConfig {
        url: cfg.tts_url.clone(),
        api_key: cfg.tts_api_key.clone(),
        voice: cfg.tts_voice.clone(),
        format: cfg.tts_format.clone(),
        timeout: cfg.external_timeout(),
    };
    let backend = Arc::new(HttpClients::new(stt, translate, tts));
    let (translator, mut events) = Translator::new_with_metrics(backend, std::time::Duration::from_secs(4), metrics);
    translator.enable(&cfg.translate_src_lang, &cfg.translate_tgt_lang);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(peer_id = %event.peer_id, bytes = event.audio.len(), format = %event.format, "translated audio ready");
        }
    });
    translator
}

/// Mic → AGC/denoise → VAD gate → Opus encode → broadcast to every connected
/// peer. Push-to-talk has no key-hold input
/// surface in a headless client, so it degrades to "always send while
/// unmuted" rather than gating on a held key.
fn spawn_capture_loop(cfg: &Config, engine: Arc<Engine>, local_peer_id: String) -> Result<tokio::task::JoinHandle<()>> {
    let capture = Capture::start(SAMPLE_RATE, CHANNELS as u16, FRAME_MS)?;
    let mut dsp = CaptureDsp::new(SAMPLE_RATE)?;
    dsp.set_vad_threshold(cfg.vad_threshold);
    let noise_suppression = !cfg.no_noise_suppression;
    let agc_enabled = !cfg.no_agc;
    let push_to_talk = cfg.push_to_talk;
    let vad_threshold = cfg.vad_threshold;

    let handle = tokio::spawn(async move {
        let mut hysteresis = VadHysteresis::new(vad_threshold, (vad_threshold * 0.6).max(0.05), 5);
        let mut codec = match OpusCodec::new() {
            Ok(c) => c,
            Err(e) => {
                warn!("failed to build opus encoder: {e}");
                return;
            }
        };
        let mut pcm = vec![0i16; FRAME_SAMPLES];
        let mut opus_buf = vec![0u8; 4000];
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(FRAME_MS as u64));
        loop {
            ticker.tick().await;
            let status = engine.get_status();
            if status.muted {
                continue;
            }
            if !capture.read_frame(&mut pcm) {
                continue;
            }

            let active = if noise_suppression || agc_enabled {
                let mut probability = 0.0f32;
                for chunk in pcm.chunks_mut(480) {
                    probability = dsp.process_frame(chunk).max(probability);
                }
                hysteresis.update(probability)
            } else {
                hysteresis.update(if audio::dsp::vad::energy_vad(&pcm, -40.0) { 1.0 } else { 0.0 })
            };

            if !push_to_talk && !active {
                continue;
            }

            let encoded_len = match codec.encode(&pcm, &mut opus_buf) {
                Ok(n) => n,
                Err(e) => {
                    warn!("opus encode failed: {e}");
                    continue;
                }
            };

            for peer_id in status.speakers.into_iter().map(|s| s.peer_id).filter(|id| id != &local_peer_id) {
                if let Some(session) = engine.peer(&peer_id) {
                    if let Err(e) = session.send_opus_frame(&opus_buf[..encoded_len]).await {
                        warn!(peer_id = %peer_id, "failed to send voice frame: {e}");
                    }
                }
            }
        }
    });
    Ok(handle)
}

/// Drains decoded per-peer PCM into a shared latest-frame table and, on a
/// fixed tick, mixes every live speaker through `Mixer` before handing the
/// combined frame to the speaker. Deafen silences playout only;
/// it never stops decoding (peers still see us as connected).
fn spawn_playout_loop(mut playback_rx: mpsc::UnboundedReceiver<(String, Vec<i16>)>, engine: Arc<Engine>) -> Result<tokio::task::JoinHandle<()>> {
    let playout = Arc::new(Playout::start(SAMPLE_RATE, CHANNELS as u16)?);
    let latest: Arc<Mutex<HashMap<String, Vec<i16>>>> = Arc::new(Mutex::new(HashMap::new()));

    let latest_for_recv = Arc::clone(&latest);
    tokio::spawn(async move {
        while let Some((peer_id, pcm)) = playback_rx.recv().await {
            latest_for_recv.lock().insert(peer_id, pcm);
        }
    });

    let handle = tokio::spawn(async move {
        let mut dsp = PlayoutDsp::new();
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(FRAME_MS as u64));
        loop {
            ticker.tick().await;
            if engine.get_status().deafened {
                continue;
            }
            let frames: Vec<Vec<i16>> = latest.lock().values().cloned().collect();
            if frames.is_empty() {
                continue;
            }
            let mut mixer = Mixer::new();
            for (idx, frame) in frames.iter().enumerate() {
                let id = idx.to_string();
                mixer.add_stream(&id);
                mixer.push_samples(&id, &i16_to_f32(frame));
            }
            let mixed = mixer.mix();
            let mut pcm = f32_to_i16(mixed);
            dsp.process_frame(&mut pcm);
            playout.push_pcm(&pcm);
        }
    });
    Ok(handle)
}
