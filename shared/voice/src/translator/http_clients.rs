//! Thin reqwest wrappers over the three external services in the translation
//! pipeline.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{VoiceError, VoiceResult};

/// Seam between the translation pipeline and its three external
/// dependencies, so tests can substitute a fake without a live HTTP server —
/// the same trait-injection shape the voice plane uses for metrics.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    async fn speech_to_text(&self, container: Vec<u8>, language: &str) -> VoiceResult<String>;
    async fn translate_text(&self, text: &str, src: &str, tgt: &str) -> VoiceResult<String>;
    async fn text_to_speech(&self, text: &str) -> VoiceResult<Vec<u8>>;
    fn tts_format(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct SttConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TranslateConfig {
    pub url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub url: String,
    pub api_key: String,
    pub voice: String,
    pub format: String,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct SttResponse {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    source_language: &'a str,
    target_language: &'a str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(default)]
    translated_text: String,
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    voice: &'a str,
    format: &'a str,
}

pub struct HttpClients {
    http: reqwest::Client,
    stt: SttConfig,
    translate: TranslateConfig,
    tts: TtsConfig,
}

impl HttpClients {
    pub fn new(stt: SttConfig, translate: TranslateConfig, tts: TtsConfig) -> Self {
        Self { http: reqwest::Client::new(), stt, translate, tts }
    }
}

#[async_trait]
impl TranslationBackend for HttpClients {
    /// `container` is the packaged Opus segment; empty
    /// or whitespace transcripts are the caller's signal for "silence".
    async fn speech_to_text(&self, container: Vec<u8>, language: &str) -> VoiceResult<String> {
        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(container).file_name("segment.ogg"))
            .text("model", self.stt.model.clone())
            .text("language", language.to_string())
            .text("response_format", "json");

        let response = self
            .http
            .post(&self.stt.url)
            .bearer_auth(&self.stt.api_key)
            .timeout(self.stt.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::SttFailure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VoiceError::SttFailure(format!("http {}", response.status())));
        }
        let parsed: SttResponse = response.json().await.map_err(|e| VoiceError::SttFailure(e.to_string()))?;
        Ok(parsed.text)
    }

    async fn translate_text(&self, text: &str, src: &str, tgt: &str) -> VoiceResult<String> {
        let body = TranslateRequest { text, source_language: src, target_language: tgt };
        let response = self
            .http
            .post(&self.translate.url)
            .bearer_auth(&self.translate.api_key)
            .timeout(self.translate.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::TranslationFailure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VoiceError::TranslationFailure(format!("http {}", response.status())));
        }
        let parsed: TranslateResponse = response.json().await.map_err(|e| VoiceError::TranslationFailure(e.to_string()))?;
        Ok(parsed.translated_text)
    }

    async fn text_to_speech(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let body = TtsRequest { text, voice: &self.tts.voice, format: &self.tts.format };
        let response = self
            .http
            .post(&self.tts.url)
            .bearer_auth(&self.tts.api_key)
            .timeout(self.tts.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::TtsFailure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VoiceError::TtsFailure(format!("http {}", response.status())));
        }
        response.bytes().await.map(|b| b.to_vec()).map_err(|e| VoiceError::TtsFailure(e.to_string()))
    }

    fn tts_format(&self) -> &str {
        &self.tts.format
    }
}
