//! Opt-in speech-to-text -> translate -> text-to-speech pipeline. Runs
//! entirely off the media hot path: `push_opus_frame` only copies bytes into
//! an accumulator; every external call happens in a spawned job task.

pub mod breaker;
pub mod cache;
pub mod http_clients;
pub mod job;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::VoiceResult;
use crate::metrics_hooks::{self, VoiceMetrics};
use breaker::CircuitBreaker;
use cache::TranslationCache;
use http_clients::TranslationBackend;
use job::{SegmentAccumulator, TranslationJob, DEFAULT_SEGMENT_LENGTH};

/// `voice:translated-audio`.
#[derive(Debug, Clone)]
pub struct TranslatedAudioEvent {
    pub peer_id: String,
    pub audio: Vec<u8>,
    pub format: String,
}

#[derive(Debug, Clone)]
pub struct TranslatorStatus {
    pub enabled: bool,
    pub degraded: bool,
    pub src_lang: Option<String>,
    pub tgt_lang: Option<String>,
}

struct State {
    enabled: bool,
    src_lang: String,
    tgt_lang: String,
    accumulators: HashMap<String, SegmentAccumulator>,
}

impl Default for State {
    fn default() -> Self {
        Self { enabled: false, src_lang: String::new(), tgt_lang: String::new(), accumulators: HashMap::new() }
    }
}

pub struct Translator {
    state: Mutex<State>,
    breaker: Mutex<CircuitBreaker>,
    cache: Mutex<TranslationCache>,
    backend: Arc<dyn TranslationBackend>,
    segment_length: Duration,
    events: mpsc::UnboundedSender<TranslatedAudioEvent>,
    /// Parent scope for every outstanding job's cancellation token.
    /// `disable()` cancels it and swaps in a fresh one for whatever gets
    /// enabled next.
    job_cancel: Mutex<CancellationToken>,
    metrics: Arc<dyn VoiceMetrics>,
}

impl Translator {
    pub fn new(backend: Arc<dyn TranslationBackend>, segment_length: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<TranslatedAudioEvent>) {
        Self::new_with_metrics(backend, segment_length, metrics_hooks::noop())
    }

    pub fn new_with_metrics(
        backend: Arc<dyn TranslationBackend>,
        segment_length: Duration,
        metrics: Arc<dyn VoiceMetrics>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TranslatedAudioEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let translator = Arc::new(Self {
            state: Mutex::new(State::default()),
            breaker: Mutex::new(CircuitBreaker::default()),
            cache: Mutex::new(TranslationCache::default()),
            backend,
            segment_length: if segment_length.is_zero() { DEFAULT_SEGMENT_LENGTH } else { segment_length },
            events: tx,
            job_cancel: Mutex::new(CancellationToken::new()),
            metrics,
        });
        (translator, rx)
    }

    pub fn enable(&self, src: &str, tgt: &str) {
        let mut state = self.state.lock();
        state.enabled = true;
        state.src_lang = src.to_string();
        state.tgt_lang = tgt.to_string();
    }

    /// Accumulators drop, in-flight jobs cancel, emitted events stop.
    pub fn disable(&self) {
        let mut state = self.state.lock();
        state.enabled = false;
        state.accumulators.clear();
        drop(state);
        let mut cancel = self.job_cancel.lock();
        cancel.cancel();
        *cancel = CancellationToken::new();
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn get_status(&self) -> TranslatorStatus {
        let state = self.state.lock();
        TranslatorStatus {
            enabled: state.enabled,
            degraded: self.breaker.lock().is_open(),
            src_lang: state.enabled.then(|| state.src_lang.clone()),
            tgt_lang: state.enabled.then(|| state.tgt_lang.clone()),
        }
    }

    /// No-op while the breaker is open.
    pub fn push_opus_frame(self: &Arc<Self>, peer_id: &str, frame: &[u8]) {
        if !self.breaker.lock().allow_call() {
            return;
        }
        let job = {
            let mut state = self.state.lock();
            if !state.enabled {
                return;
            }
            let (src, tgt) = (state.src_lang.clone(), state.tgt_lang.clone());
            let segment_length = self.segment_length;
            let acc = state.accumulators.entry(peer_id.to_string()).or_insert_with(|| SegmentAccumulator::new(segment_length));
            acc.push(frame);
            if acc.is_due() {
                let parent = self.job_cancel.lock().clone();
                Some(acc.detach(peer_id.to_string(), src, tgt, &parent))
            } else {
                None
            }
        };
        if let Some(job) = job {
            if !job.is_empty() {
                let translator = Arc::clone(self);
                tokio::spawn(async move { translator.run_job(job).await });
            }
        }
    }

    async fn run_job(self: Arc<Self>, job: TranslationJob) {
        let budget = self.segment_length + Duration::from_millis(500);
        let started = std::time::Instant::now();
        let result = tokio::select! {
            _ = job.cancel.cancelled() => return,
            result = self.run_pipeline(&job) => result,
        };

        let exceeded_double_budget = started.elapsed() > budget * 2;
        let mut breaker = self.breaker.lock();
        let was_open = breaker.is_open();
        let (succeeded, emit) = match result {
            Ok(Some(event)) => {
                breaker.record_success();
                (true, Some(event))
            }
            Ok(None) => {
                // Empty/whitespace transcript: silence, completes quietly.
                breaker.record_success();
                (true, None)
            }
            Err(e) => {
                tracing::warn!(peer_id = %job.peer_id, "translation job failed: {e}");
                breaker.record_failure();
                (false, None)
            }
        };
        let is_open = breaker.is_open();
        drop(breaker);
        if let Some(event) = emit {
            let _ = self.events.send(event);
        }
        self.metrics.translation_job_completed(succeeded);
        if is_open != was_open {
            self.metrics.translation_breaker_state(is_open);
        }
        if exceeded_double_budget {
            tracing::warn!(peer_id = %job.peer_id, "translation job exceeded twice the latency budget");
        }
    }

    async fn run_pipeline(&self, job: &TranslationJob) -> VoiceResult<Option<TranslatedAudioEvent>> {
        let container = job.pack_container();
        let transcript = self.backend.speech_to_text(container, &job.src_lang).await?;
        if transcript.trim().is_empty() {
            return Ok(None);
        }

        let cache_key = TranslationCache::key(&job.src_lang, &job.tgt_lang, &transcript);
        let cached = self.cache.lock().get(&cache_key);
        let translated = match cached {
            Some(text) => text,
            None => {
                let text = self.backend.translate_text(&transcript, &job.src_lang, &job.tgt_lang).await?;
                self.cache.lock().insert(cache_key, text.clone());
                text
            }
        };

        let audio = self.backend.text_to_speech(&translated).await?;
        Ok(Some(TranslatedAudioEvent { peer_id: job.peer_id.clone(), audio, format: self.backend.tts_format().to_string() }))
    }

    /// Standalone text translation, independent of the per-peer audio
    /// pipeline; still goes through the shared cache.
    pub async fn translate_text(&self, text: &str, src: &str, tgt: &str) -> VoiceResult<String> {
        let key = TranslationCache::key(src, tgt, text);
        if let Some(cached) = self.cache.lock().get(&key) {
            return Ok(cached);
        }
        let translated = self.backend.translate_text(text, src, tgt).await?;
        self.cache.lock().insert(key, translated.clone());
        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct FakeBackend {
        stt_calls: AtomicUsize,
        translate_calls: AtomicUsize,
        fail_stt: bool,
        transcript: String,
        translated: String,
        audio: Vec<u8>,
    }

    impl FakeBackend {
        fn happy_path() -> Self {
            Self {
                stt_calls: AtomicUsize::new(0),
                translate_calls: AtomicUsize::new(0),
                fail_stt: false,
                transcript: "hello world".to_string(),
                translated: "olá mundo".to_string(),
                audio: vec![0u8; 1024],
            }
        }

        fn always_fails() -> Self {
            Self { fail_stt: true, ..Self::happy_path() }
        }
    }

    #[async_trait]
    impl TranslationBackend for FakeBackend {
        async fn speech_to_text(&self, _container: Vec<u8>, _language: &str) -> VoiceResult<String> {
            self.stt_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_stt {
                Err(crate::error::VoiceError::SttFailure("http 500".to_string()))
            } else {
                Ok(self.transcript.clone())
            }
        }

        async fn translate_text(&self, _text: &str, _src: &str, _tgt: &str) -> VoiceResult<String> {
            self.translate_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.translated.clone())
        }

        async fn text_to_speech(&self, _text: &str) -> VoiceResult<Vec<u8>> {
            Ok(self.audio.clone())
        }

        fn tts_format(&self) -> &str {
            "mp3"
        }
    }

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(f)
    }

    #[test]
    fn happy_path_emits_exactly_one_translated_audio_event() {
        block_on(async {
            let backend = Arc::new(FakeBackend::happy_path());
            let (translator, mut rx) = Translator::new(backend, StdDuration::from_millis(20));
            translator.enable("en", "pt");
            translator.push_opus_frame("p1", &[1, 2, 3]);
            tokio::time::sleep(StdDuration::from_millis(30)).await;
            translator.push_opus_frame("p1", &[4, 5, 6]);

            let event = tokio::time::timeout(StdDuration::from_secs(1), rx.recv()).await.unwrap().unwrap();
            assert_eq!(event.peer_id, "p1");
            assert_eq!(event.audio.len(), 1024);
            assert_eq!(event.format, "mp3");
        });
    }

    #[derive(Default)]
    struct JobRecorder {
        completed: AtomicUsize,
        failed: AtomicUsize,
        breaker_open_events: AtomicUsize,
    }

    impl VoiceMetrics for JobRecorder {
        fn translation_job_completed(&self, succeeded: bool) {
            if succeeded {
                self.completed.fetch_add(1, Ordering::SeqCst);
            } else {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn translation_breaker_state(&self, open: bool) {
            if open {
                self.breaker_open_events.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn job_completion_and_breaker_transitions_report_to_metrics() {
        block_on(async {
            let backend = Arc::new(FakeBackend::always_fails());
            let recorder = Arc::new(JobRecorder::default());
            let (translator, _rx) = Translator::new_with_metrics(backend, StdDuration::from_millis(5), recorder.clone());
            translator.enable("en", "pt");

            for _ in 0..3 {
                translator.push_opus_frame("p1", &[9]);
                tokio::time::sleep(StdDuration::from_millis(10)).await;
            }

            assert_eq!(recorder.failed.load(Ordering::SeqCst), 3);
            assert_eq!(recorder.breaker_open_events.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn breaker_opens_after_three_failures_and_push_becomes_a_noop() {
        block_on(async {
            let backend = Arc::new(FakeBackend::always_fails());
            let (translator, _rx) = Translator::new(backend, StdDuration::from_millis(5));
            translator.enable("en", "pt");

            for _ in 0..3 {
                translator.push_opus_frame("p1", &[9]);
                tokio::time::sleep(StdDuration::from_millis(10)).await;
            }
            assert!(translator.get_status().degraded);

            translator.push_opus_frame("p1", &[9]);
            tokio::time::sleep(StdDuration::from_millis(10)).await;
            assert!(translator.get_status().enabled);
            assert!(translator.get_status().degraded);
        });
    }

    struct SlowBackend {
        transcript: String,
        audio: Vec<u8>,
        delay: StdDuration,
    }

    #[async_trait]
    impl TranslationBackend for SlowBackend {
        async fn speech_to_text(&self, _container: Vec<u8>, _language: &str) -> VoiceResult<String> {
            tokio::time::sleep(self.delay).await;
            Ok(self.transcript.clone())
        }

        async fn translate_text(&self, _text: &str, _src: &str, _tgt: &str) -> VoiceResult<String> {
            Ok("ola".to_string())
        }

        async fn text_to_speech(&self, _text: &str) -> VoiceResult<Vec<u8>> {
            Ok(self.audio.clone())
        }

        fn tts_format(&self) -> &str {
            "mp3"
        }
    }

    #[test]
    fn disable_cancels_an_in_flight_job_before_it_emits() {
        block_on(async {
            let backend = Arc::new(SlowBackend { transcript: "hello".to_string(), audio: vec![0u8; 4], delay: StdDuration::from_millis(200) });
            let (translator, mut rx) = Translator::new(backend, StdDuration::from_millis(5));
            translator.enable("en", "pt");
            translator.push_opus_frame("p1", &[1, 2, 3]);
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            // Segment is now due; this detaches it and spawns the job, which
            // immediately blocks inside speech_to_text for 200ms.
            translator.push_opus_frame("p1", &[4, 5, 6]);
            tokio::time::sleep(StdDuration::from_millis(20)).await;

            translator.disable();

            let result = tokio::time::timeout(StdDuration::from_millis(300), rx.recv()).await;
            assert!(result.is_err(), "disable() must cancel the in-flight job before it can emit");
        });
    }

    #[test]
    fn disable_clears_accumulators() {
        block_on(async {
            let backend = Arc::new(FakeBackend::happy_path());
            let (translator, _rx) = Translator::new(backend, StdDuration::from_secs(3));
            translator.enable("en", "pt");
            translator.push_opus_frame("p1", &[1]);
            translator.disable();
            assert!(!translator.is_enabled());
            assert!(translator.state.lock().accumulators.is_empty());
        });
    }

    #[test]
    fn repeated_translate_text_hits_cache_once() {
        block_on(async {
            let backend = Arc::new(FakeBackend::happy_path());
            let (translator, _rx) = Translator::new(backend.clone(), StdDuration::from_secs(3));
            let a = translator.translate_text("hello", "en", "pt").await.unwrap();
            let b = translator.translate_text("hello", "en", "pt").await.unwrap();
            assert_eq!(a, b);
            assert_eq!(backend.translate_calls.load(Ordering::SeqCst), 1);
        });
    }
}
