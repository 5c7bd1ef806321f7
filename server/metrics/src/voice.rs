use std::sync::Arc;

use metrics::{counter, gauge};

use concord_voice::metrics_hooks::VoiceMetrics;
use concord_voice::peer::QualityLabel;

/// Prometheus-backed implementation of `concord_voice`'s metrics seam.
/// Metric names under: {ns}_voice_*
pub struct PrometheusVoiceMetrics {
    ns: &'static str,
}

impl PrometheusVoiceMetrics {
    pub fn new(namespace: &'static str) -> Arc<dyn VoiceMetrics> {
        Arc::new(Self { ns: namespace })
    }

    fn quality_label_str(label: QualityLabel) -> &'static str {
        match label {
            QualityLabel::Unknown => "unknown",
            QualityLabel::Good => "good",
            QualityLabel::Fair => "fair",
            QualityLabel::Poor => "poor",
        }
    }
}

impl VoiceMetrics for PrometheusVoiceMetrics {
    fn peer_session_opened(&self) {
        counter!(format!("{}_voice_peer_sessions_opened_total", self.ns)).increment(1);
    }

    fn peer_session_closed(&self, reason: &str) {
        counter!(
            format!("{}_voice_peer_sessions_closed_total", self.ns),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    fn quality_sample(&self, label: QualityLabel) {
        counter!(
            format!("{}_voice_quality_samples_total", self.ns),
            "label" => Self::quality_label_str(label)
        )
        .increment(1);
    }

    fn jitter_buffer_drop(&self, kind: &str) {
        counter!(
            format!("{}_voice_jitter_drops_total", self.ns),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    fn translation_job_completed(&self, succeeded: bool) {
        counter!(
            format!("{}_voice_translation_jobs_total", self.ns),
            "result" => if succeeded { "ok" } else { "fail" }
        )
        .increment(1);
    }

    fn translation_breaker_state(&self, open: bool) {
        gauge!(format!("{}_voice_translation_breaker_open", self.ns)).set(if open { 1.0 } else { 0.0 });
    }

    fn signaling_reconnect_attempt(&self) {
        counter!(format!("{}_voice_signaling_reconnect_attempts_total", self.ns)).increment(1);
    }

    fn engine_state_changed(&self, state: &str) {
        counter!(
            format!("{}_voice_engine_state_transitions_total", self.ns),
            "state" => state.to_string()
        )
        .increment(1);
    }
}
