//! Metrics seam for the voice plane's hot paths: a trait the engine, peer
//! sessions, and translator call into, with a no-op default so library code
//! never takes a hard dependency on any particular metrics backend.

use std::sync::Arc;

use crate::peer::QualityLabel;

pub trait VoiceMetrics: Send + Sync {
    fn peer_session_opened(&self) {}
    fn peer_session_closed(&self, reason: &str) {
        let _ = reason;
    }
    fn quality_sample(&self, label: QualityLabel) {
        let _ = label;
    }
    fn jitter_buffer_drop(&self, kind: &str) {
        let _ = kind;
    }
    fn translation_job_completed(&self, succeeded: bool) {
        let _ = succeeded;
    }
    fn translation_breaker_state(&self, open: bool) {
        let _ = open;
    }
    fn signaling_reconnect_attempt(&self) {}
    fn engine_state_changed(&self, state: &str) {
        let _ = state;
    }
}

#[derive(Default)]
pub struct NoopMetrics;

impl VoiceMetrics for NoopMetrics {}

pub fn noop() -> Arc<dyn VoiceMetrics> {
    Arc::new(NoopMetrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_metrics_accepts_every_call_without_panicking() {
        let metrics = noop();
        metrics.peer_session_opened();
        metrics.peer_session_closed("ice_failed");
        metrics.quality_sample(QualityLabel::Good);
        metrics.jitter_buffer_drop("overflow");
        metrics.translation_job_completed(true);
        metrics.translation_breaker_state(true);
        metrics.signaling_reconnect_attempt();
        metrics.engine_state_changed("connected");
    }
}
