//! Voice Activity Detection (VAD) utilities.
//!
//! The primary VAD comes from RNNoise (neural network based).
//! This module provides additional energy-based VAD as a fallback
//! and a hysteresis wrapper to avoid rapid on/off switching.

/// Hysteresis wrapper around a VAD probability source.
/// Requires the probability to exceed `on_threshold` to activate,
/// and drop below `off_threshold` to deactivate. This prevents
/// rapid toggling at the boundary.
pub struct VadHysteresis {
    on_threshold: f32,
    off_threshold: f32,
    active: bool,
    /// Number of consecutive frames below off_threshold before deactivating.
    hangover_frames: u32,
    hangover_counter: u32,
}

impl VadHysteresis {
    pub fn new(on_threshold: f32, off_threshold: f32, hangover_frames: u32) -> Self {
        Self {
            on_threshold,
            off_threshold,
            active: false,
            hangover_frames,
            hangover_counter: 0,
        }
    }

    /// Update with a new VAD probability. Returns whether voice is active.
    pub fn update(&mut self, probability: f32) -> bool {
        if probability >= self.on_threshold {
            self.active = true;
            self.hangover_counter = 0;
        } else if probability < self.off_threshold {
            if self.active {
                self.hangover_counter += 1;
                if self.hangover_counter >= self.hangover_frames {
                    self.active = false;
                    self.hangover_counter = 0;
                }
            }
        } else {
            // In the hysteresis band: maintain current state
            self.hangover_counter = 0;
        }

        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Simple energy-based VAD as a fallback when RNNoise is not available.
pub fn energy_vad(pcm: &[i16], threshold_db: f32) -> bool {
    if pcm.is_empty() {
        return false;
    }
    let sum_sq: f64 = pcm.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_sq / pcm.len() as f64).sqrt();
    let db = if rms > 0.0 {
        20.0 * (rms / 32768.0).log10() as f32
    } else {
        -96.0
    };
    db > threshold_db
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_never_active() {
        assert!(!energy_vad(&[], -40.0));
        assert!(!energy_vad(&[0i16; 480], -40.0));
    }

    #[test]
    fn loud_frame_crosses_threshold() {
        assert!(energy_vad(&[10_000i16; 480], -40.0));
    }

    #[test]
    fn hysteresis_requires_sustained_low_energy_before_deactivating() {
        let mut h = VadHysteresis::new(0.5, 0.2, 3);
        assert!(!h.update(0.1));
        assert!(h.update(0.9));
        assert!(h.is_active());
        // Dips into the hysteresis band: stays active.
        assert!(h.update(0.3));
        // Drops below off_threshold but not for `hangover_frames` yet.
        assert!(h.update(0.1));
        assert!(h.update(0.1));
        // Third consecutive low-energy frame: hangover_counter reaches
        // hangover_frames within this call, so it deactivates immediately.
        assert!(!h.update(0.1));
        assert!(!h.is_active());
    }

    #[test]
    fn hysteresis_reactivates_immediately_above_on_threshold() {
        let mut h = VadHysteresis::new(0.5, 0.2, 2);
        h.update(0.6);
        assert!(h.is_active());
        h.update(0.0);
        h.update(0.0);
        assert!(!h.is_active());
        assert!(h.update(0.7));
    }
}
