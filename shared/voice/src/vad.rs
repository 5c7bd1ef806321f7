//! Energy-based voice-activity detection with an adaptive noise floor.
//! Distinct from the neural RNNoise-based detector used on the capture DSP
//! chain (`dsp::rnnoise`) — this is the canonical VAD the voice plane's
//! engine and mixer reason about.

const DEFAULT_ALPHA: f32 = 0.01;
const THRESHOLD_MARGIN_DB: f32 = 15.0;
const DEFAULT_HANGOVER_FRAMES: u32 = 15;
const SILENCE_SENTINEL_DB: f32 = -100.0;

pub struct VadContext {
    noise_floor_db: f32,
    configured_threshold_db: f32,
    alpha: f32,
    hangover_frames: u32,
    hangover_counter: u32,
    active: bool,
}

impl Default for VadContext {
    fn default() -> Self {
        Self::new(f32::NEG_INFINITY)
    }
}

impl VadContext {
    /// `configured_threshold_db` is a floor under the adaptive threshold; use
    /// `f32::NEG_INFINITY` for "no explicit minimum".
    pub fn new(configured_threshold_db: f32) -> Self {
        Self {
            noise_floor_db: SILENCE_SENTINEL_DB,
            configured_threshold_db,
            alpha: DEFAULT_ALPHA,
            hangover_frames: DEFAULT_HANGOVER_FRAMES,
            hangover_counter: 0,
            active: false,
        }
    }

    pub fn set_threshold(&mut self, db: f32) {
        self.configured_threshold_db = db;
    }

    pub fn reset(&mut self) {
        self.noise_floor_db = SILENCE_SENTINEL_DB;
        self.hangover_counter = 0;
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Process one frame of i16 PCM, returning the updated active verdict.
    pub fn process(&mut self, frame: &[i16]) -> bool {
        let frame_db = frame_energy_db(frame);
        let threshold = (self.noise_floor_db + THRESHOLD_MARGIN_DB).max(self.configured_threshold_db);
        let is_loud = frame_db > threshold;

        if !self.active {
            // Only adapt the noise floor while we believe this is silence/noise.
            self.noise_floor_db = self.noise_floor_db * (1.0 - self.alpha) + frame_db * self.alpha;
        }

        if is_loud {
            self.active = true;
            self.hangover_counter = self.hangover_frames;
        } else if self.active {
            if self.hangover_counter == 0 {
                self.active = false;
            } else {
                self.hangover_counter -= 1;
            }
        }

        self.active
    }
}

/// RMS -> dB. A fully silent frame returns the sentinel `-100 dB`, never
/// positive infinity.
fn frame_energy_db(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return SILENCE_SENTINEL_DB;
    }
    let sum_sq: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_sq / frame.len() as f64).sqrt();
    if rms <= 0.0 {
        return SILENCE_SENTINEL_DB;
    }
    (20.0 * (rms / 32768.0).log10()) as f32
}

fn tone_frame(amplitude: f32, freq_hz: f32, len: usize) -> Vec<i16> {
    (0..len)
        .map(|n| {
            let t = n as f32 / super::pcm::SAMPLE_RATE as f32;
            (amplitude * (2.0 * std::f32::consts::PI * freq_hz * t).sin() * 32767.0) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::FRAME_SAMPLES;

    #[test]
    fn silent_frame_never_activates() {
        let mut vad = VadContext::default();
        let silence = vec![0i16; FRAME_SAMPLES];
        for _ in 0..50 {
            assert!(!vad.process(&silence));
        }
    }

    #[test]
    fn silence_then_tone_then_hangover_then_silence() {
        // scenario C: 50 silent frames, then 10 tonal (440Hz, 0.5 amp), then 5 silent.
        let mut vad = VadContext::default();
        let silence = vec![0i16; FRAME_SAMPLES];
        let tone = tone_frame(0.5, 440.0, FRAME_SAMPLES);

        for _ in 0..50 {
            assert!(!vad.process(&silence));
        }

        let mut transitioned = false;
        for i in 0..10 {
            let active = vad.process(&tone);
            if i == 0 {
                transitioned = active;
            }
            assert!(active, "frame {i} of tone should be active");
        }
        assert!(transitioned, "should transition to active on first tonal frame");

        // hangover: frames 60..75 (15 total) must remain active even on silence.
        let mut stayed_active_count = 0;
        for _ in 0..15 {
            if vad.process(&silence) {
                stayed_active_count += 1;
            }
        }
        assert_eq!(stayed_active_count, DEFAULT_HANGOVER_FRAMES as usize);
        assert!(!vad.process(&silence));
    }

    #[test]
    fn energy_db_sentinel_for_silence() {
        assert_eq!(frame_energy_db(&[0i16; 10]), SILENCE_SENTINEL_DB);
        assert_eq!(frame_energy_db(&[]), SILENCE_SENTINEL_DB);
    }

    #[test]
    fn explicit_threshold_floors_the_adaptive_one() {
        let mut vad = VadContext::new(0.0);
        // Even though the noise floor would put the adaptive threshold very
        // low, a loud-ish but sub-zero-dB frame must not trigger activity.
        let quiet_tone = tone_frame(0.01, 440.0, FRAME_SAMPLES);
        assert!(!vad.process(&quiet_tone));
    }
}
