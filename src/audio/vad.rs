//! Voice Activity Detection (VAD) module.
//!
//! Peak-amplitude detector ticked once per frame with the most recent capture
//! window and the frame's delta time. The first `warmup` of every recording is
//! ignored, then continuous silence longer than `silence_duration` ends the
//! utterance.

use crate::defaults;
use std::time::Duration;

/// Configuration for Voice Activity Detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// Peak amplitude below which a window counts as silence (0.0 to 1.0).
    pub silence_threshold: f32,
    /// Continuous silence required before the utterance is considered over.
    pub silence_duration: Duration,
    /// Time after capture start during which the mic is not analysed.
    pub warmup: Duration,
    /// Samples inspected per tick.
    pub window_size: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_threshold: defaults::SILENCE_THRESHOLD,
            silence_duration: Duration::from_secs_f32(defaults::SILENCE_DURATION_SECS),
            warmup: Duration::from_secs_f32(defaults::VAD_WARMUP_SECS),
            window_size: defaults::VAD_WINDOW_SIZE,
        }
    }
}

/// Timers carried across ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VadState {
    /// Time analysed since the last reset, warmup included.
    pub elapsed_recording: Duration,
    /// Continuous silence seen since the last loud window.
    pub silence_timer: Duration,
    /// Whether the last analysed window was above the threshold.
    pub is_speaking: bool,
}

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadTick {
    /// The user has been silent for longer than the configured duration.
    pub silence_elapsed: bool,
    /// Peak amplitude of the inspected window, 0.0 when it was too short.
    pub peak: f32,
}

/// Voice Activity Detector state machine.
#[derive(Debug, Clone)]
pub struct Vad {
    config: VadConfig,
    state: VadState,
}

impl Vad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: VadState::default(),
        }
    }

    /// Advances the detector by `dt` using the most recent capture samples.
    ///
    /// Windows shorter than `window_size` are ignored entirely: no timer
    /// moves, so the warmup is measured from the first full window.
    pub fn tick(&mut self, recent: &[f32], dt: Duration) -> VadTick {
        let window_size = self.config.window_size;
        if window_size == 0 || recent.len() < window_size {
            return VadTick {
                silence_elapsed: false,
                peak: 0.0,
            };
        }

        let peak = peak_amplitude(&recent[recent.len() - window_size..]);

        if self.state.elapsed_recording < self.config.warmup {
            self.state.elapsed_recording += dt;
            return VadTick {
                silence_elapsed: false,
                peak,
            };
        }

        self.state.elapsed_recording += dt;
        if peak < self.config.silence_threshold {
            self.state.silence_timer += dt;
            self.state.is_speaking = false;
        } else {
            if !self.state.is_speaking {
                tracing::trace!(peak, "Speech detected");
            }
            self.state.silence_timer = Duration::ZERO;
            self.state.is_speaking = true;
        }

        VadTick {
            silence_elapsed: self.state.silence_timer > self.config.silence_duration,
            peak,
        }
    }

    /// Returns the current timers.
    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Zeroes all timers for a new listening turn.
    pub fn reset(&mut self) {
        self.state = VadState::default();
    }
}

/// Largest absolute sample value, 0.0 for an empty slice.
pub fn peak_amplitude(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
}

/// Calculates the Root Mean Square (RMS) of normalized samples.
///
/// # Returns
/// RMS value (0.0 to 1.0), where:
/// - 0.0 represents silence
/// - ~0.707 represents a full-scale sine wave
/// - 1.0 represents maximum amplitude
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let s = f64::from(sample);
            s * s
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(100);

    fn make_silence(count: usize) -> Vec<f32> {
        vec![0.0; count]
    }

    fn make_speech(count: usize, amplitude: f32) -> Vec<f32> {
        vec![amplitude; count]
    }

    /// Ticks `n` times and returns the last result.
    fn tick_n(vad: &mut Vad, window: &[f32], n: usize) -> VadTick {
        let mut last = vad.tick(window, TICK);
        for _ in 1..n {
            last = vad.tick(window, TICK);
        }
        last
    }

    #[test]
    fn test_rms_silence_is_zero() {
        assert_eq!(calculate_rms(&make_silence(1000)), 0.0);
    }

    #[test]
    fn test_rms_full_scale() {
        let rms = calculate_rms(&make_speech(1000, -1.0));
        assert!((rms - 1.0).abs() < 0.001, "RMS should be ~1.0, got {rms}");
    }

    #[test]
    fn test_rms_sine_wave() {
        let sine: Vec<f32> = (0..16000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin())
            .collect();
        let rms = calculate_rms(&sine);
        assert!((rms - 0.707).abs() < 0.01, "RMS should be ~0.707, got {rms}");
    }

    #[test]
    fn test_peak_uses_absolute_value() {
        assert_eq!(peak_amplitude(&[0.1, -0.4, 0.3]), 0.4);
        assert_eq!(peak_amplitude(&[]), 0.0);
    }

    #[test]
    fn test_short_window_moves_no_timer() {
        let mut vad = Vad::new(VadConfig::default());

        let result = vad.tick(&make_silence(127), TICK);

        assert!(!result.silence_elapsed);
        assert_eq!(vad.state(), VadState::default());
    }

    #[test]
    fn test_warmup_never_reports_elapsed() {
        let config = VadConfig {
            warmup: Duration::from_secs(5),
            silence_duration: Duration::from_millis(200),
            ..VadConfig::default()
        };
        let mut vad = Vad::new(config);

        // 4.9s of pure silence, all inside the warmup.
        let result = tick_n(&mut vad, &make_silence(128), 49);

        assert!(!result.silence_elapsed);
        assert_eq!(vad.state().silence_timer, Duration::ZERO);
        assert_eq!(vad.state().elapsed_recording, Duration::from_millis(4900));
    }

    #[test]
    fn test_warmup_ignores_loud_samples() {
        let mut vad = Vad::new(VadConfig::default());

        vad.tick(&make_speech(128, 0.9), TICK);

        assert!(!vad.state().is_speaking);
    }

    #[test]
    fn test_silence_after_warmup_elapses() {
        let mut vad = Vad::new(VadConfig::default());
        let silence = make_silence(128);

        // Warmup: 1.0s.
        tick_n(&mut vad, &silence, 10);
        // Exactly 2.0s of silence is not yet "longer than" the duration.
        let at_two = tick_n(&mut vad, &silence, 20);
        assert!(!at_two.silence_elapsed);

        let past_two = vad.tick(&silence, TICK);
        assert!(past_two.silence_elapsed);
    }

    #[test]
    fn test_loud_sample_resets_silence_timer() {
        let mut vad = Vad::new(VadConfig::default());
        let silence = make_silence(128);

        tick_n(&mut vad, &silence, 10);
        tick_n(&mut vad, &silence, 19);
        assert_eq!(vad.state().silence_timer, Duration::from_millis(1900));

        let mut window = make_silence(128);
        window[64] = 0.5;
        let result = vad.tick(&window, TICK);

        assert!(!result.silence_elapsed);
        assert_eq!(vad.state().silence_timer, Duration::ZERO);
        assert!(vad.state().is_speaking);

        // The full silence duration has to pass again before the turn ends.
        for tick in 1..=20 {
            let result = vad.tick(&silence, TICK);
            assert!(!result.silence_elapsed, "ended early at quiet tick {tick}");
        }
        assert_eq!(vad.state().silence_timer, Duration::from_secs(2));
        assert!(vad.tick(&silence, TICK).silence_elapsed);
    }

    #[test]
    fn test_only_last_window_is_inspected() {
        let mut vad = Vad::new(VadConfig {
            warmup: Duration::ZERO,
            ..VadConfig::default()
        });

        // A loud burst older than the window does not count as speech.
        let mut recent = make_speech(64, 0.9);
        recent.extend(make_silence(128));
        let result = vad.tick(&recent, TICK);

        assert_eq!(result.peak, 0.0);
        assert_eq!(vad.state().silence_timer, TICK);
    }

    #[test]
    fn test_threshold_is_exclusive_for_silence() {
        let mut vad = Vad::new(VadConfig {
            warmup: Duration::ZERO,
            ..VadConfig::default()
        });

        vad.tick(&make_speech(128, 0.05), TICK);

        assert!(vad.state().is_speaking);
        assert_eq!(vad.state().silence_timer, Duration::ZERO);
    }

    #[test]
    fn test_reset_zeroes_timers() {
        let mut vad = Vad::new(VadConfig::default());
        tick_n(&mut vad, &make_silence(128), 40);
        assert!(vad.state().silence_timer > Duration::ZERO);

        vad.reset();

        assert_eq!(vad.state(), VadState::default());
    }
}
