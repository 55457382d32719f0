//! Playback-driven lip sync.
//!
//! [`LipSyncDriver`] owns the single authoritative "vocalizing" flag. While
//! it is set, every tick samples a [`VisemeSource`] at the current playback
//! position and writes the scaled viseme activations into a
//! [`BlendShapeTarget`]. Animation layers observe the flag through
//! [`LipSyncDriver::subscribe`] or an attached [`Animator`].

use crate::audio::PcmAudio;
use crate::audio::mix_to_mono;
use crate::audio::vad::calculate_rms;
use crate::defaults;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

/// Visemes in the order produced by [`EnvelopeVisemes`]:
/// sil, PP, FF, TH, DD, kk, CH, SS, nn, RR, aa, E, ih, oh, ou.
pub const VISEME_COUNT: usize = 15;
const VISEME_SILENCE: usize = 0;
const VISEME_AA: usize = 10;

/// Animator parameter set while the avatar talks.
pub const TALK_PARAM: &str = "Talk";
/// Animator parameter set while the avatar is silent.
pub const IDLE_PARAM: &str = "isIdle";

/// Mesh with addressable blend shapes.
pub trait BlendShapeTarget: Send {
    fn blend_shape_count(&self) -> usize;

    fn set_weight(&mut self, index: usize, weight: f32);

    /// Weights accepted by `set_weight`.
    fn weight_range(&self) -> RangeInclusive<f32> {
        0.0..=defaults::BLEND_SHAPE_FULL_SCALE
    }
}

/// Produces viseme activations in `0.0..=1.0` for a playback position.
pub trait VisemeSource: Send {
    /// Called when a new clip starts playing.
    fn load(&mut self, audio: &PcmAudio);

    fn visemes_at(&mut self, position: Duration) -> Vec<f32>;
}

/// Receives the boolean parameters derived from the vocalizing flag.
pub trait Animator: Send {
    fn set_bool(&mut self, name: &str, value: bool);
}

#[derive(Debug, Clone, PartialEq)]
pub struct LipSyncConfig {
    /// Multiplier applied to viseme activations.
    pub gain: f32,
    /// Weight corresponding to an activation of 1.0.
    pub full_scale: f32,
    /// Blend shape driven by each viseme, by viseme index.
    pub viseme_blend_shapes: Vec<Option<usize>>,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        Self {
            gain: defaults::LIPSYNC_GAIN,
            full_scale: defaults::BLEND_SHAPE_FULL_SCALE,
            viseme_blend_shapes: (0..VISEME_COUNT).map(Some).collect(),
        }
    }
}

pub struct LipSyncDriver {
    config: LipSyncConfig,
    target: Box<dyn BlendShapeTarget>,
    visemes: Box<dyn VisemeSource>,
    animator: Option<Box<dyn Animator>>,
    vocalizing: watch::Sender<bool>,
    position: Duration,
}

impl LipSyncDriver {
    pub fn new(
        config: LipSyncConfig,
        target: Box<dyn BlendShapeTarget>,
        visemes: Box<dyn VisemeSource>,
    ) -> Self {
        let (vocalizing, _) = watch::channel(false);
        Self {
            config,
            target,
            visemes,
            animator: None,
            vocalizing,
            position: Duration::ZERO,
        }
    }

    /// Attaches an animator and pushes the current flag to it.
    pub fn with_animator(mut self, animator: Box<dyn Animator>) -> Self {
        self.animator = Some(animator);
        let talking = self.is_vocalizing();
        self.sync_animator(talking);
        self
    }

    /// Receiver tracking the vocalizing flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.vocalizing.subscribe()
    }

    pub fn is_vocalizing(&self) -> bool {
        *self.vocalizing.borrow()
    }

    /// Playback position of the current clip.
    pub fn position(&self) -> Duration {
        self.position
    }

    /// Marks the start of playback for `audio`.
    pub fn begin(&mut self, audio: &PcmAudio) {
        self.visemes.load(audio);
        self.position = Duration::ZERO;
        self.set_vocalizing(true);
        self.apply_visemes();
        tracing::debug!(duration = ?audio.duration(), "Lip sync started");
    }

    /// Advances the playback clock and refreshes the blend shapes.
    pub fn tick(&mut self, dt: Duration) {
        if !self.is_vocalizing() {
            return;
        }
        self.position += dt;
        self.apply_visemes();
    }

    /// Clears the vocalizing flag and returns every mapped blend shape to
    /// rest. Safe to call when already stopped.
    pub fn stop(&mut self) {
        let was_vocalizing = self.is_vocalizing();
        self.set_vocalizing(false);
        self.zero_weights();
        if was_vocalizing {
            tracing::debug!(position = ?self.position, "Lip sync stopped");
        }
    }

    fn set_vocalizing(&mut self, value: bool) {
        let changed = self.vocalizing.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
        if changed {
            self.sync_animator(value);
        }
    }

    fn sync_animator(&mut self, talking: bool) {
        if let Some(animator) = self.animator.as_mut() {
            animator.set_bool(TALK_PARAM, talking);
            animator.set_bool(IDLE_PARAM, !talking);
        }
    }

    fn apply_visemes(&mut self) {
        let frame = self.visemes.visemes_at(self.position);
        let count = self.target.blend_shape_count();
        let range = self.target.weight_range();
        let mapped = frame.len().min(self.config.viseme_blend_shapes.len());

        for (i, activation) in frame.iter().enumerate().take(mapped) {
            let Some(index) = self.config.viseme_blend_shapes[i] else {
                continue;
            };
            if index >= count {
                continue;
            }
            let weight = blend_weight(*activation, self.config.gain, self.config.full_scale, &range);
            self.target.set_weight(index, weight);
        }
    }

    fn zero_weights(&mut self) {
        let count = self.target.blend_shape_count();
        let range = self.target.weight_range();
        let rest = 0.0f32.clamp(*range.start(), *range.end());
        for index in self.config.viseme_blend_shapes.iter().flatten() {
            if *index < count {
                self.target.set_weight(*index, rest);
            }
        }
    }
}

/// `activation * gain * full_scale`, clamped to the skin's accepted range.
pub fn blend_weight(activation: f32, gain: f32, full_scale: f32, range: &RangeInclusive<f32>) -> f32 {
    (activation * gain * full_scale).clamp(*range.start(), *range.end())
}

/// Jaw-open visemes derived from the loudness of the clip being played.
#[derive(Debug, Clone)]
pub struct EnvelopeVisemes {
    samples: Vec<f32>,
    sample_rate: u32,
    window: Duration,
    sensitivity: f32,
}

impl EnvelopeVisemes {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            sample_rate: 0,
            window: Duration::from_millis(20),
            sensitivity: defaults::ENVELOPE_SENSITIVITY,
        }
    }

    /// RMS-to-activation multiplier.
    pub fn with_sensitivity(mut self, sensitivity: f32) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    fn mouth_open(&self, position: Duration) -> f32 {
        if self.sample_rate == 0 || self.samples.is_empty() {
            return 0.0;
        }
        let rate = f64::from(self.sample_rate);
        let center = (position.as_secs_f64() * rate) as usize;
        if center >= self.samples.len() {
            return 0.0;
        }
        let half = ((self.window.as_secs_f64() * rate) as usize / 2).max(1);
        let start = center.saturating_sub(half);
        let end = (center + half).min(self.samples.len());
        (calculate_rms(&self.samples[start..end]) * self.sensitivity).clamp(0.0, 1.0)
    }
}

impl Default for EnvelopeVisemes {
    fn default() -> Self {
        Self::new()
    }
}

impl VisemeSource for EnvelopeVisemes {
    fn load(&mut self, audio: &PcmAudio) {
        self.samples = mix_to_mono(&audio.samples, audio.channels as usize);
        self.sample_rate = audio.sample_rate;
    }

    fn visemes_at(&mut self, position: Duration) -> Vec<f32> {
        let open = self.mouth_open(position);
        let mut frame = vec![0.0; VISEME_COUNT];
        frame[VISEME_SILENCE] = 1.0 - open;
        frame[VISEME_AA] = open;
        frame
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory blend shapes. Clones share the same weights, which makes it
/// usable both as a headless target and for inspecting a driver in tests.
#[derive(Debug, Clone)]
pub struct SharedBlendShapes {
    weights: Arc<Mutex<Vec<f32>>>,
}

impl SharedBlendShapes {
    pub fn new(count: usize) -> Self {
        Self {
            weights: Arc::new(Mutex::new(vec![0.0; count])),
        }
    }

    pub fn weights(&self) -> Vec<f32> {
        lock(&self.weights).clone()
    }

    pub fn weight(&self, index: usize) -> Option<f32> {
        lock(&self.weights).get(index).copied()
    }
}

impl BlendShapeTarget for SharedBlendShapes {
    fn blend_shape_count(&self) -> usize {
        lock(&self.weights).len()
    }

    fn set_weight(&mut self, index: usize, weight: f32) {
        if let Some(slot) = lock(&self.weights).get_mut(index) {
            *slot = weight;
        }
    }
}

/// Animator that remembers the last value of every parameter.
#[derive(Debug, Clone, Default)]
pub struct SharedAnimator {
    params: Arc<Mutex<Vec<(String, bool)>>>,
}

impl SharedAnimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        lock(&self.params)
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, value)| *value)
    }
}

impl Animator for SharedAnimator {
    fn set_bool(&mut self, name: &str, value: bool) {
        let mut params = lock(&self.params);
        match params.iter_mut().find(|(param, _)| param == name) {
            Some((_, current)) => *current = value,
            None => params.push((name.to_string(), value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays fixed frames regardless of position.
    struct FixedVisemes(Vec<f32>);

    impl VisemeSource for FixedVisemes {
        fn load(&mut self, _audio: &PcmAudio) {}

        fn visemes_at(&mut self, _position: Duration) -> Vec<f32> {
            self.0.clone()
        }
    }

    fn driver_with(
        frame: Vec<f32>,
        mapping: Vec<Option<usize>>,
        shapes: &SharedBlendShapes,
    ) -> LipSyncDriver {
        let config = LipSyncConfig {
            viseme_blend_shapes: mapping,
            ..LipSyncConfig::default()
        };
        LipSyncDriver::new(config, Box::new(shapes.clone()), Box::new(FixedVisemes(frame)))
    }

    fn clip() -> PcmAudio {
        PcmAudio::new(vec![0.5; 4410], 1, 44100)
    }

    #[test]
    fn weights_scale_by_gain_and_full_scale() {
        let shapes = SharedBlendShapes::new(3);
        let mut driver = driver_with(vec![1.0, 0.5, 0.0], vec![Some(0), Some(1), Some(2)], &shapes);

        driver.begin(&clip());

        let weights = shapes.weights();
        assert!((weights[0] - 70.0).abs() < 1e-4);
        assert!((weights[1] - 35.0).abs() < 1e-4);
        assert_eq!(weights[2], 0.0);
    }

    #[test]
    fn weights_are_clamped_to_range() {
        assert_eq!(blend_weight(2.0, 1.0, 100.0, &(0.0..=100.0)), 100.0);
        assert_eq!(blend_weight(-1.0, 0.7, 100.0, &(0.0..=100.0)), 0.0);
        assert!((blend_weight(0.5, 0.7, 1.0, &(0.0..=1.0)) - 0.35).abs() < 1e-6);
    }

    #[test]
    fn only_overlapping_entries_are_written() {
        let shapes = SharedBlendShapes::new(4);
        // Two visemes, three mappings: only the first two are applied.
        let mut driver = driver_with(vec![1.0, 1.0], vec![Some(3), Some(2), Some(1)], &shapes);

        driver.begin(&clip());

        let weights = shapes.weights();
        assert_eq!(weights[1], 0.0);
        assert!(weights[2] > 0.0);
        assert!(weights[3] > 0.0);
    }

    #[test]
    fn unmapped_and_out_of_range_indices_are_skipped() {
        let shapes = SharedBlendShapes::new(2);
        let mut driver = driver_with(vec![1.0, 1.0, 1.0], vec![None, Some(9), Some(1)], &shapes);

        driver.begin(&clip());

        let weights = shapes.weights();
        assert_eq!(weights[0], 0.0);
        assert!((weights[1] - 70.0).abs() < 1e-4);
    }

    #[test]
    fn stop_zeroes_weights_and_clears_flag() {
        let shapes = SharedBlendShapes::new(2);
        let mut driver = driver_with(vec![1.0, 1.0], vec![Some(0), Some(1)], &shapes);
        let flag = driver.subscribe();

        driver.begin(&clip());
        assert!(*flag.borrow());

        driver.stop();

        assert!(!driver.is_vocalizing());
        assert!(!*flag.borrow());
        assert_eq!(shapes.weights(), vec![0.0, 0.0]);
    }

    #[test]
    fn tick_advances_only_while_vocalizing() {
        let shapes = SharedBlendShapes::new(1);
        let mut driver = driver_with(vec![1.0], vec![Some(0)], &shapes);

        driver.tick(Duration::from_millis(16));
        assert_eq!(driver.position(), Duration::ZERO);

        driver.begin(&clip());
        driver.tick(Duration::from_millis(16));
        driver.tick(Duration::from_millis(16));
        assert_eq!(driver.position(), Duration::from_millis(32));
    }

    #[test]
    fn animator_follows_flag() {
        let shapes = SharedBlendShapes::new(1);
        let animator = SharedAnimator::new();
        let mut driver =
            driver_with(vec![1.0], vec![Some(0)], &shapes).with_animator(Box::new(animator.clone()));

        assert_eq!(animator.get(TALK_PARAM), Some(false));
        assert_eq!(animator.get(IDLE_PARAM), Some(true));

        driver.begin(&clip());
        assert_eq!(animator.get(TALK_PARAM), Some(true));
        assert_eq!(animator.get(IDLE_PARAM), Some(false));

        driver.stop();
        assert_eq!(animator.get(TALK_PARAM), Some(false));
        assert_eq!(animator.get(IDLE_PARAM), Some(true));
    }

    #[test]
    fn envelope_opens_mouth_for_loud_audio() {
        let mut visemes = EnvelopeVisemes::new();
        let mut samples = vec![0.0; 4410];
        samples.extend(vec![0.2; 4410]);
        visemes.load(&PcmAudio::new(samples, 1, 44100));

        let quiet = visemes.visemes_at(Duration::from_millis(50));
        let loud = visemes.visemes_at(Duration::from_millis(150));
        let past_end = visemes.visemes_at(Duration::from_secs(5));

        assert_eq!(quiet.len(), VISEME_COUNT);
        assert_eq!(quiet[VISEME_AA], 0.0);
        assert_eq!(quiet[VISEME_SILENCE], 1.0);
        assert!((loud[VISEME_AA] - 0.8).abs() < 1e-3);
        assert_eq!(past_end[VISEME_AA], 0.0);
    }

    #[test]
    fn envelope_clamps_activation() {
        let mut visemes = EnvelopeVisemes::new().with_sensitivity(10.0);
        visemes.load(&PcmAudio::new(vec![0.9; 4410], 1, 44100));

        assert_eq!(visemes.visemes_at(Duration::from_millis(50))[VISEME_AA], 1.0);
    }

    #[test]
    fn default_mapping_is_identity() {
        let config = LipSyncConfig::default();
        assert_eq!(config.viseme_blend_shapes.len(), VISEME_COUNT);
        assert_eq!(config.viseme_blend_shapes[10], Some(10));
        assert_eq!(config.gain, 0.7);
    }
}
