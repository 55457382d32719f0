use crate::defaults;
use crate::error::{AvatarError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Trait for microphone-like sample producers.
///
/// This trait allows swapping implementations (real audio device vs mock).
/// Implementations are polled from the tick loop, so `read_samples` must
/// never block.
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Drain the samples captured since the previous call.
    ///
    /// # Returns
    /// Normalized mono samples, possibly empty.
    fn read_samples(&mut self) -> Result<Vec<f32>>;

    /// Rate of the samples returned by `read_samples`.
    fn sample_rate(&self) -> u32 {
        defaults::CAPTURE_SAMPLE_RATE
    }
}

/// Configuration for audio source initialization
#[derive(Debug, Clone)]
pub struct AudioSourceConfig {
    pub sample_rate: u32,
}

impl Default for AudioSourceConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::CAPTURE_SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    is_started: bool,
    start_count: usize,
    stop_count: usize,
    queued: VecDeque<Vec<f32>>,
    stream_chunk: Vec<f32>,
    should_fail_start: bool,
    should_fail_stop: bool,
    should_fail_read: bool,
    error_message: String,
}

/// Mock audio source for testing.
///
/// Clones share state, so a test can keep a handle to push samples and
/// inspect start/stop calls after moving the source into a capture buffer.
/// While started, every read returns queued chunks first, then the
/// configured stream chunk. A stopped source reads nothing.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    state: Arc<Mutex<MockState>>,
    sample_rate: u32,
}

impl MockAudioSource {
    /// Create a new mock audio source that streams 160 silent samples per read.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                stream_chunk: vec![0.0; 160],
                error_message: "mock audio error".to_string(),
                ..MockState::default()
            })),
            sample_rate: defaults::CAPTURE_SAMPLE_RATE,
        }
    }

    /// Configure the chunk returned on every read while started.
    pub fn with_samples(self, samples: Vec<f32>) -> Self {
        self.lock().stream_chunk = samples;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(self) -> Self {
        self.lock().should_fail_start = true;
        self
    }

    /// Configure the mock to fail on stop
    pub fn with_stop_failure(self) -> Self {
        self.lock().should_fail_stop = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(self) -> Self {
        self.lock().should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(self, message: &str) -> Self {
        self.lock().error_message = message.to_string();
        self
    }

    /// Queue a one-off chunk delivered by the next read.
    pub fn push_samples(&self, samples: Vec<f32>) {
        self.lock().queued.push_back(samples);
    }

    /// Replace the chunk streamed on every read.
    pub fn set_stream_chunk(&self, samples: Vec<f32>) {
        self.lock().stream_chunk = samples;
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.lock().is_started
    }

    pub fn start_count(&self) -> usize {
        self.lock().start_count
    }

    pub fn stop_count(&self) -> usize {
        self.lock().stop_count
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread is the only way to poison this lock.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        let mut state = self.lock();
        if state.should_fail_start {
            return Err(AvatarError::AudioCapture {
                message: state.error_message.clone(),
            });
        }
        state.is_started = true;
        state.start_count += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.lock();
        if state.should_fail_stop {
            return Err(AvatarError::AudioCapture {
                message: state.error_message.clone(),
            });
        }
        state.is_started = false;
        state.stop_count += 1;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        let mut state = self.lock();
        if state.should_fail_read {
            return Err(AvatarError::AudioCapture {
                message: state.error_message.clone(),
            });
        }
        if !state.is_started {
            return Ok(Vec::new());
        }
        if let Some(chunk) = state.queued.pop_front() {
            return Ok(chunk);
        }
        Ok(state.stream_chunk.clone())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(source: MockAudioSource) -> MockAudioSource {
        let mut source = source;
        source.start().unwrap();
        source
    }

    #[test]
    fn test_mock_audio_source_returns_configured_samples() {
        let test_samples = vec![0.1, 0.2, 0.3, 0.4, 0.5];
        let mut source = started(MockAudioSource::new().with_samples(test_samples.clone()));

        let result = source.read_samples();

        assert_eq!(result.unwrap(), test_samples);
    }

    #[test]
    fn test_mock_audio_source_returns_default_samples() {
        let mut source = started(MockAudioSource::new());

        let samples = source.read_samples().unwrap();

        assert_eq!(samples.len(), 160);
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_mock_audio_source_reads_nothing_while_stopped() {
        let mut source = MockAudioSource::new().with_samples(vec![0.5; 10]);

        assert!(source.read_samples().unwrap().is_empty());
    }

    #[test]
    fn test_queued_chunks_come_before_stream() {
        let mut source = started(MockAudioSource::new().with_samples(vec![0.0]));
        source.push_samples(vec![0.9, 0.9]);

        assert_eq!(source.read_samples().unwrap(), vec![0.9, 0.9]);
        assert_eq!(source.read_samples().unwrap(), vec![0.0]);
    }

    #[test]
    fn test_clones_share_state() {
        let handle = MockAudioSource::new();
        let mut source = handle.clone();

        source.start().unwrap();
        assert!(handle.is_started());
        assert_eq!(handle.start_count(), 1);

        handle.set_stream_chunk(vec![0.25]);
        assert_eq!(source.read_samples().unwrap(), vec![0.25]);

        source.stop().unwrap();
        assert!(!handle.is_started());
        assert_eq!(handle.stop_count(), 1);
    }

    #[test]
    fn test_mock_audio_source_returns_custom_read_error() {
        let mut source = MockAudioSource::new()
            .with_read_failure()
            .with_error_message("buffer overflow");

        match source.read_samples() {
            Err(AvatarError::AudioCapture { message }) => {
                assert_eq!(message, "buffer overflow");
            }
            other => panic!("Expected AudioCapture error, got {other:?}"),
        }
    }

    #[test]
    fn test_mock_audio_source_start_failure() {
        let mut source = MockAudioSource::new().with_start_failure();

        let result = source.start();

        assert!(!source.is_started());
        match result {
            Err(AvatarError::AudioCapture { message }) => {
                assert_eq!(message, "mock audio error");
            }
            other => panic!("Expected AudioCapture error, got {other:?}"),
        }
    }

    #[test]
    fn test_mock_audio_source_stop_failure() {
        let mut source = started(MockAudioSource::new().with_stop_failure());

        let result = source.stop();

        assert!(result.is_err());
        // State should remain started since stop failed
        assert!(source.is_started());
    }

    #[test]
    fn test_audio_source_config_default() {
        let config = AudioSourceConfig::default();
        assert_eq!(config.sample_rate, 16000);
    }

    #[test]
    fn test_audio_source_trait_is_object_safe() {
        let mut source: Box<dyn AudioSource> =
            Box::new(MockAudioSource::new().with_samples(vec![0.1, 0.2]).with_sample_rate(8000));

        assert!(source.start().is_ok());
        assert_eq!(source.read_samples().unwrap(), vec![0.1, 0.2]);
        assert_eq!(source.sample_rate(), 8000);
        assert!(source.stop().is_ok());
    }
}
