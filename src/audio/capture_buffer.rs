//! Bounded recording fed by an [`AudioSource`].
//!
//! The buffer behaves like a fixed-length, non-looping microphone clip: it
//! holds at most `max_duration` of audio and silently drops anything captured
//! after it is full. The host polls it once per tick.

use crate::audio::PcmAudio;
use crate::audio::recorder::AudioSource;
use crate::error::{AvatarError, Result};
use std::time::Duration;

/// Audio frozen by [`CaptureBuffer::stop_and_trim`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrimmedCapture {
    pub audio: PcmAudio,
    /// The write position was unusable and the full capacity was returned.
    pub fallback: bool,
}

pub struct CaptureBuffer {
    source: Box<dyn AudioSource>,
    samples: Vec<f32>,
    capacity: usize,
    sample_rate: u32,
    recording: bool,
    dropped: usize,
}

impl CaptureBuffer {
    /// Creates a stopped buffer holding up to `max_duration` of mono audio
    /// at the source's sample rate.
    pub fn new(source: Box<dyn AudioSource>, max_duration: Duration) -> Self {
        let sample_rate = source.sample_rate();
        let capacity = (max_duration.as_secs_f64() * f64::from(sample_rate)) as usize;
        Self {
            source,
            samples: Vec::with_capacity(capacity),
            capacity,
            sample_rate,
            recording: false,
            dropped: 0,
        }
    }

    /// Clears the buffer and starts the source. Returns without waiting for
    /// the first samples.
    pub fn start(&mut self) -> Result<()> {
        if self.recording {
            self.stop_source();
        }
        self.samples.clear();
        self.dropped = 0;
        self.source.start()?;
        self.recording = true;
        tracing::debug!(
            capacity = self.capacity,
            sample_rate = self.sample_rate,
            "Capture started"
        );
        Ok(())
    }

    /// Moves whatever the source produced since the last poll into the
    /// buffer. Returns the number of samples stored.
    pub fn poll(&mut self) -> Result<usize> {
        if !self.recording {
            return Ok(0);
        }
        let chunk = self.source.read_samples()?;
        Ok(self.append(&chunk))
    }

    fn append(&mut self, chunk: &[f32]) -> usize {
        let room = self.capacity - self.samples.len();
        let take = chunk.len().min(room);
        self.samples.extend_from_slice(&chunk[..take]);

        let overflow = chunk.len() - take;
        if overflow > 0 {
            if self.dropped == 0 {
                tracing::warn!(
                    capacity = self.capacity,
                    "Capture buffer full, dropping further samples"
                );
            }
            self.dropped += overflow;
        }
        take
    }

    /// The last `n` samples written, or fewer if less has been recorded.
    pub fn current_window(&self, n: usize) -> &[f32] {
        let start = self.samples.len().saturating_sub(n);
        &self.samples[start..]
    }

    /// Number of samples written since `start`.
    pub fn write_position(&self) -> usize {
        self.samples.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Stops the source and freezes the recording at the write position.
    ///
    /// A write position of zero (nothing captured) degrades to the full
    /// zero-filled capacity so the turn can continue.
    pub fn stop_and_trim(&mut self) -> TrimmedCapture {
        if self.recording {
            match self.source.read_samples() {
                Ok(chunk) => {
                    self.append(&chunk);
                }
                Err(e) => tracing::warn!(error = %e, "Final capture read failed"),
            }
            self.stop_source();
        }

        let position = self.samples.len();
        let mut samples = std::mem::take(&mut self.samples);
        let fallback = match trimmed_len(position, self.capacity) {
            Ok(len) => {
                samples.truncate(len);
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Using full capture capacity");
                samples.resize(self.capacity, 0.0);
                true
            }
        };

        tracing::debug!(
            samples = samples.len(),
            dropped = self.dropped,
            fallback,
            "Capture trimmed"
        );

        TrimmedCapture {
            audio: PcmAudio::new(samples, 1, self.sample_rate),
            fallback,
        }
    }

    /// Stops the source and throws away anything recorded.
    pub fn discard(&mut self) {
        if self.recording {
            self.stop_source();
        }
        self.samples.clear();
        self.dropped = 0;
    }

    fn stop_source(&mut self) {
        if let Err(e) = self.source.stop() {
            tracing::warn!(error = %e, "Failed to stop audio source");
        }
        self.recording = false;
    }
}

/// Validates a write position against the buffer capacity.
///
/// Returns the number of samples to keep, or `InvalidCaptureState` when the
/// position is zero or past the end.
pub fn trimmed_len(position: usize, capacity: usize) -> Result<usize> {
    if position == 0 || position > capacity {
        return Err(AvatarError::InvalidCaptureState { position, capacity });
    }
    Ok(position)
}
