//! Scripted collaborators for tests and offline runs.
//!
//! Every mock answers from a queue of [`Step`]s and repeats its fallback
//! answer once the queue is empty. Delays use `tokio::time`, so tests with a
//! paused clock run instantly.

use crate::audio::{PcmAudio, wav};
use crate::error::{AvatarError, Result};
use crate::providers::{AudioOutput, LanguageModel, SpeechToText, TextToSpeech};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum Step<T> {
    Reply(T),
    /// Fails with a retryable transport error.
    Fail(String),
    /// Never answers.
    Hang,
}

#[derive(Debug)]
struct Script<T> {
    steps: Mutex<VecDeque<Step<T>>>,
    fallback: Step<T>,
    delay: Duration,
    calls: AtomicUsize,
    inputs: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T: Clone> Script<T> {
    fn new(fallback: Step<T>) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    async fn answer(&self, service: &'static str, input: String) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.inputs).push(input);
        let step = lock(&self.steps)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match step {
            Step::Reply(value) => Ok(value),
            Step::Fail(message) => Err(AvatarError::transport(service, message)),
            Step::Hang => std::future::pending().await,
        }
    }

    fn push(&self, step: Step<T>) {
        lock(&self.steps).push_back(step);
    }
}

macro_rules! scripted_builders {
    ($ty:ty, $value:ty) => {
        impl $ty {
            /// Queue a successful answer.
            pub fn then_reply(self, value: impl Into<$value>) -> Self {
                self.script.push(Step::Reply(value.into()));
                self
            }

            /// Queue a transport failure.
            pub fn then_fail(self, message: &str) -> Self {
                self.script.push(Step::Fail(message.to_string()));
                self
            }

            /// Queue an answer that never arrives.
            pub fn then_hang(self) -> Self {
                self.script.push(Step::Hang);
                self
            }

            /// Answer used once the queue is exhausted.
            pub fn otherwise(mut self, step: Step<$value>) -> Self {
                self.script.fallback = step;
                self
            }

            /// Simulated round-trip time.
            pub fn with_delay(mut self, delay: Duration) -> Self {
                self.script.delay = delay;
                self
            }

            pub fn calls(&self) -> usize {
                self.script.calls.load(Ordering::SeqCst)
            }

            /// Inputs seen so far, in call order.
            pub fn inputs(&self) -> Vec<String> {
                lock(&self.script.inputs).clone()
            }
        }
    };
}

#[derive(Debug)]
pub struct MockSpeechToText {
    script: Script<String>,
}

impl MockSpeechToText {
    pub fn new(transcript: &str) -> Self {
        Self {
            script: Script::new(Step::Reply(transcript.to_string())),
        }
    }
}

scripted_builders!(MockSpeechToText, String);

#[async_trait]
impl SpeechToText for MockSpeechToText {
    /// Records the byte length of each upload.
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        self.script.answer("stt", wav.len().to_string()).await
    }
}

#[derive(Debug)]
pub struct MockLanguageModel {
    script: Script<String>,
}

impl MockLanguageModel {
    pub fn new(reply: &str) -> Self {
        Self {
            script: Script::new(Step::Reply(reply.to_string())),
        }
    }
}

scripted_builders!(MockLanguageModel, String);

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.script.answer("llm", prompt.to_string()).await
    }
}

#[derive(Debug)]
pub struct MockTextToSpeech {
    script: Script<Vec<u8>>,
}

impl MockTextToSpeech {
    /// Answers every request with `clip` encoded as WAV.
    pub fn new(clip: &PcmAudio) -> Self {
        Self {
            script: Script::new(Step::Reply(wav::encode_audio(clip))),
        }
    }
}

scripted_builders!(MockTextToSpeech, Vec<u8>);

#[async_trait]
impl TextToSpeech for MockTextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.script.answer("tts", text.to_string()).await
    }
}

/// Output that "plays" a clip by sleeping for its duration.
#[derive(Debug)]
pub struct MockAudioOutput {
    script: Script<()>,
    played: Mutex<Vec<Duration>>,
}

impl MockAudioOutput {
    pub fn new() -> Self {
        Self {
            script: Script::new(Step::Reply(())),
            played: Mutex::new(Vec::new()),
        }
    }

    /// Queue a device failure for the next clip.
    pub fn then_fail(self, message: &str) -> Self {
        self.script.push(Step::Fail(message.to_string()));
        self
    }

    /// Queue a clip that never finishes playing.
    pub fn then_hang(self) -> Self {
        self.script.push(Step::Hang);
        self
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    /// Durations of the clips handed to `play`.
    pub fn played(&self) -> Vec<Duration> {
        lock(&self.played).clone()
    }
}

impl Default for MockAudioOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioOutput for MockAudioOutput {
    async fn play(&self, audio: PcmAudio) -> Result<()> {
        let duration = audio.duration();
        lock(&self.played).push(duration);

        self.script
            .answer("playback", format!("{duration:?}"))
            .await
            .map_err(|e| AvatarError::Playback {
                message: e.to_string(),
            })?;
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

/// A mono sine tone, handy as canned synthesized speech.
pub fn tone(duration: Duration, sample_rate: u32) -> PcmAudio {
    let frames = (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize;
    let samples = (0..frames)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.5 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
        })
        .collect();
    PcmAudio::new(samples, 1, sample_rate)
}
