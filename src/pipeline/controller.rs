//! The conversation turn machine.
//!
//! [`TurnController`] drives one avatar through greeting, listening,
//! transcription, generation and speech. Every external request runs as a
//! spawned task tagged with a call id; the task reports back over a channel
//! and [`TurnController::dispatch`] applies a completion only when its id
//! matches the single pending call. Anything else is stale and dropped.
//!
//! The host calls [`TurnController::tick`] once per frame. Async hosts and
//! tests can also await [`TurnController::next_event`].

use crate::audio::capture_buffer::CaptureBuffer;
use crate::audio::vad::{Vad, VadConfig, VadState};
use crate::audio::wav;
use crate::defaults;
use crate::error::{AvatarError, Result};
use crate::lipsync::LipSyncDriver;
use crate::pipeline::artifacts::ArtifactStore;
use crate::pipeline::latency::{LatencyTracker, Stage, TurnTiming};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::state::PipelineState;
use crate::providers::{AudioOutput, LanguageModel, SpeechToText, TextToSpeech, collapse_newlines};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Behaviour of the turn machine.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Spoken once by `start`. Empty skips straight to listening.
    pub greeting: String,
    /// Prepended to every transcript, separated by one space.
    pub system_instruction: String,
    /// Spoken when a turn cannot be completed.
    pub fallback_reply: String,
    /// Bound on each STT, LLM and TTS attempt.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Added to the clip length to bound playback.
    pub playback_grace: Duration,
    pub vad: VadConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            greeting: defaults::GREETING.to_string(),
            system_instruction: defaults::SYSTEM_INSTRUCTION.to_string(),
            fallback_reply: defaults::FALLBACK_REPLY.to_string(),
            request_timeout: Duration::from_secs(defaults::REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            playback_grace: Duration::from_millis(defaults::PLAYBACK_GRACE_MS),
            vad: VadConfig::default(),
        }
    }
}

/// The external services a controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn TextToSpeech>,
    pub output: Arc<dyn AudioOutput>,
}

/// Kind of the request currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Transcribe,
    Generate,
    Synthesize,
    Playback,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallKind::Transcribe => "transcribe",
            CallKind::Generate => "generate",
            CallKind::Synthesize => "synthesize",
            CallKind::Playback => "playback",
        };
        f.write_str(name)
    }
}

/// Outcome of handling one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The completion belonged to the pending call and was applied.
    Applied(CallKind),
    /// The completion's call id was not pending and was discarded.
    Stale { id: u64 },
}

#[derive(Debug)]
enum Completion {
    Transcript(Result<String>),
    Reply(Result<String>),
    Speech(Result<Vec<u8>>),
    PlaybackFinished(Result<()>),
}

/// What the clip being synthesized or played is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpeechPurpose {
    Greeting,
    Reply,
    Fallback,
}

struct PendingCall {
    id: u64,
    kind: CallKind,
    handle: JoinHandle<()>,
}

pub struct TurnController {
    config: ControllerConfig,
    collaborators: Collaborators,
    capture: CaptureBuffer,
    vad: Vad,
    driver: LipSyncDriver,
    artifacts: ArtifactStore,
    state: PipelineState,
    purpose: SpeechPurpose,
    next_call_id: u64,
    pending: Option<PendingCall>,
    tx: mpsc::UnboundedSender<(u64, Completion)>,
    rx: mpsc::UnboundedReceiver<(u64, Completion)>,
    last_error: Option<AvatarError>,
    turn: u64,
    timing: Option<TurnTiming>,
    latency: LatencyTracker,
}

impl TurnController {
    pub fn new(
        config: ControllerConfig,
        collaborators: Collaborators,
        capture: CaptureBuffer,
        driver: LipSyncDriver,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let vad = Vad::new(config.vad);
        Self {
            config,
            collaborators,
            capture,
            vad,
            driver,
            artifacts: ArtifactStore::disabled(),
            state: PipelineState::Idle,
            purpose: SpeechPurpose::Greeting,
            next_call_id: 1,
            pending: None,
            tx,
            rx,
            last_error: None,
            turn: 0,
            timing: None,
            latency: LatencyTracker::new(),
        }
    }

    /// Persist `recorded.wav` and `reply.wav` through `store`.
    pub fn with_artifacts(mut self, store: ArtifactStore) -> Self {
        self.artifacts = store;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Error that halted the controller, if any.
    pub fn last_error(&self) -> Option<&AvatarError> {
        self.last_error.as_ref()
    }

    pub fn vad_state(&self) -> VadState {
        self.vad.state()
    }

    /// Id and kind of the request in flight.
    pub fn pending_call(&self) -> Option<(u64, CallKind)> {
        self.pending.as_ref().map(|p| (p.id, p.kind))
    }

    pub fn is_vocalizing(&self) -> bool {
        self.driver.is_vocalizing()
    }

    /// Receiver tracking the avatar's vocalizing flag.
    pub fn vocalizing(&self) -> watch::Receiver<bool> {
        self.driver.subscribe()
    }

    /// Number of listening turns started so far.
    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn latency(&self) -> &LatencyTracker {
        &self.latency
    }

    /// Speaks the greeting, then starts listening.
    pub fn start(&mut self) -> Result<()> {
        if self.state != PipelineState::Idle {
            return Err(AvatarError::Other(format!(
                "cannot start while {}",
                self.state
            )));
        }
        self.last_error = None;

        if self.config.greeting.trim().is_empty() {
            return self.begin_listening();
        }
        self.set_state(PipelineState::Greeting);
        let greeting = self.config.greeting.clone();
        self.speak(SpeechPurpose::Greeting, greeting);
        Ok(())
    }

    /// Leaves the halted state and listens again.
    pub fn restart(&mut self) -> Result<()> {
        if self.state != PipelineState::Idle {
            return Err(AvatarError::Other(format!(
                "cannot restart while {}",
                self.state
            )));
        }
        self.last_error = None;
        self.begin_listening()
    }

    /// Per-frame update: applies finished requests, feeds the detector
    /// while listening and advances lip sync.
    pub fn tick(&mut self, dt: Duration) {
        while let Ok((id, completion)) = self.rx.try_recv() {
            self.dispatch(id, completion);
        }

        if self.state == PipelineState::Listening {
            if let Err(e) = self.capture.poll() {
                self.halt(e);
                return;
            }
            let window = self.capture.current_window(self.vad.config().window_size);
            let vad_tick = self.vad.tick(window, dt);

            if vad_tick.silence_elapsed {
                tracing::debug!(silence = ?self.vad.state().silence_timer, "Silence detected");
                self.end_of_speech();
            } else if self.capture.write_position() >= self.capture.capacity() {
                tracing::info!("Maximum recording length reached");
                self.end_of_speech();
            }
        }

        self.driver.tick(dt);
    }

    /// Ends the user's utterance and sends it for transcription.
    ///
    /// Returns false, doing nothing, unless the controller is listening.
    pub fn end_of_speech(&mut self) -> bool {
        if self.state != PipelineState::Listening {
            tracing::debug!(state = %self.state, "Ignoring end of speech");
            return false;
        }

        let now = Instant::now();
        let trimmed = self.capture.stop_and_trim();
        let wav = wav::encode_audio(&trimmed.audio);
        self.artifacts.save_recording(&wav);

        if let Some(timing) = self.timing.as_mut() {
            let elapsed = timing.mark(Stage::SpeechEnd, now);
            timing.spoken_audio = trimmed.audio.duration();
            tracing::debug!(elapsed = ?elapsed, spoken = ?timing.spoken_audio, "Speech ended");
        }

        self.set_state(PipelineState::Transcribing);
        self.request_transcript(wav);
        true
    }

    /// Waits for the next completion and applies it.
    ///
    /// With nothing in flight only already-delivered completions are
    /// returned; otherwise `None`.
    pub async fn next_event(&mut self) -> Option<Dispatch> {
        let (id, completion) = if self.pending.is_some() {
            self.rx.recv().await?
        } else {
            self.rx.try_recv().ok()?
        };
        Some(self.dispatch(id, completion))
    }

    /// Cancels the request in flight, releases the microphone, stops
    /// speaking and goes idle.
    pub fn shutdown(&mut self) {
        self.abort_pending();
        self.capture.discard();
        self.driver.stop();
        self.timing = None;
        self.set_state(PipelineState::Idle);
        self.latency.log_summary();
    }

    fn dispatch(&mut self, id: u64, completion: Completion) -> Dispatch {
        let kind = match self.pending.take() {
            Some(pending) if pending.id == id => pending.kind,
            other => {
                self.pending = other;
                tracing::debug!(id, "Discarding stale completion");
                return Dispatch::Stale { id };
            }
        };

        match completion {
            Completion::Transcript(result) => self.on_transcript(result),
            Completion::Reply(result) => self.on_reply(result),
            Completion::Speech(result) => self.on_speech(result),
            Completion::PlaybackFinished(result) => self.on_playback_finished(result),
        }
        Dispatch::Applied(kind)
    }

    fn on_transcript(&mut self, result: Result<String>) {
        let transcript = match result {
            Ok(transcript) => transcript,
            Err(e) => return self.fail_turn(e),
        };
        self.mark(Stage::Transcribed);

        let transcript = transcript.trim();
        if transcript.is_empty() {
            tracing::info!("Nothing heard, listening again");
            return self.listen_or_halt();
        }
        tracing::info!(transcript, "User said");

        let prompt = compose_prompt(&self.config.system_instruction, transcript);
        self.set_state(PipelineState::Generating);
        self.request_reply(prompt);
    }

    fn on_reply(&mut self, result: Result<String>) {
        let reply = match result {
            Ok(reply) => collapse_newlines(&reply),
            Err(e) => return self.fail_turn(e),
        };
        self.mark(Stage::Generated);

        let reply = reply.trim();
        if reply.is_empty() {
            return self.fail_turn(AvatarError::transport("llm", "empty reply"));
        }
        tracing::info!(reply, "Avatar says");

        self.set_state(PipelineState::Speaking);
        self.speak(SpeechPurpose::Reply, reply.to_string());
    }

    fn on_speech(&mut self, result: Result<Vec<u8>>) {
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => return self.speech_failed(e),
        };
        if self.purpose == SpeechPurpose::Reply {
            self.mark(Stage::Synthesized);
        }
        self.artifacts.save_reply(&bytes);

        let audio = match wav::decode(&bytes) {
            Ok(audio) => audio,
            Err(e) => return self.speech_failed(e),
        };

        self.driver.begin(&audio);
        let output = Arc::clone(&self.collaborators.output);
        let limit = audio.duration() + self.config.playback_grace;
        self.spawn_call(CallKind::Playback, async move {
            let result = match tokio::time::timeout(limit, output.play(audio)).await {
                Ok(result) => result,
                Err(_) => Err(AvatarError::Timeout {
                    service: "playback",
                    after: limit,
                }),
            };
            Completion::PlaybackFinished(result)
        });
    }

    fn on_playback_finished(&mut self, result: Result<()>) {
        if let Err(e) = result {
            return self.halt(e);
        }
        self.driver.stop();

        match self.purpose {
            SpeechPurpose::Greeting => {}
            SpeechPurpose::Reply => {
                self.mark(Stage::PlaybackDone);
                if let Some(timing) = self.timing.take() {
                    LatencyTracker::log_turn(&timing, self.turn);
                    self.latency.record(timing);
                }
                self.set_state(PipelineState::Cooldown);
            }
            SpeechPurpose::Fallback => self.set_state(PipelineState::Cooldown),
        }
        self.listen_or_halt();
    }

    /// Synthesis or decoding of a clip failed.
    fn speech_failed(&mut self, error: AvatarError) {
        match self.purpose {
            SpeechPurpose::Greeting => {
                tracing::warn!(error = %error, "Greeting unavailable, listening instead");
                self.listen_or_halt();
            }
            SpeechPurpose::Reply => self.fail_turn(error),
            SpeechPurpose::Fallback => self.halt(error),
        }
    }

    /// Gives up on the current turn and speaks the fallback line.
    fn fail_turn(&mut self, error: AvatarError) {
        tracing::warn!(error = %error, turn = self.turn, "Turn failed, speaking fallback");
        self.timing = None;
        self.set_state(PipelineState::Speaking);
        let fallback = self.config.fallback_reply.clone();
        self.speak(SpeechPurpose::Fallback, fallback);
    }

    /// Stops everything and waits for `restart`.
    fn halt(&mut self, error: AvatarError) {
        tracing::error!(error = %error, state = %self.state, "Conversation halted");
        self.abort_pending();
        self.capture.discard();
        self.driver.stop();
        self.timing = None;
        self.set_state(PipelineState::Idle);
        self.last_error = Some(error);
    }

    fn begin_listening(&mut self) -> Result<()> {
        self.vad.reset();
        self.capture.start()?;
        self.turn += 1;
        self.timing = Some(TurnTiming::new(Instant::now()));
        self.set_state(PipelineState::Listening);
        Ok(())
    }

    fn listen_or_halt(&mut self) {
        if let Err(e) = self.begin_listening() {
            self.halt(e);
        }
    }

    fn speak(&mut self, purpose: SpeechPurpose, text: String) {
        self.purpose = purpose;
        let tts = Arc::clone(&self.collaborators.tts);
        let (retry, timeout) = (self.config.retry, self.config.request_timeout);
        self.spawn_call(CallKind::Synthesize, async move {
            Completion::Speech(retry.run("tts", timeout, || tts.synthesize(&text)).await)
        });
    }

    fn request_transcript(&mut self, wav: Vec<u8>) {
        let stt = Arc::clone(&self.collaborators.stt);
        let (retry, timeout) = (self.config.retry, self.config.request_timeout);
        self.spawn_call(CallKind::Transcribe, async move {
            Completion::Transcript(retry.run("stt", timeout, || stt.transcribe(&wav)).await)
        });
    }

    fn request_reply(&mut self, prompt: String) {
        let llm = Arc::clone(&self.collaborators.llm);
        let (retry, timeout) = (self.config.retry, self.config.request_timeout);
        self.spawn_call(CallKind::Generate, async move {
            Completion::Reply(retry.run("llm", timeout, || llm.generate(&prompt)).await)
        });
    }

    fn spawn_call<F>(&mut self, kind: CallKind, request: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        self.abort_pending();
        let id = self.next_call_id;
        self.next_call_id += 1;

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let completion = request.await;
            // The controller may already be gone.
            let _ = tx.send((id, completion));
        });
        tracing::debug!(id, kind = %kind, "Request issued");
        self.pending = Some(PendingCall { id, kind, handle });
    }

    fn abort_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.abort();
            tracing::debug!(id = pending.id, kind = %pending.kind, "Request cancelled");
        }
    }

    fn mark(&mut self, stage: Stage) {
        if let Some(timing) = self.timing.as_mut() {
            timing.mark(stage, Instant::now());
        }
    }

    fn set_state(&mut self, next: PipelineState) {
        if self.state != next {
            tracing::info!(from = %self.state, to = %next, turn = self.turn, "State transition");
            self.state = next;
        }
    }
}

/// The prompt sent to the language model for one transcript.
pub fn compose_prompt(instruction: &str, transcript: &str) -> String {
    format!("{instruction} {transcript}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_joins_with_single_space() {
        assert_eq!(
            compose_prompt("Answer briefly.", "What time is it?"),
            "Answer briefly. What time is it?"
        );
    }

    #[test]
    fn call_kind_display() {
        assert_eq!(CallKind::Transcribe.to_string(), "transcribe");
        assert_eq!(CallKind::Playback.to_string(), "playback");
    }

    #[test]
    fn default_config_uses_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.playback_grace, Duration::from_secs(2));
    }
}
