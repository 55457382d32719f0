use crate::audio::vad::VadConfig;
use crate::defaults;
use crate::error::{AvatarError, Result};
use crate::lipsync::{EnvelopeVisemes, LipSyncConfig};
use crate::pipeline::artifacts::ArtifactStore;
use crate::pipeline::controller::ControllerConfig;
use crate::pipeline::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub vad: VadSettings,
    pub pipeline: PipelineSettings,
    pub lipsync: LipSyncSettings,
    pub stt: ServiceConfig,
    pub llm: ServiceConfig,
    pub tts: TtsConfig,
}

/// Microphone configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    /// Output device for the avatar's voice.
    pub output_device: Option<String>,
    pub capture_sample_rate: u32,
    pub max_capture_secs: u32,
}

/// Voice activity detection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadSettings {
    pub silence_threshold: f32,
    pub silence_duration_ms: u64,
    pub warmup_ms: u64,
    pub window_size: usize,
}

/// Conversation behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub greeting: String,
    pub system_instruction: String,
    pub fallback_reply: String,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub playback_grace_ms: u64,
    /// Whether `recorded.wav` and `reply.wav` are written at all.
    pub save_artifacts: bool,
    /// Defaults to the platform data directory.
    pub artifacts_dir: Option<PathBuf>,
}

/// Lip-sync configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LipSyncSettings {
    pub gain: f32,
    pub full_scale: f32,
    /// Multiplier from playback loudness to jaw opening.
    pub envelope_sensitivity: f32,
    /// Blend shape index per viseme; -1 leaves the viseme unmapped.
    pub viseme_blend_shapes: Vec<i64>,
}

/// Credentials and endpoint for a cloud service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
}

/// Text-to-speech configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice_id: Option<String>,
    pub sample_rate: u32,
    /// Speaking rate sent with each request, service default when unset.
    pub rate: Option<f32>,
    pub clarity: Option<f32>,
    pub volume: Option<f32>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            output_device: None,
            capture_sample_rate: defaults::CAPTURE_SAMPLE_RATE,
            max_capture_secs: defaults::MAX_CAPTURE_SECS,
        }
    }
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            silence_threshold: defaults::SILENCE_THRESHOLD,
            silence_duration_ms: (defaults::SILENCE_DURATION_SECS * 1000.0) as u64,
            warmup_ms: (defaults::VAD_WARMUP_SECS * 1000.0) as u64,
            window_size: defaults::VAD_WINDOW_SIZE,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            greeting: defaults::GREETING.to_string(),
            system_instruction: defaults::SYSTEM_INSTRUCTION.to_string(),
            fallback_reply: defaults::FALLBACK_REPLY.to_string(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            max_attempts: defaults::MAX_ATTEMPTS,
            retry_backoff_ms: defaults::RETRY_BACKOFF_MS,
            playback_grace_ms: defaults::PLAYBACK_GRACE_MS,
            save_artifacts: true,
            artifacts_dir: None,
        }
    }
}

impl Default for LipSyncSettings {
    fn default() -> Self {
        Self {
            gain: defaults::LIPSYNC_GAIN,
            full_scale: defaults::BLEND_SHAPE_FULL_SCALE,
            envelope_sensitivity: defaults::ENVELOPE_SENSITIVITY,
            viseme_blend_shapes: (0..crate::lipsync::VISEME_COUNT as i64).collect(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: None,
            model: None,
            voice_id: None,
            sample_rate: defaults::TTS_SAMPLE_RATE,
            rate: None,
            clarity: None,
            volume: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    ///
    /// # Errors
    /// `ConfigFileNotFound` for a missing file, `Config` for invalid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AvatarError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                AvatarError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(AvatarError::ConfigFileNotFound { .. }) => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - AVATALK_AUDIO_DEVICE → audio.device
    /// - AVATALK_ARTIFACTS_DIR → pipeline.artifacts_dir
    /// - AVATALK_STT_API_KEY → stt.api_key
    /// - AVATALK_LLM_API_KEY → llm.api_key
    /// - AVATALK_LLM_MODEL → llm.model
    /// - AVATALK_TTS_API_KEY → tts.api_key
    /// - AVATALK_TTS_VOICE_ID → tts.voice_id
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(device) = env_value("AVATALK_AUDIO_DEVICE") {
            self.audio.device = Some(device);
        }
        if let Some(dir) = env_value("AVATALK_ARTIFACTS_DIR") {
            self.pipeline.artifacts_dir = Some(PathBuf::from(dir));
        }
        if let Some(key) = env_value("AVATALK_STT_API_KEY") {
            self.stt.api_key = Some(key);
        }
        if let Some(key) = env_value("AVATALK_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = env_value("AVATALK_LLM_MODEL") {
            self.llm.model = Some(model);
        }
        if let Some(key) = env_value("AVATALK_TTS_API_KEY") {
            self.tts.api_key = Some(key);
        }
        if let Some(voice) = env_value("AVATALK_TTS_VOICE_ID") {
            self.tts.voice_id = Some(voice);
        }
        self
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.capture_sample_rate == 0 {
            return Err(invalid("audio.capture_sample_rate", "must be positive"));
        }
        if self.audio.max_capture_secs == 0 {
            return Err(invalid("audio.max_capture_secs", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.vad.silence_threshold) {
            return Err(invalid("vad.silence_threshold", "must be between 0.0 and 1.0"));
        }
        if self.vad.window_size == 0 {
            return Err(invalid("vad.window_size", "must be positive"));
        }
        if self.pipeline.request_timeout_secs == 0 {
            return Err(invalid("pipeline.request_timeout_secs", "must be positive"));
        }
        if self.pipeline.max_attempts == 0 {
            return Err(invalid("pipeline.max_attempts", "must be at least 1"));
        }
        if self.tts.sample_rate == 0 {
            return Err(invalid("tts.sample_rate", "must be positive"));
        }
        if !self.lipsync.gain.is_finite() || self.lipsync.gain < 0.0 {
            return Err(invalid("lipsync.gain", "must be a non-negative number"));
        }
        if !self.lipsync.full_scale.is_finite() || self.lipsync.full_scale <= 0.0 {
            return Err(invalid("lipsync.full_scale", "must be positive"));
        }
        let sensitivity = self.lipsync.envelope_sensitivity;
        if !sensitivity.is_finite() || sensitivity <= 0.0 {
            return Err(invalid("lipsync.envelope_sensitivity", "must be positive"));
        }
        if let Some(bad) = self.lipsync.viseme_blend_shapes.iter().find(|&&i| i < -1) {
            return Err(invalid(
                "lipsync.viseme_blend_shapes",
                &format!("{bad} is not a blend shape index (use -1 to skip)"),
            ));
        }
        Ok(())
    }

    pub fn max_capture(&self) -> Duration {
        Duration::from_secs(u64::from(self.audio.max_capture_secs))
    }

    pub fn vad_config(&self) -> VadConfig {
        VadConfig {
            silence_threshold: self.vad.silence_threshold,
            silence_duration: Duration::from_millis(self.vad.silence_duration_ms),
            warmup: Duration::from_millis(self.vad.warmup_ms),
            window_size: self.vad.window_size,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let pipeline = &self.pipeline;
        ControllerConfig {
            greeting: pipeline.greeting.clone(),
            system_instruction: pipeline.system_instruction.clone(),
            fallback_reply: pipeline.fallback_reply.clone(),
            request_timeout: Duration::from_secs(pipeline.request_timeout_secs),
            retry: RetryPolicy {
                max_attempts: pipeline.max_attempts,
                base_delay: Duration::from_millis(pipeline.retry_backoff_ms),
                ..RetryPolicy::default()
            },
            playback_grace: Duration::from_millis(pipeline.playback_grace_ms),
            vad: self.vad_config(),
        }
    }

    pub fn lipsync_config(&self) -> LipSyncConfig {
        LipSyncConfig {
            gain: self.lipsync.gain,
            full_scale: self.lipsync.full_scale,
            viseme_blend_shapes: self
                .lipsync
                .viseme_blend_shapes
                .iter()
                .map(|&i| usize::try_from(i).ok())
                .collect(),
        }
    }

    pub fn viseme_source(&self) -> EnvelopeVisemes {
        EnvelopeVisemes::new().with_sensitivity(self.lipsync.envelope_sensitivity)
    }

    /// Where the per-turn WAV files go.
    pub fn artifact_store(&self) -> ArtifactStore {
        if !self.pipeline.save_artifacts {
            return ArtifactStore::disabled();
        }
        match self
            .pipeline
            .artifacts_dir
            .clone()
            .or_else(Self::default_artifacts_dir)
        {
            Some(dir) => ArtifactStore::new(dir),
            None => {
                tracing::warn!("No data directory available, artifacts disabled");
                ArtifactStore::disabled()
            }
        }
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/avatalk/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(defaults::APP_DIR)
            .join("config.toml")
    }

    /// ~/.local/share/avatalk on Linux
    pub fn default_artifacts_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join(defaults::APP_DIR))
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn invalid(key: &str, message: &str) -> AvatarError {
    AvatarError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
