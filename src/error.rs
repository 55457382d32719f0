//! Error types for avatalk.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AvatarError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Invalid capture position {position} for buffer of {capacity} samples")]
    InvalidCaptureState { position: usize, capacity: usize },

    // Playback errors
    #[error("Audio playback failed: {message}")]
    Playback { message: String },

    // WAV container errors
    #[error("Malformed WAV container: {message}")]
    MalformedContainer { message: String },

    #[error("Unsupported WAV format: {message}")]
    UnsupportedFormat { message: String },

    // Cloud collaborator errors
    #[error("{service} request failed: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("{service} request timed out after {after:?}")]
    Timeout {
        service: &'static str,
        after: Duration,
    },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl AvatarError {
    /// Shorthand for a transport failure against a named service.
    pub fn transport(service: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            service,
            message: message.into(),
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Only transport failures and timeouts qualify. A malformed or
    /// unsupported payload is dropped, never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, AvatarError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = AvatarError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = AvatarError::ConfigInvalidValue {
            key: "vad.window_size".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for vad.window_size: must be positive"
        );
    }

    #[test]
    fn test_invalid_capture_state_display() {
        let error = AvatarError::InvalidCaptureState {
            position: 0,
            capacity: 960_000,
        };
        assert_eq!(
            error.to_string(),
            "Invalid capture position 0 for buffer of 960000 samples"
        );
    }

    #[test]
    fn test_malformed_container_display() {
        let error = AvatarError::MalformedContainer {
            message: "no data chunk".to_string(),
        };
        assert_eq!(error.to_string(), "Malformed WAV container: no data chunk");
    }

    #[test]
    fn test_unsupported_format_display() {
        let error = AvatarError::UnsupportedFormat {
            message: "24 bits per sample".to_string(),
        };
        assert_eq!(error.to_string(), "Unsupported WAV format: 24 bits per sample");
    }

    #[test]
    fn test_transport_display() {
        let error = AvatarError::transport("stt", "HTTP 502");
        assert_eq!(error.to_string(), "stt request failed: HTTP 502");
    }

    #[test]
    fn test_timeout_display() {
        let error = AvatarError::Timeout {
            service: "llm",
            after: Duration::from_secs(30),
        };
        assert_eq!(error.to_string(), "llm request timed out after 30s");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AvatarError::transport("tts", "reset").is_retryable());
        assert!(
            AvatarError::Timeout {
                service: "tts",
                after: Duration::from_secs(1),
            }
            .is_retryable()
        );
        assert!(
            !AvatarError::MalformedContainer {
                message: "x".to_string()
            }
            .is_retryable()
        );
        assert!(
            !AvatarError::UnsupportedFormat {
                message: "x".to_string()
            }
            .is_retryable()
        );
        assert!(!AvatarError::Other("x".to_string()).is_retryable());
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: AvatarError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: AvatarError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: AvatarError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<AvatarError>();
        assert_sync::<AvatarError>();
    }
}
