//! Collaborators reached over the network or an audio device.
//!
//! Each seam is an `async_trait` so the controller can hold them as
//! `Arc<dyn ...>` and move clones into its request tasks.

#[cfg(feature = "http-providers")]
pub mod cartesia;
#[cfg(feature = "http-providers")]
pub mod deepgram;
#[cfg(feature = "http-providers")]
pub mod groq;
pub mod mock;

use crate::audio::PcmAudio;
use crate::error::Result;
use async_trait::async_trait;

/// Turns a recorded utterance into text.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribes a complete WAV file. An empty string means nothing was said.
    async fn transcribe(&self, wav: &[u8]) -> Result<String>;
}

/// Produces the avatar's reply to a prompt.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Renders reply text as speech.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Returns a complete WAV file.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Speaker output.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Plays the clip and resolves once playback has actually finished.
    async fn play(&self, audio: PcmAudio) -> Result<()>;
}

/// Replaces escaped `\n` sequences and real line breaks with single spaces.
///
/// Chat models like to format with newlines, which text-to-speech engines
/// read out or pause on awkwardly.
pub fn collapse_newlines(text: &str) -> String {
    text.replace("\\n", " ")
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
}

#[cfg(feature = "http-providers")]
pub(crate) async fn ensure_success(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    tracing::debug!(service, status = %status, "Received response");

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(service, status = %status, body = %body, "API error");
        return Err(crate::error::AvatarError::transport(
            service,
            format!("HTTP {status}: {body}"),
        ));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_newlines_handles_escaped_and_real_breaks() {
        assert_eq!(collapse_newlines("Hi!\\nHow are you?"), "Hi! How are you?");
        assert_eq!(collapse_newlines("one\ntwo\r\nthree\rfour"), "one two three four");
    }

    #[test]
    fn collapse_newlines_leaves_plain_text() {
        assert_eq!(collapse_newlines("Nothing to do."), "Nothing to do.");
    }
}
