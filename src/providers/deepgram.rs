//! Deepgram pre-recorded transcription.

use crate::error::{AvatarError, Result};
use crate::providers::{SpeechToText, ensure_success};
use async_trait::async_trait;
use serde::Deserialize;

pub const DEFAULT_URL: &str = "https://api.deepgram.com/v1/listen";

const SERVICE: &str = "stt";

#[derive(Debug, Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Debug, Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

pub struct DeepgramClient {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: Option<String>,
}

impl DeepgramClient {
    /// # Errors
    ///
    /// Returns `ConfigInvalidValue` if the API key is empty.
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(AvatarError::ConfigInvalidValue {
                key: "stt.api_key".to_string(),
                message: "Deepgram API key required".to_string(),
            });
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            url: DEFAULT_URL.to_string(),
            model: None,
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Requests a specific Deepgram model instead of the account default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[async_trait]
impl SpeechToText for DeepgramClient {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "Starting Deepgram transcription");

        let mut request = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(wav.to_vec());
        if let Some(model) = &self.model {
            request = request.query(&[("model", model.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AvatarError::transport(SERVICE, e.to_string()))?;
        let body = ensure_success(SERVICE, response)
            .await?
            .text()
            .await
            .map_err(|e| AvatarError::transport(SERVICE, e.to_string()))?;

        let transcript = parse_transcript(&body)?;
        tracing::info!(transcript = %transcript, "Transcription complete");
        Ok(transcript)
    }
}

/// Extracts `results.channels[0].alternatives[0].transcript`.
///
/// A body that does not have that shape is a transport failure, never an
/// empty transcript.
pub fn parse_transcript(body: &str) -> Result<String> {
    let response: DeepgramResponse = serde_json::from_str(body)
        .map_err(|e| AvatarError::transport(SERVICE, format!("unexpected response: {e}")))?;

    response
        .results
        .channels
        .into_iter()
        .next()
        .and_then(|channel| channel.alternatives.into_iter().next())
        .map(|alternative| alternative.transcript)
        .ok_or_else(|| AvatarError::transport(SERVICE, "response contained no alternatives"))
}
