//! Cartesia `/tts/bytes` synthesis returning a WAV container.

use crate::defaults;
use crate::error::{AvatarError, Result};
use crate::providers::{TextToSpeech, ensure_success};
use async_trait::async_trait;
use serde::Serialize;

pub const DEFAULT_URL: &str = "https://api.cartesia.ai/tts/bytes";
pub const DEFAULT_MODEL: &str = "sonic-2";
pub const DEFAULT_VOICE_ID: &str = "b8b49b88-c1af-4647-b02d-b18db1b8ded0";
pub const API_VERSION: &str = "2025-04-16";

const SERVICE: &str = "tts";

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    transcript: &'a str,
    model_id: &'a str,
    voice: Voice<'a>,
    output_format: OutputFormat,
    #[serde(flatten)]
    controls: VoiceControls,
}

/// Optional delivery controls; unset fields are left to the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct VoiceControls {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Voice<'a> {
    mode: &'static str,
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct OutputFormat {
    container: &'static str,
    encoding: &'static str,
    sample_rate: u32,
}

pub struct CartesiaClient {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    voice_id: String,
    sample_rate: u32,
    controls: VoiceControls,
}

impl CartesiaClient {
    /// # Errors
    ///
    /// Returns `ConfigInvalidValue` if the API key is empty.
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(AvatarError::ConfigInvalidValue {
                key: "tts.api_key".to_string(),
                message: "Cartesia API key required".to_string(),
            });
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            url: DEFAULT_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            sample_rate: defaults::TTS_SAMPLE_RATE,
            controls: VoiceControls::default(),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = voice_id.into();
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_controls(mut self, controls: VoiceControls) -> Self {
        self.controls = controls;
        self
    }

    fn request<'a>(&'a self, text: &'a str) -> SynthesisRequest<'a> {
        SynthesisRequest {
            transcript: text,
            model_id: &self.model,
            voice: Voice {
                mode: "id",
                id: &self.voice_id,
            },
            output_format: OutputFormat {
                container: "wav",
                encoding: "pcm_s16le",
                sample_rate: self.sample_rate,
            },
            controls: self.controls,
        }
    }
}

#[async_trait]
impl TextToSpeech for CartesiaClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        tracing::debug!(chars = text.len(), voice = %self.voice_id, "Requesting synthesis");

        let response = self
            .client
            .post(&self.url)
            .header("X-API-Key", &self.api_key)
            .header("Cartesia-Version", API_VERSION)
            .json(&self.request(text))
            .send()
            .await
            .map_err(|e| AvatarError::transport(SERVICE, e.to_string()))?;

        let audio = ensure_success(SERVICE, response)
            .await?
            .bytes()
            .await
            .map_err(|e| AvatarError::transport(SERVICE, e.to_string()))?;

        tracing::debug!(bytes = audio.len(), "Synthesis complete");
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_asks_for_pcm16_wav() {
        let client = CartesiaClient::new("key".to_string()).unwrap();

        let json = serde_json::to_value(client.request("Hello there")).unwrap();

        assert_eq!(json["transcript"], "Hello there");
        assert_eq!(json["model_id"], "sonic-2");
        assert_eq!(json["voice"]["mode"], "id");
        assert_eq!(json["voice"]["id"], DEFAULT_VOICE_ID);
        assert_eq!(json["output_format"]["container"], "wav");
        assert_eq!(json["output_format"]["encoding"], "pcm_s16le");
        assert_eq!(json["output_format"]["sample_rate"], 44100);
        assert!(json.get("rate").is_none());
        assert!(json.get("clarity").is_none());
        assert!(json.get("volume").is_none());
    }

    #[test]
    fn voice_controls_sit_at_top_level() {
        let client = CartesiaClient::new("key".to_string())
            .unwrap()
            .with_controls(VoiceControls {
                rate: Some(0.5),
                clarity: Some(1.0),
                volume: None,
            });

        let json = serde_json::to_value(client.request("x")).unwrap();

        assert_eq!(json["rate"], 0.5);
        assert_eq!(json["clarity"], 1.0);
        assert!(json.get("volume").is_none());
    }

    #[test]
    fn builder_overrides_voice_and_rate() {
        let client = CartesiaClient::new("key".to_string())
            .unwrap()
            .with_voice("other-voice")
            .with_sample_rate(22050);

        let json = serde_json::to_value(client.request("x")).unwrap();

        assert_eq!(json["voice"]["id"], "other-voice");
        assert_eq!(json["output_format"]["sample_rate"], 22050);
    }

    #[test]
    fn requires_api_key() {
        assert!(CartesiaClient::new(String::new()).is_err());
    }
}
