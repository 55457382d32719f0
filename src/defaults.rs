//! Default configuration constants for avatalk.
//!
//! Shared by the config file types and the component configs so that both
//! agree on what "unset" means.

/// Capture sample rate in Hz.
///
/// Speech-to-text services are happiest with 16kHz mono.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate requested from the text-to-speech service.
pub const TTS_SAMPLE_RATE: u32 = 44100;

/// Maximum length of a single recorded utterance, in seconds.
pub const MAX_CAPTURE_SECS: u32 = 60;

/// Peak amplitude below which a window counts as silence.
pub const SILENCE_THRESHOLD: f32 = 0.05;

/// Seconds of continuous silence that end the user's utterance.
pub const SILENCE_DURATION_SECS: f32 = 2.0;

/// Seconds after capture start during which the detector ignores the mic.
///
/// Swallows the click most microphones emit when they open.
pub const VAD_WARMUP_SECS: f32 = 1.0;

/// Samples inspected per VAD tick.
pub const VAD_WINDOW_SIZE: usize = 128;

/// Line spoken when the session starts.
pub const GREETING: &str = "Hello! How are you today? Tell me about your day.";

/// Instruction prepended to every user transcript.
pub const SYSTEM_INSTRUCTION: &str = "You are a conversational AI agent who asks users about their well being. \
DO NOT INCLUDE ASTERISKS OR ANY SPECIAL CHARACTERS IN YOUR OUTPUT. \
You're integrated with a text-to-speech engine, converting your words to a human-like voice. \
Don't use any special characters in your output as it sounds bad when using that with our Text-to-speech engine. \
Keep the conversation engaging. \
Don't hallucinate, if the information to a direct question isn't included then you don't have the information to answer the question.";

/// Line spoken when a turn could not be completed.
pub const FALLBACK_REPLY: &str = "Sorry, I had trouble with that. Could you say it again?";

/// Upper bound for a single cloud request, in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Attempts per cloud request before the turn falls back.
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay before the first retry, in milliseconds. Doubles per attempt.
pub const RETRY_BACKOFF_MS: u64 = 500;

/// Slack added to a clip's duration before playback is considered stuck.
pub const PLAYBACK_GRACE_MS: u64 = 2000;

/// Gain applied to viseme values before they become blend-shape weights.
pub const LIPSYNC_GAIN: f32 = 0.7;

/// Blend-shape weight corresponding to a viseme value of 1.0.
pub const BLEND_SHAPE_FULL_SCALE: f32 = 100.0;

/// RMS-to-jaw-open multiplier for envelope visemes. Speech sits around 0.1-0.3 RMS.
pub const ENVELOPE_SENSITIVITY: f32 = 4.0;

/// File name of the most recent captured utterance.
pub const RECORDED_WAV: &str = "recorded.wav";

/// File name of the most recent synthesized reply.
pub const REPLY_WAV: &str = "reply.wav";

/// Directory name used under the platform data directory.
pub const APP_DIR: &str = "avatalk";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_instruction_is_one_line() {
        assert!(!SYSTEM_INSTRUCTION.contains('\n'));
        assert!(SYSTEM_INSTRUCTION.starts_with("You are a conversational AI agent"));
    }

    #[test]
    fn capture_rate_differs_from_playback_rate() {
        assert_eq!(CAPTURE_SAMPLE_RATE, 16000);
        assert_eq!(TTS_SAMPLE_RATE, 44100);
    }
}
