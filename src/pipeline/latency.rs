//! Per-turn latency measurement and reporting.
//!
//! Diagnostic only: nothing in the controller branches on these numbers.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Points in a turn that get timestamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The detector decided the user stopped talking.
    SpeechEnd,
    Transcribed,
    Generated,
    Synthesized,
    PlaybackDone,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::SpeechEnd => "speech_end",
            Stage::Transcribed => "transcribed",
            Stage::Generated => "generated",
            Stage::Synthesized => "synthesized",
            Stage::PlaybackDone => "playback_done",
        };
        f.write_str(name)
    }
}

/// Timing information for a single listen-reply turn.
#[derive(Debug, Clone)]
pub struct TurnTiming {
    /// When listening began.
    pub turn_start: Instant,
    pub speech_end: Option<Instant>,
    pub transcribed: Option<Instant>,
    pub generated: Option<Instant>,
    pub synthesized: Option<Instant>,
    pub playback_done: Option<Instant>,
    /// Length of the user's recorded utterance.
    pub spoken_audio: Duration,
}

impl TurnTiming {
    pub fn new(turn_start: Instant) -> Self {
        Self {
            turn_start,
            speech_end: None,
            transcribed: None,
            generated: None,
            synthesized: None,
            playback_done: None,
            spoken_audio: Duration::ZERO,
        }
    }

    /// Timestamps `stage` and returns the time since the turn started.
    pub fn mark(&mut self, stage: Stage, at: Instant) -> Duration {
        let slot = match stage {
            Stage::SpeechEnd => &mut self.speech_end,
            Stage::Transcribed => &mut self.transcribed,
            Stage::Generated => &mut self.generated,
            Stage::Synthesized => &mut self.synthesized,
            Stage::PlaybackDone => &mut self.playback_done,
        };
        *slot = Some(at);
        at.saturating_duration_since(self.turn_start)
    }

    /// Time spent waiting for the transcript.
    pub fn transcription_latency(&self) -> Option<Duration> {
        span(self.speech_end, self.transcribed)
    }

    /// Time spent waiting for the language model.
    pub fn generation_latency(&self) -> Option<Duration> {
        span(self.transcribed, self.generated)
    }

    /// Time spent waiting for synthesized audio.
    pub fn synthesis_latency(&self) -> Option<Duration> {
        span(self.generated, self.synthesized)
    }

    /// Silence the user sits through between finishing their sentence and
    /// the avatar starting to talk.
    pub fn perceived_wait(&self) -> Option<Duration> {
        span(self.speech_end, self.synthesized)
    }

    /// Listening start to end of the reply.
    pub fn total(&self) -> Option<Duration> {
        span(Some(self.turn_start), self.playback_done)
    }

    /// Whether every stage was reached.
    pub fn is_complete(&self) -> bool {
        self.speech_end.is_some()
            && self.transcribed.is_some()
            && self.generated.is_some()
            && self.synthesized.is_some()
            && self.playback_done.is_some()
    }
}

fn span(from: Option<Instant>, to: Option<Instant>) -> Option<Duration> {
    Some(to?.saturating_duration_since(from?))
}

/// Aggregated latency statistics.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub count: usize,
    pub transcription_avg: Duration,
    pub generation_avg: Duration,
    pub synthesis_avg: Duration,
    pub spoken_audio_avg: Duration,
    pub perceived_wait_avg: Duration,
    pub perceived_wait_min: Duration,
    pub perceived_wait_max: Duration,
}

/// Collects completed turns and reports on them.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    measurements: Vec<TurnTiming>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a turn. Turns that did not reach every stage are ignored.
    pub fn record(&mut self, timing: TurnTiming) {
        if timing.is_complete() {
            self.measurements.push(timing);
        }
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Computes aggregated statistics.
    pub fn stats(&self) -> Option<LatencyStats> {
        let collect = |f: fn(&TurnTiming) -> Option<Duration>| -> Vec<Duration> {
            self.measurements.iter().filter_map(f).collect()
        };

        let perceived_waits = collect(TurnTiming::perceived_wait);
        let perceived_wait_min = *perceived_waits.iter().min()?;
        let perceived_wait_max = *perceived_waits.iter().max()?;
        let spoken: Vec<Duration> = self.measurements.iter().map(|t| t.spoken_audio).collect();

        Some(LatencyStats {
            count: self.measurements.len(),
            transcription_avg: avg_duration(&collect(TurnTiming::transcription_latency)),
            generation_avg: avg_duration(&collect(TurnTiming::generation_latency)),
            synthesis_avg: avg_duration(&collect(TurnTiming::synthesis_latency)),
            spoken_audio_avg: avg_duration(&spoken),
            perceived_wait_avg: avg_duration(&perceived_waits),
            perceived_wait_min,
            perceived_wait_max,
        })
    }

    /// Logs a summary of the session.
    pub fn log_summary(&self) {
        let Some(stats) = self.stats() else {
            tracing::info!("No completed turns");
            return;
        };
        tracing::info!(
            turns = stats.count,
            spoken_avg = %format_duration(stats.spoken_audio_avg),
            wait_avg = %format_duration(stats.perceived_wait_avg),
            wait_min = %format_duration(stats.perceived_wait_min),
            wait_max = %format_duration(stats.perceived_wait_max),
            stt_avg = %format_duration(stats.transcription_avg),
            llm_avg = %format_duration(stats.generation_avg),
            tts_avg = %format_duration(stats.synthesis_avg),
            "Session summary"
        );
    }

    /// Logs timing for a single turn.
    pub fn log_turn(timing: &TurnTiming, turn: u64) {
        let fmt = |d: Option<Duration>| d.map(format_duration).unwrap_or_else(|| "-".to_string());
        tracing::info!(
            turn,
            spoken = %format_duration(timing.spoken_audio),
            wait = %fmt(timing.perceived_wait()),
            stt = %fmt(timing.transcription_latency()),
            llm = %fmt(timing.generation_latency()),
            tts = %fmt(timing.synthesis_latency()),
            "Turn latency"
        );
    }
}

/// Formats a duration as a human-friendly string.
/// Under 1s: "450ms", at or above 1s: "1.5s".
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

/// Calculates average duration from a slice.
fn avg_duration(durations: &[Duration]) -> Duration {
    if durations.is_empty() {
        return Duration::ZERO;
    }
    let sum: Duration = durations.iter().sum();
    sum / durations.len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_turn(start: Instant, offsets_ms: [u64; 5], spoken_ms: u64) -> TurnTiming {
        let mut timing = TurnTiming::new(start);
        let stages = [
            Stage::SpeechEnd,
            Stage::Transcribed,
            Stage::Generated,
            Stage::Synthesized,
            Stage::PlaybackDone,
        ];
        for (stage, ms) in stages.into_iter().zip(offsets_ms) {
            timing.mark(stage, start + Duration::from_millis(ms));
        }
        timing.spoken_audio = Duration::from_millis(spoken_ms);
        timing
    }

    #[test]
    fn test_mark_returns_elapsed_since_turn_start() {
        let start = Instant::now();
        let mut timing = TurnTiming::new(start);

        let elapsed = timing.mark(Stage::SpeechEnd, start + Duration::from_millis(2500));

        assert_eq!(elapsed, Duration::from_millis(2500));
        assert!(!timing.is_complete());
    }

    #[test]
    fn test_stage_latencies() {
        let start = Instant::now();
        let timing = complete_turn(start, [3000, 3400, 4100, 4600, 7600], 1200);

        assert!(timing.is_complete());
        assert_eq!(timing.transcription_latency(), Some(Duration::from_millis(400)));
        assert_eq!(timing.generation_latency(), Some(Duration::from_millis(700)));
        assert_eq!(timing.synthesis_latency(), Some(Duration::from_millis(500)));
        assert_eq!(timing.perceived_wait(), Some(Duration::from_millis(1600)));
        assert_eq!(timing.total(), Some(Duration::from_millis(7600)));
    }

    #[test]
    fn test_missing_stage_yields_none() {
        let start = Instant::now();
        let mut timing = TurnTiming::new(start);
        timing.mark(Stage::SpeechEnd, start);

        assert_eq!(timing.transcription_latency(), None);
        assert_eq!(timing.perceived_wait(), None);
    }

    #[test]
    fn test_latency_tracker_empty() {
        let tracker = LatencyTracker::new();
        assert!(tracker.stats().is_none());
    }

    #[test]
    fn test_incomplete_turns_are_not_recorded() {
        let mut tracker = LatencyTracker::new();

        tracker.record(TurnTiming::new(Instant::now()));

        assert!(tracker.is_empty());
    }

    #[test]
    fn test_latency_tracker_multiple_measurements() {
        let mut tracker = LatencyTracker::new();
        let start = Instant::now();

        tracker.record(complete_turn(start, [3000, 3400, 4100, 4600, 7600], 1000));
        tracker.record(complete_turn(start, [2000, 2200, 2600, 3000, 5000], 3000));

        let stats = tracker.stats().unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.perceived_wait_min, Duration::from_millis(1000));
        assert_eq!(stats.perceived_wait_max, Duration::from_millis(1600));
        assert_eq!(stats.perceived_wait_avg, Duration::from_millis(1300));
        assert_eq!(stats.transcription_avg, Duration::from_millis(300));
        assert_eq!(stats.spoken_audio_avg, Duration::from_millis(2000));
    }

    #[test]
    fn test_format_duration_millis() {
        assert_eq!(format_duration(Duration::from_millis(0)), "0ms");
        assert_eq!(format_duration(Duration::from_millis(450)), "450ms");
        assert_eq!(format_duration(Duration::from_millis(999)), "999ms");
    }

    #[test]
    fn test_format_duration_seconds() {
        assert_eq!(format_duration(Duration::from_millis(1000)), "1.0s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_millis(3750)), "3.8s");
    }

    #[test]
    fn test_avg_duration_empty() {
        assert_eq!(avg_duration(&[]), Duration::ZERO);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::PlaybackDone.to_string(), "playback_done");
    }
}
