//! States of the conversation turn machine.

use std::fmt;

/// Where the controller is in the conversation loop.
///
/// `Idle` is both the state before `start` and the halted state after an
/// unrecoverable failure or `shutdown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    /// Synthesizing and speaking the opening line.
    Greeting,
    /// Recording the user until the detector reports silence.
    Listening,
    Transcribing,
    Generating,
    /// Synthesizing and playing the reply (or the fallback line).
    Speaking,
    /// Reply finished; the next turn starts immediately.
    Cooldown,
}

impl PipelineState {
    /// Whether an external request may be in flight in this state.
    pub fn awaits_collaborator(self) -> bool {
        matches!(
            self,
            Self::Greeting | Self::Transcribing | Self::Generating | Self::Speaking
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Greeting => "greeting",
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::Generating => "generating",
            Self::Speaking => "speaking",
            Self::Cooldown => "cooldown",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_lowercase_name() {
        assert_eq!(PipelineState::Listening.to_string(), "listening");
        assert_eq!(PipelineState::Cooldown.to_string(), "cooldown");
    }

    #[test]
    fn only_request_states_await_collaborators() {
        assert!(PipelineState::Greeting.awaits_collaborator());
        assert!(PipelineState::Speaking.awaits_collaborator());
        assert!(!PipelineState::Listening.awaits_collaborator());
        assert!(!PipelineState::Idle.awaits_collaborator());
        assert!(!PipelineState::Cooldown.awaits_collaborator());
    }
}
