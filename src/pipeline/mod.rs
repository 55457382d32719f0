//! Conversation pipeline.
//!
//! A single [`TurnController`] owns the capture buffer, the voice activity
//! detector and the lip-sync driver, and issues one external request at a
//! time: transcription, generation, synthesis or playback.

pub mod artifacts;
pub mod controller;
pub mod latency;
pub mod retry;
pub mod state;

pub use artifacts::ArtifactStore;
pub use controller::{CallKind, Collaborators, ControllerConfig, Dispatch, TurnController};
pub use latency::{LatencyStats, LatencyTracker, Stage, TurnTiming};
pub use retry::RetryPolicy;
pub use state::PipelineState;
