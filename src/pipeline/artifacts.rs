//! The two transient WAV files kept for inspection.
//!
//! `recorded.wav` holds the last utterance sent for transcription and
//! `reply.wav` the last synthesized reply. Both are overwritten every turn.
//! Failing to write them never interrupts the conversation.

use crate::defaults;
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: Option<PathBuf>,
}

impl ArtifactStore {
    /// Store writing into `dir`, created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Store that drops everything.
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn recorded_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(defaults::RECORDED_WAV))
    }

    pub fn reply_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(defaults::REPLY_WAV))
    }

    /// Persists the captured utterance. Errors are logged.
    pub fn save_recording(&self, wav: &[u8]) {
        self.save(self.recorded_path(), wav);
    }

    /// Persists the synthesized reply. Errors are logged.
    pub fn save_reply(&self, wav: &[u8]) {
        self.save(self.reply_path(), wav);
    }

    fn save(&self, path: Option<PathBuf>, wav: &[u8]) {
        let Some(path) = path else { return };
        match write_file(&path, wav) {
            Ok(()) => tracing::debug!(path = %path.display(), bytes = wav.len(), "Artifact written"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to write artifact"),
        }
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}
