use super::traits::ConfigSection;
use crate::error::ForgeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Checkpointing is disabled when unset.
    pub directory: Option<PathBuf>,
    /// Save every N generations.
    pub interval: usize,
    pub keep_last: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            directory: None,
            interval: 5,
            keep_last: 3,
        }
    }
}

impl CheckpointConfig {
    /// Whether the periodic checkpoint falls on this zero-based generation.
    pub fn is_due(&self, generation: usize) -> bool {
        self.directory.is_some() && (generation + 1) % self.interval == 0
    }
}

impl ConfigSection for CheckpointConfig {
    fn section_name() -> &'static str {
        "checkpoint"
    }

    fn validate(&self) -> Result<(), ForgeError> {
        if self.interval == 0 {
            return Err(ForgeError::Configuration(
                "Checkpoint interval must be at least 1".to_string()
            ));
        }
        if self.keep_last == 0 {
            return Err(ForgeError::Configuration(
                "Checkpoint retention must keep at least one file".to_string()
            ));
        }
        Ok(())
    }
}
