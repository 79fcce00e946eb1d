use super::traits::ConfigSection;
use crate::error::ForgeError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Per-individual deadline.
    pub timeout_ms: u64,
    /// Worker pool size; rayon's default (one per core) when unset.
    pub worker_threads: Option<usize>,
    /// Whole-generation retries when the oracle is unavailable.
    pub max_retries: usize,
    pub retry_backoff_ms: u64,
    pub generator_timeout_ms: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            worker_threads: None,
            max_retries: 3,
            retry_backoff_ms: 500,
            generator_timeout_ms: 10_000,
        }
    }
}

impl ConfigSection for EvaluationConfig {
    fn section_name() -> &'static str {
        "evaluation"
    }

    fn validate(&self) -> Result<(), ForgeError> {
        if self.timeout_ms == 0 {
            return Err(ForgeError::Configuration(
                "Evaluation timeout must be positive".to_string()
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(ForgeError::Configuration(
                "Worker threads must be at least 1".to_string()
            ));
        }
        if self.generator_timeout_ms == 0 {
            return Err(ForgeError::Configuration(
                "Generator timeout must be positive".to_string()
            ));
        }
        Ok(())
    }
}
