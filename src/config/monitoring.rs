use super::traits::{check_rate, ConfigSection};
use crate::error::ForgeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub diversity_alert_threshold: f64,
    /// Bins per numeric parameter when measuring parameter diversity.
    pub diversity_bins: usize,
    /// JSON-lines file receiving one record per generation.
    pub history_file: Option<PathBuf>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            diversity_alert_threshold: 0.2,
            diversity_bins: 10,
            history_file: None,
        }
    }
}

impl ConfigSection for MonitoringConfig {
    fn section_name() -> &'static str {
        "monitoring"
    }

    fn validate(&self) -> Result<(), ForgeError> {
        check_rate(Self::section_name(), "diversity_alert_threshold", self.diversity_alert_threshold)?;
        if self.diversity_bins == 0 {
            return Err(ForgeError::Configuration(
                "Diversity bins must be at least 1".to_string()
            ));
        }
        Ok(())
    }
}
