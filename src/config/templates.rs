use super::traits::ConfigSection;
use crate::engines::generation::genome::{TemplateRegistry, TemplateSchema};
use crate::error::ForgeError;
use crate::types::TemplateType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub schemas: Vec<TemplateSchema>,
    /// Relative share of each template in the initial population. Empty means uniform.
    pub initial_ratio: BTreeMap<TemplateType, f64>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            schemas: TemplateRegistry::default_schemas(),
            initial_ratio: BTreeMap::new(),
        }
    }
}

impl TemplateConfig {
    pub fn registry(&self) -> Result<TemplateRegistry, ForgeError> {
        TemplateRegistry::new(self.schemas.clone())
    }

    /// Template weights for initialization, uniform unless configured.
    pub fn initial_weights(&self, registry: &TemplateRegistry) -> Vec<(TemplateType, f64)> {
        if self.initial_ratio.is_empty() {
            return registry.templates().into_iter().map(|t| (t, 1.0)).collect();
        }
        self.initial_ratio
            .iter()
            .filter(|(t, _)| registry.schema(**t).is_some())
            .map(|(t, w)| (*t, *w))
            .collect()
    }
}

impl ConfigSection for TemplateConfig {
    fn section_name() -> &'static str {
        "templates"
    }

    fn validate(&self) -> Result<(), ForgeError> {
        let registry = self.registry()?;
        for (template, weight) in &self.initial_ratio {
            if registry.schema(*template).is_none() {
                return Err(ForgeError::Configuration(format!(
                    "Initial ratio names unknown template '{}'",
                    template
                )));
            }
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ForgeError::Configuration(format!(
                    "Initial ratio for '{}' must be non-negative",
                    template
                )));
            }
        }
        if !self.initial_ratio.is_empty() && self.initial_ratio.values().sum::<f64>() <= 0.0 {
            return Err(ForgeError::Configuration(
                "Initial ratios must not all be zero".to_string()
            ));
        }
        Ok(())
    }
}
