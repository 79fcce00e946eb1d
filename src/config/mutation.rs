use super::traits::{check_rate, ConfigSection};
use crate::engines::generation::exit_mutation::{ExitParameterMutator, ExitParameterSpec};
use crate::engines::generation::operators::MutationRates;
use crate::error::ForgeError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    pub base_mutation_rate: f64,
    pub template_mutation_rate: f64,
    pub perturbation_scale: f64,
    /// Chance that an offspring also gets a bounded exit-parameter mutation.
    pub exit_mutation_rate: f64,
    pub exit_parameters: Vec<ExitParameterSpec>,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            base_mutation_rate: 0.15,
            template_mutation_rate: 0.05,
            perturbation_scale: 0.2,
            exit_mutation_rate: 0.3,
            exit_parameters: ExitParameterMutator::default_specs(),
        }
    }
}

impl MutationConfig {
    pub fn rates(&self) -> MutationRates {
        MutationRates {
            base_mutation_rate: self.base_mutation_rate,
            template_mutation_rate: self.template_mutation_rate,
            perturbation_scale: self.perturbation_scale,
        }
    }
}

impl ConfigSection for MutationConfig {
    fn section_name() -> &'static str {
        "mutation"
    }

    fn validate(&self) -> Result<(), ForgeError> {
        let section = Self::section_name();
        check_rate(section, "base_mutation_rate", self.base_mutation_rate)?;
        check_rate(section, "template_mutation_rate", self.template_mutation_rate)?;
        check_rate(section, "exit_mutation_rate", self.exit_mutation_rate)?;
        if !self.perturbation_scale.is_finite() || self.perturbation_scale < 0.0 {
            return Err(ForgeError::Configuration(
                "Perturbation scale must be a non-negative number".to_string()
            ));
        }
        ExitParameterMutator::new(self.exit_parameters.clone())?;
        Ok(())
    }
}
