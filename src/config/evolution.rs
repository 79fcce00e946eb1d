use super::traits::{check_rate, ConfigSection};
use crate::engines::generation::pareto::{MetricKind, ObjectiveConfig};
use crate::error::ForgeError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    pub population_size: usize,
    pub elite_count: usize,
    pub tournament_size: usize,
    pub max_generations: usize,
    pub seed: Option<u64>,
    pub objectives: Vec<ObjectiveConfig>,
    /// Chance that an offspring slot is requested from the candidate generator.
    pub generator_rate: f64,
    pub hall_of_fame_size: usize,
    /// Stop once the champion reaches this Sharpe ratio.
    pub target_sharpe: Option<f64>,
    /// Stop after this many generations without a champion update.
    pub stagnation_limit: Option<usize>,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            elite_count: 4,
            tournament_size: 3,
            max_generations: 30,
            seed: None,
            objectives: ObjectiveConfig::defaults(),
            generator_rate: 0.2,
            hall_of_fame_size: 10,
            target_sharpe: None,
            stagnation_limit: None,
        }
    }
}

impl ConfigSection for EvolutionConfig {
    fn section_name() -> &'static str {
        "evolution"
    }

    fn validate(&self) -> Result<(), ForgeError> {
        if self.population_size < 2 {
            return Err(ForgeError::Configuration(
                "Population size must be at least 2".to_string()
            ));
        }
        if self.elite_count > self.population_size {
            return Err(ForgeError::Configuration(format!(
                "Elite count {} exceeds population size {}",
                self.elite_count, self.population_size
            )));
        }
        if self.tournament_size == 0 {
            return Err(ForgeError::Configuration(
                "Tournament size must be at least 1".to_string()
            ));
        }
        if self.max_generations == 0 {
            return Err(ForgeError::Configuration(
                "Max generations must be at least 1".to_string()
            ));
        }
        if self.objectives.is_empty() {
            return Err(ForgeError::Configuration(
                "At least one objective is required".to_string()
            ));
        }
        if !self.objectives.iter().any(|o| o.metric == MetricKind::SharpeRatio) {
            return Err(ForgeError::Configuration(
                "Sharpe ratio must be one of the objectives".to_string()
            ));
        }
        check_rate(Self::section_name(), "generator_rate", self.generator_rate)?;
        Ok(())
    }
}
