use super::{
    checkpoint::CheckpointConfig,
    evaluation::EvaluationConfig,
    evolution::EvolutionConfig,
    monitoring::MonitoringConfig,
    mutation::MutationConfig,
    templates::TemplateConfig,
    traits::ConfigSection,
};
use crate::engines::generation::genome::ParamDomain;
use crate::error::ForgeError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

/// Prefix for environment overrides, e.g. `STRATFORGE__EVOLUTION__POPULATION_SIZE=80`.
pub const ENV_PREFIX: &str = "STRATFORGE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub evolution: EvolutionConfig,
    pub mutation: MutationConfig,
    pub evaluation: EvaluationConfig,
    pub monitoring: MonitoringConfig,
    pub checkpoint: CheckpointConfig,
    pub templates: TemplateConfig,
}

/// The parts of the configuration that define the search space.
#[derive(Serialize)]
struct SearchSpace<'a> {
    population_size: usize,
    objectives: &'a [crate::engines::generation::pareto::ObjectiveConfig],
    templates: &'a [crate::engines::generation::genome::TemplateSchema],
    exit_parameters: &'a [crate::engines::generation::exit_mutation::ExitParameterSpec],
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ForgeError> {
        self.evolution.validate()?;
        self.mutation.validate()?;
        self.evaluation.validate()?;
        self.monitoring.validate()?;
        self.checkpoint.validate()?;
        self.templates.validate()?;
        self.validate_exit_bounds()
    }

    /// Exit-parameter bounds must sit inside every template domain that declares the parameter.
    fn validate_exit_bounds(&self) -> Result<(), ForgeError> {
        for exit in &self.mutation.exit_parameters {
            for schema in &self.templates.schemas {
                let Some(spec) = schema.param(&exit.name) else {
                    continue;
                };
                let fits = match &spec.domain {
                    ParamDomain::Int { min, max } => {
                        exit.integer && exit.min >= *min as f64 && exit.max <= *max as f64
                    }
                    ParamDomain::Float { min, max } => {
                        !exit.integer && exit.min >= *min && exit.max <= *max
                    }
                    ParamDomain::Categorical { .. } => false,
                };
                if !fits {
                    return Err(ForgeError::Configuration(format!(
                        "Exit parameter '{}' bounds [{}, {}] do not fit template '{}'",
                        exit.name, exit.min, exit.max, schema.template
                    )));
                }
            }
        }
        Ok(())
    }

    /// SHA-256 over the search-space definition. Run-length settings are excluded
    /// so a run can be resumed with more generations.
    pub fn fingerprint(&self) -> String {
        let space = SearchSpace {
            population_size: self.evolution.population_size,
            objectives: &self.evolution.objectives,
            templates: &self.templates.schemas,
            exit_parameters: &self.mutation.exit_parameters,
        };
        let bytes = serde_json::to_vec(&space).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

pub struct ConfigManager {
    config: Arc<RwLock<AppConfig>>,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(AppConfig::default())),
        }
    }

    /// Load a TOML or JSON file, then apply `STRATFORGE__*` environment overrides.
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ForgeError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ForgeError::Configuration(format!(
                "Config file {} not found",
                path.display()
            )));
        }

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ForgeError> {
        let config = self.get();
        let toml_str = toml::to_string_pretty(&config)
            .map_err(|e| ForgeError::Configuration(format!("Failed to serialize: {}", e)))?;

        std::fs::write(path, toml_str)
            .map_err(|e| ForgeError::Configuration(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    pub fn get(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update<F>(&self, f: F) -> Result<(), ForgeError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let mut candidate = config.clone();
        f(&mut candidate);
        candidate.validate()?;
        *config = candidate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::generation::exit_mutation::ExitParameterSpec;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_elite_count_above_population() {
        let mut config = AppConfig::default();
        config.evolution.population_size = 6;
        config.evolution.elite_count = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_exit_bounds_outside_template_domain() {
        let mut config = AppConfig::default();
        config.mutation.exit_parameters = vec![ExitParameterSpec::new("stop_loss_pct", 0.01, 0.40, 0.15)];
        assert!(config.validate().is_err());

        config.mutation.exit_parameters = vec![ExitParameterSpec::new("holding_period_days", 1.0, 30.0, 0.15)];
        assert!(config.validate().is_err(), "integer schema needs an integer exit spec");
    }

    #[test]
    fn test_fingerprint_tracks_search_space_only() {
        let base = AppConfig::default();

        let mut longer = base.clone();
        longer.evolution.max_generations = 500;
        longer.checkpoint.interval = 1;
        assert_eq!(base.fingerprint(), longer.fingerprint());

        let mut narrower = base.clone();
        narrower.mutation.exit_parameters[0].max = 0.15;
        assert_ne!(base.fingerprint(), narrower.fingerprint());

        let mut bigger = base.clone();
        bigger.evolution.population_size += 1;
        assert_ne!(base.fingerprint(), bigger.fingerprint());
    }

    #[test]
    fn test_load_partial_toml_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[evolution]\npopulation_size = 12\nelite_count = 2\n\n[mutation]\nbase_mutation_rate = 0.3\n"
        )
        .unwrap();

        let manager = ConfigManager::new();
        manager.load_from_file(file.path()).unwrap();
        let config = manager.get();

        assert_eq!(config.evolution.population_size, 12);
        assert_eq!(config.evolution.elite_count, 2);
        assert_eq!(config.mutation.base_mutation_rate, 0.3);
        assert_eq!(config.evolution.tournament_size, 3);
        assert_eq!(config.templates.schemas.len(), 4);
    }

    #[test]
    fn test_update_rejects_invalid_change() {
        let manager = ConfigManager::new();
        let result = manager.update(|c| c.mutation.base_mutation_rate = 1.5);
        assert!(result.is_err());
        assert_eq!(manager.get().mutation.base_mutation_rate, 0.15);
    }
}
