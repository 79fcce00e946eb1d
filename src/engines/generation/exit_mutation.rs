//! Bounded Gaussian mutation of exit parameters (stop loss, take profit, ...).
//!
//! One target parameter is perturbed multiplicatively:
//! `candidate = |current * (1 + noise)|` with `noise ~ N(0, std_dev)`, then
//! clamped to the parameter's `[min, max]` and rounded for integer
//! parameters. Every attempt yields an [`ExitMutationRecord`], including the
//! no-op when the target is absent from the genome.

use crate::engines::generation::genome::Genome;
use crate::error::{ForgeError, Result};
use crate::types::ParamValue;
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

fn default_std_dev() -> f64 {
    0.15
}

/// Bounds and mutation strength of one exit parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitParameterSpec {
    pub name: String,
    pub min: f64,
    pub max: f64,
    /// Standard deviation of the relative noise.
    #[serde(default = "default_std_dev")]
    pub std_dev: f64,
    #[serde(default)]
    pub integer: bool,
}

impl ExitParameterSpec {
    pub fn new(name: &str, min: f64, max: f64, std_dev: f64) -> Self {
        Self { name: name.to_string(), min, max, std_dev, integer: false }
    }

    pub fn integer(name: &str, min: f64, max: f64, std_dev: f64) -> Self {
        Self { name: name.to_string(), min, max, std_dev, integer: true }
    }

    fn validate(&self) -> Result<()> {
        if !(self.min.is_finite() && self.max.is_finite()) || self.min > self.max {
            return Err(ForgeError::Configuration(format!(
                "Exit parameter '{}' has invalid bounds [{}, {}]",
                self.name, self.min, self.max
            )));
        }
        if self.min < 0.0 {
            return Err(ForgeError::Configuration(format!(
                "Exit parameter '{}' must have a non-negative lower bound",
                self.name
            )));
        }
        if !self.std_dev.is_finite() || self.std_dev < 0.0 {
            return Err(ForgeError::Configuration(format!(
                "Exit parameter '{}' std_dev must be a finite non-negative number",
                self.name
            )));
        }
        if self.integer && (self.min.fract() != 0.0 || self.max.fract() != 0.0) {
            return Err(ForgeError::Configuration(format!(
                "Integer exit parameter '{}' needs integral bounds",
                self.name
            )));
        }
        Ok(())
    }
}

/// Outcome of one bounded mutation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitMutationRecord {
    pub attempted: bool,
    pub succeeded: bool,
    pub clamped: bool,
    pub parameter: String,
    pub old_value: Option<f64>,
    pub new_value: Option<f64>,
}

impl ExitMutationRecord {
    fn missed(parameter: &str, old_value: Option<f64>) -> Self {
        Self {
            attempted: true,
            succeeded: false,
            clamped: false,
            parameter: parameter.to_string(),
            old_value,
            new_value: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExitParameterMutator {
    specs: Vec<ExitParameterSpec>,
}

impl ExitParameterMutator {
    pub fn new(specs: Vec<ExitParameterSpec>) -> Result<Self> {
        for spec in &specs {
            spec.validate()?;
        }
        Ok(Self { specs })
    }

    pub fn default_specs() -> Vec<ExitParameterSpec> {
        vec![
            ExitParameterSpec::new("stop_loss_pct", 0.01, 0.20, 0.15),
            ExitParameterSpec::new("take_profit_pct", 0.02, 0.50, 0.15),
            ExitParameterSpec::new("trailing_stop_pct", 0.005, 0.10, 0.15),
            ExitParameterSpec::integer("holding_period_days", 1.0, 60.0, 0.15),
        ]
    }

    pub fn spec(&self, name: &str) -> Option<&ExitParameterSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Mutate one exit parameter picked uniformly among those the genome carries.
    pub fn mutate<R: Rng>(&self, genome: &mut Genome, rng: &mut R) -> ExitMutationRecord {
        let present: Vec<&ExitParameterSpec> = self
            .specs
            .iter()
            .filter(|s| genome.get(&s.name).is_some())
            .collect();

        match present.choose(rng) {
            Some(spec) => {
                let name = spec.name.clone();
                self.mutate_parameter(genome, &name, rng)
            }
            None => {
                debug!(
                    "No exit parameter present in {} genome, skipping bounded mutation",
                    genome.template_type()
                );
                ExitMutationRecord::missed("", None)
            }
        }
    }

    /// Mutate the named parameter with a fresh Gaussian draw.
    pub fn mutate_parameter<R: Rng>(
        &self,
        genome: &mut Genome,
        name: &str,
        rng: &mut R,
    ) -> ExitMutationRecord {
        let noise = match self.spec(name).map(|s| Normal::new(0.0, s.std_dev)) {
            Some(Ok(dist)) => dist.sample(rng),
            _ => 0.0,
        };
        self.apply_noise(genome, name, noise)
    }

    /// Apply an explicit relative noise draw to the named parameter.
    pub fn apply_noise(&self, genome: &mut Genome, name: &str, noise: f64) -> ExitMutationRecord {
        let Some(spec) = self.spec(name) else {
            debug!("Exit parameter '{}' is not configured for bounded mutation", name);
            return ExitMutationRecord::missed(name, None);
        };

        let Some(current) = genome.get(name).and_then(ParamValue::as_f64) else {
            debug!(
                "Exit parameter '{}' not found in {} genome, mutation skipped",
                name,
                genome.template_type()
            );
            return ExitMutationRecord::missed(name, None);
        };

        let candidate = (current * (1.0 + noise)).abs();
        let clamped = !(candidate >= spec.min && candidate <= spec.max);
        let mut value = if candidate.is_nan() {
            current.clamp(spec.min, spec.max)
        } else {
            candidate.clamp(spec.min, spec.max)
        };
        if spec.integer {
            value = value.round();
        }

        let new_param = if spec.integer {
            ParamValue::Int(value as i64)
        } else {
            ParamValue::Float(value)
        };
        genome.parameters_mut().insert(name.to_string(), new_param);

        ExitMutationRecord {
            attempted: true,
            succeeded: true,
            clamped,
            parameter: name.to_string(),
            old_value: Some(current),
            new_value: Some(value),
        }
    }
}

impl Default for ExitParameterMutator {
    fn default() -> Self {
        Self { specs: Self::default_specs() }
    }
}
