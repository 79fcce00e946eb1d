//! Genome representation for strategy search.
//!
//! A genome is a template family plus a parameter map. Construction goes
//! through [`Genome::new`] or [`TemplateRegistry::sample_genome`], both of
//! which validate against the template's schema, so a `Genome` in hand is
//! always well-formed for its template. Operators that edit parameters in
//! place keep values inside the schema domain.

use crate::error::{ForgeError, Result};
use crate::types::{ParamValue, TemplateType};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Valid values for one parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamDomain {
    Int { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    Categorical { choices: Vec<String> },
}

impl ParamDomain {
    pub fn sample<R: Rng>(&self, rng: &mut R) -> ParamValue {
        match self {
            ParamDomain::Int { min, max } => ParamValue::Int(rng.gen_range(*min..=*max)),
            ParamDomain::Float { min, max } => {
                if max > min {
                    ParamValue::Float(rng.gen_range(*min..=*max))
                } else {
                    ParamValue::Float(*min)
                }
            }
            ParamDomain::Categorical { choices } => {
                // Validated schemas always carry at least one choice
                let choice = choices.choose(rng).cloned().unwrap_or_default();
                ParamValue::Categorical(choice)
            }
        }
    }

    pub fn contains(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (ParamDomain::Int { min, max }, ParamValue::Int(v)) => v >= min && v <= max,
            (ParamDomain::Float { min, max }, ParamValue::Float(v)) => {
                v.is_finite() && *v >= *min && *v <= *max
            }
            (ParamDomain::Categorical { choices }, ParamValue::Categorical(v)) => {
                choices.iter().any(|c| c == v)
            }
            _ => false,
        }
    }

    /// Numeric bounds of the domain, `None` for categoricals.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            ParamDomain::Int { min, max } => Some((*min as f64, *max as f64)),
            ParamDomain::Float { min, max } => Some((*min, *max)),
            ParamDomain::Categorical { .. } => None,
        }
    }

    /// Project a raw numeric value onto the domain (clamped, rounded for ints).
    pub fn project(&self, raw: f64) -> Option<ParamValue> {
        match self {
            ParamDomain::Int { min, max } => {
                let v = raw.round().clamp(*min as f64, *max as f64);
                Some(ParamValue::Int(v as i64))
            }
            ParamDomain::Float { min, max } => Some(ParamValue::Float(raw.clamp(*min, *max))),
            ParamDomain::Categorical { .. } => None,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        let ok = match self {
            ParamDomain::Int { min, max } => min <= max,
            ParamDomain::Float { min, max } => min.is_finite() && max.is_finite() && min <= max,
            ParamDomain::Categorical { choices } => !choices.is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err(ForgeError::Configuration(format!(
                "Parameter '{}' has an empty or inverted domain",
                name
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(flatten)]
    pub domain: ParamDomain,
}

impl ParamSpec {
    pub fn int(name: &str, min: i64, max: i64) -> Self {
        Self { name: name.to_string(), domain: ParamDomain::Int { min, max } }
    }

    pub fn float(name: &str, min: f64, max: f64) -> Self {
        Self { name: name.to_string(), domain: ParamDomain::Float { min, max } }
    }

    pub fn categorical(name: &str, choices: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            domain: ParamDomain::Categorical {
                choices: choices.iter().map(|c| c.to_string()).collect(),
            },
        }
    }
}

/// Parameter schema of a single template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSchema {
    pub template: TemplateType,
    pub parameters: Vec<ParamSpec>,
}

impl TemplateSchema {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Lookup of template schemas, keyed by template type
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRegistry {
    schemas: BTreeMap<TemplateType, TemplateSchema>,
}

impl TemplateRegistry {
    pub fn new(schemas: Vec<TemplateSchema>) -> Result<Self> {
        if schemas.is_empty() {
            return Err(ForgeError::Configuration(
                "At least one template schema is required".to_string(),
            ));
        }

        let mut map = BTreeMap::new();
        for schema in schemas {
            let mut seen = std::collections::BTreeSet::new();
            for spec in &schema.parameters {
                spec.domain.validate(&spec.name)?;
                if !seen.insert(spec.name.as_str()) {
                    return Err(ForgeError::Configuration(format!(
                        "Template '{}' declares parameter '{}' twice",
                        schema.template, spec.name
                    )));
                }
            }
            if map.insert(schema.template, schema.clone()).is_some() {
                return Err(ForgeError::Configuration(format!(
                    "Template '{}' is declared twice",
                    schema.template
                )));
            }
        }

        Ok(Self { schemas: map })
    }

    /// Built-in schemas for the four strategy families.
    pub fn default_schemas() -> Vec<TemplateSchema> {
        let exits = |with_trailing: bool| {
            let mut params = vec![
                ParamSpec::float("stop_loss_pct", 0.01, 0.20),
                ParamSpec::float("take_profit_pct", 0.02, 0.50),
            ];
            if with_trailing {
                params.push(ParamSpec::float("trailing_stop_pct", 0.005, 0.10));
                params.push(ParamSpec::int("holding_period_days", 1, 60));
            }
            params
        };

        vec![
            TemplateSchema {
                template: TemplateType::Momentum,
                parameters: [
                    vec![
                        ParamSpec::int("lookback_days", 5, 120),
                        ParamSpec::float("entry_threshold", 0.0, 0.10),
                        ParamSpec::int("rebalance_days", 1, 20),
                        ParamSpec::categorical("ranking", &["raw_return", "risk_adjusted", "volume_weighted"]),
                    ],
                    exits(true),
                ]
                .concat(),
            },
            TemplateSchema {
                template: TemplateType::MeanReversion,
                parameters: [
                    vec![
                        ParamSpec::int("zscore_window", 10, 100),
                        ParamSpec::float("entry_zscore", 1.0, 3.0),
                        ParamSpec::float("exit_zscore", 0.0, 1.0),
                    ],
                    exits(true),
                ]
                .concat(),
            },
            TemplateSchema {
                template: TemplateType::Breakout,
                parameters: [
                    vec![
                        ParamSpec::int("channel_days", 10, 100),
                        ParamSpec::float("breakout_buffer", 0.0, 0.05),
                        ParamSpec::categorical("volume_filter", &["none", "above_average", "surge"]),
                    ],
                    exits(true),
                ]
                .concat(),
            },
            TemplateSchema {
                template: TemplateType::FactorRotation,
                parameters: [
                    vec![
                        ParamSpec::categorical("factor", &["value", "quality", "momentum", "low_volatility"]),
                        ParamSpec::int("top_n", 5, 50),
                        ParamSpec::int("rebalance_days", 5, 60),
                    ],
                    exits(false),
                ]
                .concat(),
            },
        ]
    }

    pub fn schema(&self, template: TemplateType) -> Option<&TemplateSchema> {
        self.schemas.get(&template)
    }

    pub fn templates(&self) -> Vec<TemplateType> {
        self.schemas.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Draw every parameter of `template` uniformly from its domain.
    pub fn sample_genome<R: Rng>(&self, template: TemplateType, rng: &mut R) -> Result<Genome> {
        let schema = self.schema(template).ok_or_else(|| {
            ForgeError::InvalidGenome(format!("Unknown template '{}'", template))
        })?;

        let parameters = schema
            .parameters
            .iter()
            .map(|spec| (spec.name.clone(), spec.domain.sample(rng)))
            .collect();

        Ok(Genome { template_type: template, parameters })
    }

    pub fn validate(&self, genome: &Genome) -> Result<()> {
        let schema = self.schema(genome.template_type).ok_or_else(|| {
            ForgeError::InvalidGenome(format!("Unknown template '{}'", genome.template_type))
        })?;

        for spec in &schema.parameters {
            match genome.parameters.get(&spec.name) {
                None => {
                    return Err(ForgeError::InvalidGenome(format!(
                        "Template '{}' requires parameter '{}'",
                        genome.template_type, spec.name
                    )))
                }
                Some(value) if !spec.domain.contains(value) => {
                    return Err(ForgeError::InvalidGenome(format!(
                        "Parameter '{}' = {} is outside its domain for template '{}'",
                        spec.name, value, genome.template_type
                    )))
                }
                Some(_) => {}
            }
        }

        if let Some(extra) = genome
            .parameters
            .keys()
            .find(|name| schema.param(name).is_none())
        {
            return Err(ForgeError::InvalidGenome(format!(
                "Template '{}' has no parameter '{}'",
                genome.template_type, extra
            )));
        }

        Ok(())
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        let schemas = Self::default_schemas()
            .into_iter()
            .map(|s| (s.template, s))
            .collect();
        Self { schemas }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    template_type: TemplateType,
    parameters: BTreeMap<String, ParamValue>,
}

impl Genome {
    /// Build a genome, failing fast if it does not match the template schema.
    pub fn new(
        template_type: TemplateType,
        parameters: BTreeMap<String, ParamValue>,
        registry: &TemplateRegistry,
    ) -> Result<Self> {
        let genome = Self { template_type, parameters };
        registry.validate(&genome)?;
        Ok(genome)
    }

    pub fn template_type(&self) -> TemplateType {
        self.template_type
    }

    pub fn parameters(&self) -> &BTreeMap<String, ParamValue> {
        &self.parameters
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.parameters.get(name)
    }

    /// In-place access for operators. Callers keep values inside the schema domain.
    pub(crate) fn parameters_mut(&mut self) -> &mut BTreeMap<String, ParamValue> {
        &mut self.parameters
    }

    /// Stable textual key, used for deduplication.
    pub fn canonical_key(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}:{}", self.template_type, params.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_sampled_genomes_validate() {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for template in registry.templates() {
            for _ in 0..50 {
                let genome = registry.sample_genome(template, &mut rng).unwrap();
                assert!(registry.validate(&genome).is_ok());
            }
        }
    }

    #[test]
    fn test_new_rejects_missing_and_unknown_parameters() {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let genome = registry.sample_genome(TemplateType::Breakout, &mut rng).unwrap();

        let mut missing = genome.parameters().clone();
        missing.remove("channel_days");
        assert!(Genome::new(TemplateType::Breakout, missing, &registry).is_err());

        let mut extra = genome.parameters().clone();
        extra.insert("leverage".to_string(), ParamValue::Float(2.0));
        assert!(Genome::new(TemplateType::Breakout, extra, &registry).is_err());
    }

    #[test]
    fn test_new_rejects_out_of_domain_and_wrong_kind() {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let genome = registry.sample_genome(TemplateType::Momentum, &mut rng).unwrap();

        let mut out_of_range = genome.parameters().clone();
        out_of_range.insert("stop_loss_pct".to_string(), ParamValue::Float(0.9));
        assert!(Genome::new(TemplateType::Momentum, out_of_range, &registry).is_err());

        let mut wrong_kind = genome.parameters().clone();
        wrong_kind.insert("lookback_days".to_string(), ParamValue::Float(20.0));
        assert!(Genome::new(TemplateType::Momentum, wrong_kind, &registry).is_err());

        let mut bad_choice = genome.parameters().clone();
        bad_choice.insert("ranking".to_string(), ParamValue::Categorical("astrology".into()));
        assert!(Genome::new(TemplateType::Momentum, bad_choice, &registry).is_err());
    }

    #[test]
    fn test_registry_rejects_duplicate_parameter() {
        let schema = TemplateSchema {
            template: TemplateType::Breakout,
            parameters: vec![ParamSpec::int("channel_days", 10, 20), ParamSpec::int("channel_days", 1, 2)],
        };
        assert!(TemplateRegistry::new(vec![schema]).is_err());
    }

    #[test]
    fn test_param_value_json_shape() {
        let mut params = BTreeMap::new();
        params.insert("a".to_string(), ParamValue::Int(3));
        params.insert("b".to_string(), ParamValue::Float(0.05));
        params.insert("c".to_string(), ParamValue::Categorical("surge".into()));

        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"a":3,"b":0.05,"c":"surge"}"#);

        let back: BTreeMap<String, ParamValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
