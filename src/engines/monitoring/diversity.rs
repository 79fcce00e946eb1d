use crate::engines::generation::genome::{ParamDomain, TemplateRegistry};
use crate::engines::generation::individual::Individual;
use crate::types::{ParamValue, TemplateType};
use std::collections::{BTreeMap, HashSet};

/// Measures how spread out a population is in parameter and template space
pub struct DiversityMeter {
    bins: usize,
}

impl DiversityMeter {
    pub fn new(bins: usize) -> Self {
        Self { bins: bins.max(1) }
    }

    /// Share of distinct binned parameter vectors, scaled so that a fully
    /// converged population scores 0 and an all-distinct one scores 1.
    pub fn parameter_diversity(&self, population: &[Individual], registry: &TemplateRegistry) -> f64 {
        let n = population.len();
        if n <= 1 {
            return 0.0;
        }

        let unique: HashSet<String> = population
            .iter()
            .map(|ind| self.binned_key(ind, registry))
            .collect();

        (unique.len() - 1) as f64 / (n - 1) as f64
    }

    /// Shannon entropy of the template mix, normalised by the number of registered templates.
    pub fn template_diversity(&self, population: &[Individual], template_count: usize) -> f64 {
        if population.is_empty() || template_count <= 1 {
            return 0.0;
        }

        let mut counts: BTreeMap<TemplateType, usize> = BTreeMap::new();
        for ind in population {
            *counts.entry(ind.genome.template_type()).or_insert(0) += 1;
        }

        let n = population.len() as f64;
        let entropy: f64 = counts
            .values()
            .map(|&c| {
                let p = c as f64 / n;
                -p * p.ln()
            })
            .sum();

        (entropy / (template_count as f64).ln()).clamp(0.0, 1.0)
    }

    pub fn combined(parameter: f64, template: f64) -> f64 {
        (parameter + template) / 2.0
    }

    fn binned_key(&self, individual: &Individual, registry: &TemplateRegistry) -> String {
        let genome = &individual.genome;
        let schema = registry.schema(genome.template_type());

        let parts: Vec<String> = genome
            .parameters()
            .iter()
            .map(|(name, value)| {
                let domain = schema.and_then(|s| s.param(name)).map(|p| &p.domain);
                format!("{}={}", name, self.bin(value, domain))
            })
            .collect();

        format!("{}|{}", genome.template_type(), parts.join(","))
    }

    fn bin(&self, value: &ParamValue, domain: Option<&ParamDomain>) -> String {
        match (value, domain.and_then(ParamDomain::bounds)) {
            (ParamValue::Categorical(v), _) => v.clone(),
            (v, Some((min, max))) if max > min => {
                let x = v.as_f64().unwrap_or(min);
                let position = ((x - min) / (max - min)).clamp(0.0, 1.0);
                let bin = ((position * self.bins as f64) as usize).min(self.bins - 1);
                bin.to_string()
            }
            (v, _) => v.to_string(),
        }
    }
}
