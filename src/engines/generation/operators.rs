use crate::engines::generation::genome::{Genome, ParamDomain, TemplateRegistry};
use crate::engines::generation::individual::{compare_primary, Individual};
use crate::error::Result;
use crate::types::{ParamValue, TemplateType};
use log::debug;
use rand::seq::{index, SliceRandom};
use rand::Rng;
use std::cmp::Ordering;

/// Tournament selection: pick best of K random candidates
///
/// Candidates are drawn without replacement unless the population is smaller
/// than the tournament. The winner is the best by Sharpe, then shallower
/// drawdown, then lower id. Returns a population index.
pub fn tournament_selection<R: Rng>(
    population: &[Individual],
    tournament_size: usize,
    rng: &mut R,
) -> usize {
    let n = population.len();
    let k = tournament_size.max(1);

    let contenders: Vec<usize> = if n >= k {
        index::sample(rng, n, k).into_vec()
    } else {
        (0..k).map(|_| rng.gen_range(0..n)).collect()
    };

    contenders
        .into_iter()
        .min_by(|&a, &b| compare_primary(&population[a], &population[b]))
        .unwrap_or(0)
}

/// Which parent supplied the child's parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossoverKind {
    Uniform,
    WholeParent { from_first: bool },
}

/// Produce one child genome from two parents.
///
/// Same template: every key is inherited from either parent with equal
/// probability. Different templates: the child is a copy of one parent,
/// because parameter meaning does not carry across templates.
pub fn crossover<R: Rng>(parent1: &Genome, parent2: &Genome, rng: &mut R) -> (Genome, CrossoverKind) {
    if parent1.template_type() != parent2.template_type() {
        let from_first = rng.gen_bool(0.5);
        let child = if from_first { parent1.clone() } else { parent2.clone() };
        return (child, CrossoverKind::WholeParent { from_first });
    }

    let mut child = parent1.clone();
    for (name, value) in child.parameters_mut().iter_mut() {
        if rng.gen_bool(0.5) {
            if let Some(other) = parent2.get(name) {
                *value = other.clone();
            }
        }
    }

    (child, CrossoverKind::Uniform)
}

/// Rates controlling standard mutation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MutationRates {
    pub base_mutation_rate: f64,
    pub template_mutation_rate: f64,
    /// Half-width of the relative perturbation applied to numeric parameters.
    pub perturbation_scale: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationSummary {
    pub template_switched: Option<(TemplateType, TemplateType)>,
    pub mutated_parameters: Vec<String>,
}

impl MutationSummary {
    pub fn changed(&self) -> bool {
        self.template_switched.is_some() || !self.mutated_parameters.is_empty()
    }
}

/// Mutation: randomly modify parameters, occasionally switch template
///
/// A template switch resamples the whole genome and skips per-parameter
/// mutation. It is the only way new templates enter the gene pool after the
/// first generation.
pub fn mutate<R: Rng>(
    genome: &mut Genome,
    registry: &TemplateRegistry,
    rates: &MutationRates,
    rng: &mut R,
) -> Result<MutationSummary> {
    let mut summary = MutationSummary::default();

    if rates.template_mutation_rate > 0.0 && rng.gen::<f64>() < rates.template_mutation_rate {
        let current = genome.template_type();
        let others: Vec<TemplateType> = registry
            .templates()
            .into_iter()
            .filter(|t| *t != current)
            .collect();
        let target = others.choose(rng).copied().unwrap_or(current);
        *genome = registry.sample_genome(target, rng)?;
        debug!("Template mutation {} -> {}", current, target);
        summary.template_switched = Some((current, target));
        return Ok(summary);
    }

    let Some(schema) = registry.schema(genome.template_type()) else {
        return Ok(summary);
    };

    for spec in &schema.parameters {
        if rng.gen::<f64>() >= rates.base_mutation_rate {
            continue;
        }
        let Some(current) = genome.get(&spec.name).cloned() else {
            continue;
        };

        let mutated = mutate_value(&current, &spec.domain, rates.perturbation_scale, rng);
        if mutated != current {
            summary.mutated_parameters.push(spec.name.clone());
        }
        genome.parameters_mut().insert(spec.name.clone(), mutated);
    }

    Ok(summary)
}

fn mutate_value<R: Rng>(
    current: &ParamValue,
    domain: &ParamDomain,
    perturbation_scale: f64,
    rng: &mut R,
) -> ParamValue {
    match domain {
        ParamDomain::Categorical { choices } => {
            let alternatives: Vec<&String> = choices
                .iter()
                .filter(|c| ParamValue::Categorical((*c).clone()) != *current)
                .collect();
            match alternatives.choose(rng) {
                Some(choice) => ParamValue::Categorical((*choice).clone()),
                None => current.clone(),
            }
        }
        _ => {
            let perturb = perturbation_scale > 0.0 && rng.gen_bool(0.5);
            match (perturb, current.as_f64()) {
                (true, Some(value)) => {
                    let factor = 1.0 + rng.gen_range(-perturbation_scale..=perturbation_scale);
                    domain
                        .project(value * factor)
                        .unwrap_or_else(|| current.clone())
                }
                _ => domain.sample(rng),
            }
        }
    }
}

/// Split `total` slots across weighted templates (largest remainder).
pub fn allocate_templates(weights: &[(TemplateType, f64)], total: usize) -> Vec<(TemplateType, usize)> {
    let sum: f64 = weights.iter().map(|(_, w)| w.max(0.0)).sum();
    if weights.is_empty() || sum <= 0.0 {
        return Vec::new();
    }

    let quotas: Vec<f64> = weights
        .iter()
        .map(|(_, w)| w.max(0.0) / sum * total as f64)
        .collect();
    let mut counts: Vec<usize> = quotas.iter().map(|q| q.floor() as usize).collect();
    let assigned: usize = counts.iter().sum();

    let mut by_remainder: Vec<usize> = (0..weights.len()).collect();
    by_remainder.sort_by(|&a, &b| {
        let ra = quotas[a] - quotas[a].floor();
        let rb = quotas[b] - quotas[b].floor();
        rb.partial_cmp(&ra).unwrap_or(Ordering::Equal).then(a.cmp(&b))
    });
    for &i in by_remainder.iter().take(total.saturating_sub(assigned)) {
        counts[i] += 1;
    }

    weights
        .iter()
        .zip(counts)
        .map(|((t, _), c)| (*t, c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EvaluationStatus, MultiObjectiveMetrics};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn evaluated(id: u64, genome: Genome, sharpe: f64, drawdown: f64) -> Individual {
        let mut ind = Individual::new(id, genome, 0, Vec::new());
        ind.apply_metrics(
            MultiObjectiveMetrics {
                sharpe_ratio: sharpe,
                max_drawdown: drawdown,
                success: true,
                ..Default::default()
            },
            None,
        );
        ind
    }

    #[test]
    fn test_tournament_covering_population_picks_best() {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let g = registry.sample_genome(TemplateType::Momentum, &mut rng).unwrap();

        let population = vec![
            evaluated(0, g.clone(), 0.5, 0.1),
            evaluated(1, g.clone(), 1.5, 0.3),
            evaluated(2, g.clone(), 1.5, 0.2),
            evaluated(3, g.clone(), -0.2, 0.1),
        ];

        // k == n samples everyone exactly once
        for _ in 0..20 {
            assert_eq!(tournament_selection(&population, 4, &mut rng), 2);
        }
    }

    #[test]
    fn test_tournament_ties_break_on_id() {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let g = registry.sample_genome(TemplateType::Breakout, &mut rng).unwrap();

        let population = vec![
            evaluated(9, g.clone(), 1.0, 0.2),
            evaluated(4, g.clone(), 1.0, 0.2),
        ];
        assert_eq!(tournament_selection(&population, 2, &mut rng), 1);
    }

    #[test]
    fn test_tournament_prefers_viable_over_failed() {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let g = registry.sample_genome(TemplateType::Breakout, &mut rng).unwrap();

        let mut failed = Individual::new(0, g.clone(), 0, Vec::new());
        failed.apply_metrics(MultiObjectiveMetrics::failed(), Some("timeout".into()));
        assert_eq!(failed.status, EvaluationStatus::Failed);

        let population = vec![failed, evaluated(1, g, -3.0, 0.9)];
        assert_eq!(tournament_selection(&population, 2, &mut rng), 1);
    }

    #[test]
    fn test_tournament_larger_than_population_samples_with_replacement() {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        let g = registry.sample_genome(TemplateType::Momentum, &mut rng).unwrap();
        let population = vec![evaluated(0, g.clone(), 0.1, 0.1), evaluated(1, g, 0.2, 0.1)];

        for _ in 0..10 {
            let idx = tournament_selection(&population, 5, &mut rng);
            assert!(idx < population.len());
        }
    }

    #[test]
    fn test_uniform_crossover_takes_each_key_from_a_parent() {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let a = registry.sample_genome(TemplateType::MeanReversion, &mut rng).unwrap();
        let b = registry.sample_genome(TemplateType::MeanReversion, &mut rng).unwrap();

        for _ in 0..50 {
            let (child, kind) = crossover(&a, &b, &mut rng);
            assert_eq!(kind, CrossoverKind::Uniform);
            assert!(registry.validate(&child).is_ok());
            for (name, value) in child.parameters() {
                assert!(a.get(name) == Some(value) || b.get(name) == Some(value));
            }
        }
    }

    #[test]
    fn test_cross_template_crossover_never_interleaves() {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(22);
        let a = registry.sample_genome(TemplateType::Momentum, &mut rng).unwrap();
        let b = registry.sample_genome(TemplateType::Breakout, &mut rng).unwrap();

        let mut seen_first = false;
        let mut seen_second = false;
        for _ in 0..100 {
            let (child, kind) = crossover(&a, &b, &mut rng);
            match kind {
                CrossoverKind::WholeParent { from_first: true } => {
                    assert_eq!(child, a);
                    seen_first = true;
                }
                CrossoverKind::WholeParent { from_first: false } => {
                    assert_eq!(child, b);
                    seen_second = true;
                }
                CrossoverKind::Uniform => panic!("templates differ"),
            }
        }
        assert!(seen_first && seen_second);
    }

    #[test]
    fn test_mutation_keeps_genome_valid() {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(30);
        let rates = MutationRates {
            base_mutation_rate: 1.0,
            template_mutation_rate: 0.1,
            perturbation_scale: 0.5,
        };

        for template in registry.templates() {
            let mut genome = registry.sample_genome(template, &mut rng).unwrap();
            for _ in 0..100 {
                mutate(&mut genome, &registry, &rates, &mut rng).unwrap();
                assert!(registry.validate(&genome).is_ok());
            }
        }
    }

    #[test]
    fn test_categorical_mutation_excludes_current_value() {
        let domain = ParamDomain::Categorical {
            choices: vec!["none".into(), "above_average".into(), "surge".into()],
        };
        let mut rng = ChaCha8Rng::seed_from_u64(31);
        let current = ParamValue::Categorical("surge".into());
        for _ in 0..50 {
            assert_ne!(mutate_value(&current, &domain, 0.2, &mut rng), current);
        }

        let single = ParamDomain::Categorical { choices: vec!["only".into()] };
        let only = ParamValue::Categorical("only".into());
        assert_eq!(mutate_value(&only, &single, 0.2, &mut rng), only);
    }

    #[test]
    fn test_zero_rates_leave_genome_untouched() {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(32);
        let rates = MutationRates {
            base_mutation_rate: 0.0,
            template_mutation_rate: 0.0,
            perturbation_scale: 0.2,
        };
        let original = registry.sample_genome(TemplateType::Breakout, &mut rng).unwrap();
        let mut genome = original.clone();
        let summary = mutate(&mut genome, &registry, &rates, &mut rng).unwrap();
        assert!(!summary.changed());
        assert_eq!(genome, original);
    }

    #[test]
    fn test_template_mutation_switches_template() {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(33);
        let rates = MutationRates {
            base_mutation_rate: 0.0,
            template_mutation_rate: 1.0,
            perturbation_scale: 0.2,
        };
        let mut genome = registry.sample_genome(TemplateType::Momentum, &mut rng).unwrap();
        let summary = mutate(&mut genome, &registry, &rates, &mut rng).unwrap();
        assert_ne!(genome.template_type(), TemplateType::Momentum);
        assert_eq!(summary.template_switched.map(|(from, _)| from), Some(TemplateType::Momentum));
        assert!(registry.validate(&genome).is_ok());
    }

    #[test]
    fn test_allocate_templates_largest_remainder() {
        let weights = vec![
            (TemplateType::Momentum, 1.0),
            (TemplateType::MeanReversion, 1.0),
            (TemplateType::Breakout, 1.0),
            (TemplateType::FactorRotation, 1.0),
        ];
        let counts = allocate_templates(&weights, 6);
        let total: usize = counts.iter().map(|(_, c)| c).sum();
        assert_eq!(total, 6);
        assert_eq!(counts[0].1, 2);
        assert_eq!(counts[1].1, 2);
        assert_eq!(counts[2].1, 1);
        assert_eq!(counts[3].1, 1);

        let skewed = allocate_templates(&[(TemplateType::Momentum, 3.0), (TemplateType::Breakout, 1.0)], 10);
        assert_eq!(skewed, vec![(TemplateType::Momentum, 8), (TemplateType::Breakout, 2)]);
    }
}
