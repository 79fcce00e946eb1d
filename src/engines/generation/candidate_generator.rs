//! Boundary to an external candidate generator (typically LLM-backed).
//!
//! The call is blocking and may return nothing. The population manager runs it
//! under a deadline and falls back to mutating a copy of the champion whenever
//! it returns `None`, times out, or produces a genome the registry rejects.

use crate::engines::generation::genome::Genome;
use crate::engines::generation::individual::Individual;
use crate::types::{MultiObjectiveMetrics, TemplateType};
use serde::{Deserialize, Serialize};

/// Short description of a recent failed evaluation, passed to the generator as context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub individual_id: u64,
    pub template_type: TemplateType,
    pub reason: String,
}

impl FailureSummary {
    pub fn from_individual(individual: &Individual) -> Option<Self> {
        if individual.is_viable() || individual.is_pending() {
            return None;
        }
        Some(Self {
            individual_id: individual.id,
            template_type: individual.genome.template_type(),
            reason: individual
                .failure_reason
                .clone()
                .unwrap_or_else(|| "unsuccessful backtest".to_string()),
        })
    }
}

pub trait CandidateGenerator: Send + Sync {
    fn generate(
        &self,
        champion_genome: &Genome,
        champion_metrics: &MultiObjectiveMetrics,
        recent_failures: &[FailureSummary],
    ) -> Option<Genome>;
}

impl<F> CandidateGenerator for F
where
    F: Fn(&Genome, &MultiObjectiveMetrics, &[FailureSummary]) -> Option<Genome> + Send + Sync,
{
    fn generate(
        &self,
        champion_genome: &Genome,
        champion_metrics: &MultiObjectiveMetrics,
        recent_failures: &[FailureSummary],
    ) -> Option<Genome> {
        self(champion_genome, champion_metrics, recent_failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::generation::genome::TemplateRegistry;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_failure_summary_only_for_failed() {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let genome = registry.sample_genome(TemplateType::Breakout, &mut rng).unwrap();

        let mut ind = Individual::new(9, genome, 2, vec![]);
        assert!(FailureSummary::from_individual(&ind).is_none());

        ind.apply_metrics(MultiObjectiveMetrics::failed(), Some("evaluation timed out".into()));
        let summary = FailureSummary::from_individual(&ind).unwrap();
        assert_eq!(summary.individual_id, 9);
        assert_eq!(summary.template_type, TemplateType::Breakout);
        assert_eq!(summary.reason, "evaluation timed out");
    }

    #[test]
    fn test_closure_is_a_generator() {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let genome = registry.sample_genome(TemplateType::Momentum, &mut rng).unwrap();

        let echo = |g: &Genome, _: &MultiObjectiveMetrics, _: &[FailureSummary]| Some(g.clone());
        let produced = echo.generate(&genome, &MultiObjectiveMetrics::default(), &[]);
        assert_eq!(produced, Some(genome));
    }
}
