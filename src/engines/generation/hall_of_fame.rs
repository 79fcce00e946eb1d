use crate::engines::generation::individual::{compare_primary, Individual};
use std::collections::HashSet;

/// Best distinct genomes seen over the whole run, ordered by Sharpe
pub struct HallOfFame {
    strategies: Vec<Individual>,
    max_size: usize,
    seen_signatures: HashSet<String>,
}

impl HallOfFame {
    pub fn new(max_size: usize) -> Self {
        Self {
            strategies: Vec::new(),
            max_size,
            seen_signatures: HashSet::new(),
        }
    }

    /// Rebuild from checkpointed entries, keeping the size limit.
    pub fn restore(max_size: usize, entries: Vec<Individual>) -> Self {
        let mut hof = Self::new(max_size);
        for entry in entries {
            hof.try_add(&entry);
        }
        hof
    }

    /// Attempt to add an evaluated individual
    ///
    /// Rejects failures and genomes already present. Returns whether the
    /// individual is in the hall after trimming.
    pub fn try_add(&mut self, individual: &Individual) -> bool {
        if self.max_size == 0 || !individual.is_viable() {
            return false;
        }

        let signature = individual.genome.canonical_key();
        if self.seen_signatures.contains(&signature) {
            return false;
        }

        self.strategies.push(individual.clone());
        self.seen_signatures.insert(signature.clone());
        self.sort_and_trim();

        self.seen_signatures.contains(&signature)
    }

    fn sort_and_trim(&mut self) {
        self.strategies.sort_by(compare_primary);

        while self.strategies.len() > self.max_size {
            if let Some(removed) = self.strategies.pop() {
                self.seen_signatures.remove(&removed.genome.canonical_key());
            }
        }
    }

    pub fn get_all(&self) -> &[Individual] {
        &self.strategies
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::generation::genome::TemplateRegistry;
    use crate::types::{MultiObjectiveMetrics, TemplateType};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn scored(id: u64, seed: u64, sharpe: f64) -> Individual {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let genome = registry.sample_genome(TemplateType::MeanReversion, &mut rng).unwrap();
        let mut ind = Individual::new(id, genome, 0, vec![]);
        ind.apply_metrics(
            MultiObjectiveMetrics { sharpe_ratio: sharpe, success: true, ..Default::default() },
            None,
        );
        ind
    }

    #[test]
    fn test_keeps_best_n_sorted() {
        let mut hof = HallOfFame::new(2);
        assert!(hof.try_add(&scored(1, 1, 0.4)));
        assert!(hof.try_add(&scored(2, 2, 1.2)));
        assert!(hof.try_add(&scored(3, 3, 0.9)));
        assert!(!hof.try_add(&scored(4, 4, 0.1)));

        let sharpes: Vec<f64> = hof.get_all().iter().filter_map(|s| s.sharpe()).collect();
        assert_eq!(sharpes, vec![1.2, 0.9]);
        assert_eq!(hof.len(), 2);
    }

    #[test]
    fn test_rejects_duplicate_genomes() {
        let mut hof = HallOfFame::new(5);
        let a = scored(1, 7, 0.5);
        let mut twin = a.clone();
        twin.id = 2;

        assert!(hof.try_add(&a));
        assert!(!hof.try_add(&twin));
        assert_eq!(hof.len(), 1);
    }

    #[test]
    fn test_rejects_failed_individuals() {
        let mut hof = HallOfFame::new(5);
        let mut failed = scored(1, 3, 0.0);
        failed.apply_metrics(MultiObjectiveMetrics::failed(), Some("timeout".into()));
        assert!(!hof.try_add(&failed));
        assert!(hof.is_empty());
    }

    #[test]
    fn test_evicted_genome_can_return() {
        let mut hof = HallOfFame::new(1);
        let weak = scored(1, 11, 0.2);
        hof.try_add(&weak);
        hof.try_add(&scored(2, 12, 0.8));
        assert_eq!(hof.get_all()[0].id, 2);
        assert_eq!(hof.len(), 1);

        let restored = HallOfFame::restore(3, vec![hof.get_all()[0].clone(), weak.clone()]);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get_all()[1].id, 1);
    }
}
