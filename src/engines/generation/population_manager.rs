use crate::config::AppConfig;
use crate::engines::evaluation::{BatchOutcome, FitnessEvaluator, FitnessOracle};
use crate::engines::generation::{
    candidate_generator::{CandidateGenerator, FailureSummary},
    exit_mutation::ExitParameterMutator,
    genome::{Genome, TemplateRegistry},
    hall_of_fame::HallOfFame,
    individual::{compare_primary, Individual},
    operators::{allocate_templates, crossover, mutate, tournament_selection, CrossoverKind},
    pareto::{rank_population, Ranking},
    progress::ProgressCallback,
};
use crate::engines::monitoring::{EvolutionMonitor, GenerationContext, GenerationRecord};
use crate::engines::persistence::{Checkpoint, CheckpointStore, CHECKPOINT_FORMAT_VERSION};
use crate::error::{ForgeError, Result};
use crate::utils::deadline::run_with_deadline;
use chrono::Utc;
use log::{debug, error, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Failure summaries handed to the candidate generator per request.
const RECENT_FAILURE_LIMIT: usize = 10;

/// Where the per-generation state machine currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Evaluate,
    Rank,
    Select,
    Reproduce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    TargetReached,
    Stagnated,
    Cancelled,
}

/// Summary of a run so far. Available at any point, including after an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: Option<RunOutcome>,
    pub generations_completed: usize,
    pub total_evaluations: usize,
    pub failed_evaluations: usize,
    pub failure_fraction: f64,
    pub champion: Option<Individual>,
    pub champion_generation: Option<usize>,
    pub hall_of_fame: Vec<Individual>,
    pub diversity_alerts: usize,
    pub last_record: Option<GenerationRecord>,
}

pub struct PopulationManager {
    config: AppConfig,
    registry: Arc<TemplateRegistry>,
    evaluator: FitnessEvaluator,
    generator: Option<Arc<dyn CandidateGenerator>>,
    store: Option<CheckpointStore>,
    exit_mutator: ExitParameterMutator,
    monitor: EvolutionMonitor,
    hall_of_fame: HallOfFame,
    rng: ChaCha8Rng,
    fingerprint: String,
    cancel: Arc<AtomicBool>,

    phase: Phase,
    generation: usize,
    population: Vec<Individual>,
    offspring: Vec<Individual>,
    ranking: Ranking,
    champion: Option<Individual>,
    champion_generation: Option<usize>,
    next_id: u64,

    generations_completed: usize,
    total_evaluations: usize,
    failed_evaluations: usize,
    generations_without_improvement: usize,
    last_evaluation_time: Duration,
    outcome: Option<RunOutcome>,
}

impl PopulationManager {
    pub fn new(config: AppConfig, oracle: Arc<dyn FitnessOracle>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(config.templates.registry()?);
        let evaluator = FitnessEvaluator::new(oracle, Arc::clone(&registry), &config.evaluation)?;
        let exit_mutator = ExitParameterMutator::new(config.mutation.exit_parameters.clone())?;
        let store = match &config.checkpoint.directory {
            Some(dir) => Some(CheckpointStore::new(dir, config.checkpoint.keep_last)?),
            None => None,
        };
        let rng = match config.evolution.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        Ok(Self {
            monitor: EvolutionMonitor::new(&config.monitoring),
            hall_of_fame: HallOfFame::new(config.evolution.hall_of_fame_size),
            fingerprint: config.fingerprint(),
            config,
            registry,
            evaluator,
            generator: None,
            store,
            exit_mutator,
            rng,
            cancel: Arc::new(AtomicBool::new(false)),
            phase: Phase::Init,
            generation: 0,
            population: Vec::new(),
            offspring: Vec::new(),
            ranking: Ranking::default(),
            champion: None,
            champion_generation: None,
            next_id: 0,
            generations_completed: 0,
            total_evaluations: 0,
            failed_evaluations: 0,
            generations_without_improvement: 0,
            last_evaluation_time: Duration::ZERO,
            outcome: None,
        })
    }

    /// Continue from the newest checkpoint in the configured directory, or
    /// start fresh when the directory holds none.
    pub fn resume(config: AppConfig, oracle: Arc<dyn FitnessOracle>) -> Result<Self> {
        let mut manager = Self::new(config, oracle)?;
        let checkpoint = match &manager.store {
            Some(store) => store.load_latest()?,
            None => {
                return Err(ForgeError::Configuration(
                    "Resuming requires checkpoint.directory to be set".to_string(),
                ))
            }
        };

        match checkpoint {
            Some(checkpoint) => manager.restore(checkpoint)?,
            None => info!("No checkpoint found, starting a fresh run"),
        }
        Ok(manager)
    }

    pub fn with_generator(mut self, generator: Arc<dyn CandidateGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Reinstate a fully evaluated generation. The run continues at Select
    /// with the restored RNG, so nothing is evaluated twice.
    pub fn restore(&mut self, checkpoint: Checkpoint) -> Result<()> {
        checkpoint.verify_fingerprint(&self.fingerprint)?;

        if checkpoint.population.len() != self.config.evolution.population_size {
            return Err(ForgeError::Checkpoint(format!(
                "Checkpoint holds {} individuals, configuration expects {}",
                checkpoint.population.len(),
                self.config.evolution.population_size
            )));
        }
        if let Some(pending) = checkpoint.population.iter().find(|ind| ind.is_pending()) {
            return Err(ForgeError::Checkpoint(format!(
                "Checkpoint for generation {} contains unevaluated individual {}",
                checkpoint.generation_number, pending.id
            )));
        }
        for individual in checkpoint
            .population
            .iter()
            .chain(checkpoint.champion.iter())
            .chain(checkpoint.hall_of_fame.iter())
        {
            self.registry.validate(&individual.genome)?;
        }

        self.next_id = checkpoint.resolved_next_id();
        self.generation = checkpoint.generation_number;
        self.generations_completed = checkpoint.generation_number + 1;
        self.champion_generation = checkpoint.champion_generation;
        self.total_evaluations = checkpoint.total_evaluations;
        self.failed_evaluations = checkpoint.failed_evaluations;
        self.generations_without_improvement = checkpoint.generations_without_improvement;
        self.hall_of_fame =
            HallOfFame::restore(self.config.evolution.hall_of_fame_size, checkpoint.hall_of_fame);
        self.monitor.restore(checkpoint.history);
        self.rng = checkpoint.rng_state;
        self.champion = checkpoint.champion;
        self.population = checkpoint.population;
        self.ranking = rank_population(&self.population, &self.config.evolution.objectives);
        self.offspring.clear();
        self.outcome = None;
        self.phase = Phase::Select;

        info!(
            "Resumed at generation {} with {} individuals (champion sharpe {})",
            self.generation,
            self.population.len(),
            self.champion_sharpe()
                .map(|s| format!("{:.4}", s))
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(())
    }

    /// Shared flag; setting it stops the run after the current generation is evaluated.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn population(&self) -> &[Individual] {
        &self.population
    }

    pub fn champion(&self) -> Option<&Individual> {
        self.champion.as_ref()
    }

    pub fn hall_of_fame(&self) -> &HallOfFame {
        &self.hall_of_fame
    }

    pub fn monitor(&self) -> &EvolutionMonitor {
        &self.monitor
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            outcome: self.outcome,
            generations_completed: self.generations_completed,
            total_evaluations: self.total_evaluations,
            failed_evaluations: self.failed_evaluations,
            failure_fraction: if self.total_evaluations > 0 {
                self.failed_evaluations as f64 / self.total_evaluations as f64
            } else {
                0.0
            },
            champion: self.champion.clone(),
            champion_generation: self.champion_generation,
            hall_of_fame: self.hall_of_fame.get_all().to_vec(),
            diversity_alerts: self.monitor.alert_count(),
            last_record: self.monitor.latest().cloned(),
        }
    }

    /// Drive the state machine until a stop condition, cancellation or a fatal error.
    pub fn run<C: ProgressCallback + ?Sized>(&mut self, callback: &mut C) -> Result<RunReport> {
        if self.outcome.is_some() {
            return Ok(self.report());
        }

        info!(
            "Starting evolution: population {}, up to {} generations, fingerprint {}",
            self.config.evolution.population_size,
            self.config.evolution.max_generations,
            &self.fingerprint[..12.min(self.fingerprint.len())]
        );

        loop {
            match self.phase {
                Phase::Init => {
                    self.initialize()?;
                    self.phase = Phase::Evaluate;
                }
                Phase::Evaluate => {
                    callback.on_generation_start(self.generation);
                    let outcome = self.evaluate_generation()?;
                    callback.on_batch_evaluated(self.generation, &outcome);
                    self.phase = Phase::Rank;
                }
                Phase::Rank => {
                    let record = self.rank_and_record();
                    callback.on_generation_complete(&record, self.hall_of_fame.len());

                    let cancelled = self.cancel.load(Ordering::SeqCst);
                    if cancelled || self.config.checkpoint.is_due(self.generation) {
                        if let Some(path) = self.save_checkpoint()? {
                            callback.on_checkpoint(self.generation, &path);
                        }
                    }
                    if cancelled {
                        warn!("Run cancelled after generation {}", self.generation);
                        return self.finish(RunOutcome::Cancelled);
                    }
                    self.phase = Phase::Select;
                }
                Phase::Select => {
                    if let Some(outcome) = self.stop_condition() {
                        return self.finish(outcome);
                    }
                    self.select_elites();
                    self.phase = Phase::Reproduce;
                }
                Phase::Reproduce => {
                    self.reproduce()?;
                    self.phase = Phase::Evaluate;
                }
            }
        }
    }

    /// Write a checkpoint of the current state. `None` when no directory is configured.
    pub fn save_checkpoint(&self) -> Result<Option<PathBuf>> {
        match &self.store {
            Some(store) => store.save(&self.snapshot()).map(Some),
            None => Ok(None),
        }
    }

    pub fn snapshot(&self) -> Checkpoint {
        Checkpoint {
            format_version: CHECKPOINT_FORMAT_VERSION,
            generation_number: self.generation,
            population: self.population.clone(),
            champion: self.champion.clone(),
            rng_state: self.rng.clone(),
            config_fingerprint: self.fingerprint.clone(),
            next_id: Some(self.next_id),
            champion_generation: self.champion_generation,
            hall_of_fame: self.hall_of_fame.get_all().to_vec(),
            history: self.monitor.history().to_vec(),
            total_evaluations: self.total_evaluations,
            failed_evaluations: self.failed_evaluations,
            generations_without_improvement: self.generations_without_improvement,
            saved_at: Utc::now(),
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn champion_sharpe(&self) -> Option<f64> {
        self.champion.as_ref().and_then(|c| c.sharpe())
    }

    fn initialize(&mut self) -> Result<()> {
        // A fresh run starts from an empty checkpoint directory
        if let Some(store) = &self.store {
            let removed = store.clear()?;
            if removed > 0 {
                warn!("Removed {} checkpoints left by a previous run", removed);
            }
        }

        let size = self.config.evolution.population_size;
        let weights = self.config.templates.initial_weights(&self.registry);
        let allocation = allocate_templates(&weights, size);

        let mut population = Vec::with_capacity(size);
        for (template, count) in allocation {
            debug!("Initial population: {} x {}", count, template);
            for _ in 0..count {
                let genome = self.registry.sample_genome(template, &mut self.rng)?;
                let id = self.allocate_id();
                population.push(Individual::new(id, genome, 0, Vec::new()));
            }
        }

        if population.len() != size {
            return Err(ForgeError::Configuration(format!(
                "Template allocation produced {} of {} individuals",
                population.len(),
                size
            )));
        }

        self.population = population;
        self.generation = 0;
        Ok(())
    }

    /// Evaluate pending individuals, retrying the whole batch while the oracle is down.
    fn evaluate_generation(&mut self) -> Result<BatchOutcome> {
        let max_attempts = self.config.evaluation.max_retries + 1;
        let backoff = Duration::from_millis(self.config.evaluation.retry_backoff_ms);
        let mut elapsed = Duration::ZERO;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let pending: Vec<usize> = self
                .population
                .iter()
                .enumerate()
                .filter(|(_, ind)| ind.is_pending())
                .map(|(i, _)| i)
                .collect();

            let outcome = self.evaluator.evaluate_population(&mut self.population);
            elapsed += outcome.elapsed;

            if !outcome.oracle_unavailable() {
                self.total_evaluations += outcome.attempted;
                self.failed_evaluations += outcome.failed;
                self.last_evaluation_time = elapsed;
                return Ok(outcome);
            }

            for &i in &pending {
                self.population[i].reset_evaluation();
            }

            let reason = outcome.last_error.unwrap_or_default();
            if attempt == max_attempts {
                error!(
                    "Oracle unavailable for generation {} after {} attempts: {}",
                    self.generation, attempt, reason
                );
                return Err(ForgeError::OracleUnavailable {
                    generation: self.generation,
                    attempts: attempt,
                    reason,
                });
            }

            let wait = backoff * attempt as u32;
            warn!(
                "Oracle unavailable for generation {} (attempt {}/{}): {}. Retrying in {:?}",
                self.generation, attempt, max_attempts, reason, wait
            );
            std::thread::sleep(wait);
        }
    }

    fn rank_and_record(&mut self) -> GenerationRecord {
        self.ranking = rank_population(&self.population, &self.config.evolution.objectives);

        let champion_updated = self.update_champion();
        if champion_updated {
            self.generations_without_improvement = 0;
        } else {
            self.generations_without_improvement += 1;
        }

        for individual in &self.population {
            self.hall_of_fame.try_add(individual);
        }

        let champion_sharpe = self.champion_sharpe();
        let record = self.monitor.record_generation(
            &self.population,
            &self.registry,
            GenerationContext {
                generation: self.generation,
                ranking: &self.ranking,
                evaluation_time: self.last_evaluation_time,
                champion_updated,
                champion_sharpe,
            },
        );
        self.generations_completed = self.generation + 1;
        record
    }

    /// Replace the champion when someone strictly beats its Sharpe.
    fn update_champion(&mut self) -> bool {
        let Some(best) = self
            .population
            .iter()
            .filter(|ind| ind.is_viable())
            .min_by(|a, b| compare_primary(a, b))
        else {
            return false;
        };

        let improves = match (best.sharpe(), self.champion_sharpe()) {
            (Some(candidate), Some(current)) => candidate > current,
            (Some(_), None) => true,
            _ => false,
        };

        if improves {
            info!(
                "New champion in generation {}: individual {} ({}) sharpe {:.4}",
                self.generation,
                best.id,
                best.genome.template_type(),
                best.sharpe().unwrap_or_default()
            );
            self.champion = Some(best.clone());
            self.champion_generation = Some(self.generation);
        }
        improves
    }

    fn stop_condition(&self) -> Option<RunOutcome> {
        let evolution = &self.config.evolution;

        if let (Some(target), Some(current)) = (evolution.target_sharpe, self.champion_sharpe()) {
            if current >= target {
                return Some(RunOutcome::TargetReached);
            }
        }
        if let Some(limit) = evolution.stagnation_limit {
            if self.generations_without_improvement >= limit {
                return Some(RunOutcome::Stagnated);
            }
        }
        if self.generation + 1 >= evolution.max_generations {
            return Some(RunOutcome::Completed);
        }
        None
    }

    fn finish(&mut self, outcome: RunOutcome) -> Result<RunReport> {
        self.outcome = Some(outcome);
        self.monitor.flush();

        let report = self.report();
        info!(
            "Evolution finished ({:?}) after {} generations: {} evaluations, {:.1}% failed",
            outcome,
            report.generations_completed,
            report.total_evaluations,
            report.failure_fraction * 100.0
        );

        if self.champion.is_none() && outcome != RunOutcome::Cancelled {
            error!("No successful evaluation in {} generations", report.generations_completed);
            return Err(ForgeError::NoViableStrategies {
                generations: report.generations_completed,
                evaluations: report.total_evaluations,
            });
        }
        Ok(report)
    }

    /// Carry the best viable individuals over unchanged.
    fn select_elites(&mut self) {
        let elite_count = self
            .config
            .evolution
            .elite_count
            .min(self.config.evolution.population_size);

        self.offspring = self
            .ranking
            .order
            .iter()
            .map(|entry| &self.population[entry.index])
            .filter(|ind| ind.is_viable())
            .take(elite_count)
            .cloned()
            .collect();

        debug!(
            "Generation {}: {} elites carried over",
            self.generation,
            self.offspring.len()
        );
    }

    fn reproduce(&mut self) -> Result<()> {
        let size = self.config.evolution.population_size;
        let born = self.generation + 1;
        let mut next = std::mem::take(&mut self.offspring);

        while next.len() < size {
            let (genome, parent_ids) = self.breed()?;
            let id = self.allocate_id();
            next.push(Individual::new(id, genome, born, parent_ids));
        }

        self.population = next;
        self.generation = born;
        Ok(())
    }

    /// One child genome plus its parents.
    fn breed(&mut self) -> Result<(Genome, Vec<u64>)> {
        let use_generator = self.generator.is_some()
            && self.champion.is_some()
            && self.rng.gen::<f64>() < self.config.evolution.generator_rate;
        if use_generator {
            return self.breed_from_champion();
        }

        let k = self.config.evolution.tournament_size;
        let first = tournament_selection(&self.population, k, &mut self.rng);
        let second = tournament_selection(&self.population, k, &mut self.rng);
        let (p1, p2) = (&self.population[first], &self.population[second]);

        let (mut genome, kind) = crossover(&p1.genome, &p2.genome, &mut self.rng);
        let parent_ids = match kind {
            _ if p1.id == p2.id => vec![p1.id],
            CrossoverKind::Uniform => vec![p1.id, p2.id],
            CrossoverKind::WholeParent { from_first: true } => vec![p1.id],
            CrossoverKind::WholeParent { from_first: false } => vec![p2.id],
        };

        self.apply_mutation(&mut genome)?;
        Ok((genome, parent_ids))
    }

    /// Ask the generator for a variant of the champion, falling back to mutating a copy.
    fn breed_from_champion(&mut self) -> Result<(Genome, Vec<u64>)> {
        let Some(champion) = self.champion.clone() else {
            return Err(ForgeError::Configuration(
                "Candidate generation requires a champion".to_string(),
            ));
        };

        if let Some(genome) = self.request_candidate(&champion) {
            return Ok((genome, vec![champion.id]));
        }

        let mut genome = champion.genome.clone();
        self.apply_mutation(&mut genome)?;
        Ok((genome, vec![champion.id]))
    }

    fn request_candidate(&self, champion: &Individual) -> Option<Genome> {
        let generator = Arc::clone(self.generator.as_ref()?);
        let metrics = champion.metrics.clone()?;
        let genome = champion.genome.clone();
        let failures: Vec<FailureSummary> = self
            .population
            .iter()
            .filter_map(FailureSummary::from_individual)
            .take(RECENT_FAILURE_LIMIT)
            .collect();
        let timeout = Duration::from_millis(self.config.evaluation.generator_timeout_ms);

        let result = run_with_deadline("stratforge-generator", timeout, move || {
            generator.generate(&genome, &metrics, &failures)
        });

        match result {
            Ok(Some(candidate)) => match self.registry.validate(&candidate) {
                Ok(()) => Some(candidate),
                Err(e) => {
                    warn!("Generator produced an invalid genome, falling back to mutation: {}", e);
                    None
                }
            },
            Ok(None) => {
                debug!("Generator returned no candidate, falling back to mutation");
                None
            }
            Err(e) => {
                warn!("Generator call failed ({:?}), falling back to mutation", e);
                None
            }
        }
    }

    fn apply_mutation(&mut self, genome: &mut Genome) -> Result<()> {
        let summary = mutate(genome, &self.registry, &self.config.mutation.rates(), &mut self.rng)?;
        if summary.changed() {
            debug!(
                "Mutated {} parameters{}",
                summary.mutated_parameters.len(),
                if summary.template_switched.is_some() { " after template switch" } else { "" }
            );
        }

        if self.rng.gen::<f64>() < self.config.mutation.exit_mutation_rate {
            let record = self.exit_mutator.mutate(genome, &mut self.rng);
            if record.succeeded {
                debug!(
                    "Exit mutation {}: {:?} -> {:?}{}",
                    record.parameter,
                    record.old_value,
                    record.new_value,
                    if record.clamped { " (clamped)" } else { "" }
                );
            }
        }
        Ok(())
    }
}
