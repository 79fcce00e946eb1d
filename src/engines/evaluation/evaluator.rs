use crate::config::EvaluationConfig;
use crate::engines::evaluation::oracle::{BacktestReport, EvalError, FitnessOracle};
use crate::engines::generation::genome::{Genome, TemplateRegistry};
use crate::engines::generation::individual::Individual;
use crate::error::{ForgeError, Result};
use crate::types::MultiObjectiveMetrics;
use crate::utils::deadline::{run_with_deadline, DeadlineError};
use log::{debug, info};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metrics plus the reason an evaluation failed, if it did
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub metrics: MultiObjectiveMetrics,
    pub error: Option<EvalError>,
}

/// Summary of one `evaluate_population` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub unavailable: usize,
    pub elapsed: Duration,
    pub last_error: Option<String>,
}

impl BatchOutcome {
    /// Every attempted evaluation hit an infrastructure outage.
    pub fn oracle_unavailable(&self) -> bool {
        self.attempted > 0 && self.unavailable == self.attempted
    }
}

/// Turns genomes into metrics through the oracle, one deadline per genome
pub struct FitnessEvaluator {
    oracle: Arc<dyn FitnessOracle>,
    registry: Arc<TemplateRegistry>,
    timeout: Duration,
    pool: rayon::ThreadPool,
}

impl FitnessEvaluator {
    pub fn new(
        oracle: Arc<dyn FitnessOracle>,
        registry: Arc<TemplateRegistry>,
        config: &EvaluationConfig,
    ) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("stratforge-eval-{}", i));
        if let Some(threads) = config.worker_threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| ForgeError::Configuration(format!("Failed to build worker pool: {}", e)))?;

        Ok(Self {
            oracle,
            registry,
            timeout: Duration::from_millis(config.timeout_ms),
            pool,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Score one genome. Never fails: problems come back as `success = false`.
    pub fn evaluate(&self, genome: &Genome, timeout: Duration) -> MultiObjectiveMetrics {
        self.evaluate_detailed(genome, timeout).metrics
    }

    pub fn evaluate_detailed(&self, genome: &Genome, timeout: Duration) -> EvaluationOutcome {
        if let Err(e) = self.registry.validate(genome) {
            return failure(EvalError::InvalidGenome(e.to_string()));
        }

        let oracle = Arc::clone(&self.oracle);
        let owned = genome.clone();
        let result = run_with_deadline("stratforge-oracle", timeout, move || {
            oracle.evaluate(&owned, timeout)
        });

        match result {
            Ok(Ok(report)) => EvaluationOutcome {
                metrics: metrics_from_report(&report),
                error: None,
            },
            Ok(Err(e)) => failure(e),
            Err(DeadlineError::Expired) => failure(EvalError::Timeout),
            Err(DeadlineError::Aborted(msg)) => failure(EvalError::ExecutionFailure(msg)),
        }
    }

    /// Evaluate every pending individual in parallel and block until all finish.
    ///
    /// Individuals already Evaluated or Failed are left untouched.
    pub fn evaluate_population(&self, population: &mut [Individual]) -> BatchOutcome {
        let start = Instant::now();
        let timeout = self.timeout;

        let results: Vec<(usize, EvaluationOutcome)> = self.pool.install(|| {
            population
                .par_iter()
                .enumerate()
                .filter(|(_, ind)| ind.is_pending())
                .map(|(i, ind)| (i, self.evaluate_detailed(&ind.genome, timeout)))
                .collect()
        });

        let mut outcome = BatchOutcome {
            attempted: results.len(),
            ..Default::default()
        };

        for (i, result) in results {
            let individual = &mut population[i];
            match &result.error {
                None => outcome.succeeded += 1,
                Some(err) => {
                    outcome.failed += 1;
                    if matches!(err, EvalError::Unavailable(_)) {
                        outcome.unavailable += 1;
                    }
                    debug!("Individual {} failed evaluation: {}", individual.id, err);
                    outcome.last_error = Some(err.to_string());
                }
            }
            individual.apply_metrics(result.metrics, result.error.map(|e| e.to_string()));
        }

        outcome.elapsed = start.elapsed();
        info!(
            "Evaluated {} individuals in {:.2}s ({} failed)",
            outcome.attempted,
            outcome.elapsed.as_secs_f64(),
            outcome.failed
        );
        outcome
    }
}

fn failure(error: EvalError) -> EvaluationOutcome {
    EvaluationOutcome {
        metrics: MultiObjectiveMetrics::failed(),
        error: Some(error),
    }
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Convert an oracle report into metrics, deriving Calmar from annual return and drawdown.
pub fn metrics_from_report(report: &BacktestReport) -> MultiObjectiveMetrics {
    let annual_return = finite_or_zero(report.annual_return);
    let max_drawdown = finite_or_zero(report.max_drawdown);
    let calmar_ratio = if max_drawdown != 0.0 {
        annual_return / max_drawdown.abs()
    } else {
        0.0
    };

    MultiObjectiveMetrics {
        sharpe_ratio: finite_or_zero(report.sharpe_ratio),
        calmar_ratio,
        max_drawdown,
        total_return: finite_or_zero(report.total_return),
        annual_return,
        win_rate: finite_or_zero(report.win_rate),
        success: true,
    }
}
