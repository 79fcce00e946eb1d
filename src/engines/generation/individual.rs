use crate::engines::generation::genome::Genome;
use crate::types::{EvaluationStatus, MultiObjectiveMetrics};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A genome plus its evaluation state and lineage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub id: u64,
    pub genome: Genome,
    pub metrics: Option<MultiObjectiveMetrics>,
    pub status: EvaluationStatus,
    #[serde(default)]
    pub generation_born: usize,
    #[serde(default)]
    pub parent_ids: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

pub type Population = Vec<Individual>;

impl Individual {
    pub fn new(id: u64, genome: Genome, generation_born: usize, parent_ids: Vec<u64>) -> Self {
        Self {
            id,
            genome,
            metrics: None,
            status: EvaluationStatus::Unevaluated,
            generation_born,
            parent_ids,
            failure_reason: None,
        }
    }

    /// True when the individual was evaluated and the oracle reported success.
    pub fn is_viable(&self) -> bool {
        self.status == EvaluationStatus::Evaluated
            && self.metrics.as_ref().map(|m| m.success).unwrap_or(false)
    }

    pub fn is_pending(&self) -> bool {
        self.status == EvaluationStatus::Unevaluated
    }

    /// Sharpe ratio of a viable individual.
    pub fn sharpe(&self) -> Option<f64> {
        if self.is_viable() {
            self.metrics.as_ref().map(|m| m.sharpe_ratio)
        } else {
            None
        }
    }

    /// Drawdown magnitude of a viable individual.
    pub fn drawdown(&self) -> Option<f64> {
        if self.is_viable() {
            self.metrics.as_ref().map(|m| m.max_drawdown.abs())
        } else {
            None
        }
    }

    /// Record an evaluation result.
    pub fn apply_metrics(&mut self, metrics: MultiObjectiveMetrics, failure_reason: Option<String>) {
        self.status = if metrics.success {
            EvaluationStatus::Evaluated
        } else {
            EvaluationStatus::Failed
        };
        self.metrics = Some(metrics);
        self.failure_reason = failure_reason;
    }

    pub fn reset_evaluation(&mut self) {
        self.status = EvaluationStatus::Unevaluated;
        self.metrics = None;
        self.failure_reason = None;
    }
}

/// Primary-objective ordering: higher Sharpe first, then lower drawdown, then lower id.
///
/// Non-viable individuals sort after every viable one. Returns `Ordering::Less`
/// when `a` is the better individual.
pub fn compare_primary(a: &Individual, b: &Individual) -> Ordering {
    match (a.sharpe(), b.sharpe()) {
        (Some(sa), Some(sb)) => sb
            .partial_cmp(&sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                let da = a.drawdown().unwrap_or(f64::INFINITY);
                let db = b.drawdown().unwrap_or(f64::INFINITY);
                da.partial_cmp(&db).unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    }
}
