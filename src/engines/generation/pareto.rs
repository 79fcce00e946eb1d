//! Pareto optimization utilities for multi-objective evolution
//! Implements NSGA-II style fast non-dominated sorting and crowding distance

use crate::engines::generation::individual::Individual;
use crate::types::MultiObjectiveMetrics;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Defines whether a metric should be maximized or minimized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationDirection {
    Maximize,
    Minimize,
}

/// Metric that can serve as an objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    SharpeRatio,
    CalmarRatio,
    MaxDrawdown,
    TotalReturn,
    AnnualReturn,
    WinRate,
}

impl MetricKind {
    /// Drawdown is read as a magnitude so either sign convention ranks the same.
    pub fn extract(&self, metrics: &MultiObjectiveMetrics) -> f64 {
        match self {
            MetricKind::SharpeRatio => metrics.sharpe_ratio,
            MetricKind::CalmarRatio => metrics.calmar_ratio,
            MetricKind::MaxDrawdown => metrics.max_drawdown.abs(),
            MetricKind::TotalReturn => metrics.total_return,
            MetricKind::AnnualReturn => metrics.annual_return,
            MetricKind::WinRate => metrics.win_rate,
        }
    }
}

/// Configuration for a single objective in multi-objective optimization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveConfig {
    pub metric: MetricKind,
    pub direction: OptimizationDirection,
}

impl ObjectiveConfig {
    pub fn maximize(metric: MetricKind) -> Self {
        Self { metric, direction: OptimizationDirection::Maximize }
    }

    pub fn minimize(metric: MetricKind) -> Self {
        Self { metric, direction: OptimizationDirection::Minimize }
    }

    pub fn defaults() -> Vec<ObjectiveConfig> {
        vec![
            Self::maximize(MetricKind::SharpeRatio),
            Self::maximize(MetricKind::CalmarRatio),
            Self::minimize(MetricKind::MaxDrawdown),
        ]
    }
}

/// Individual with multiple objective values
#[derive(Debug, Clone)]
pub struct MultiObjectiveIndividual<T> {
    pub data: T,
    pub objectives: Vec<f64>,
    pub rank: usize,           // Pareto rank (0 = best frontier)
    pub crowding_distance: f64, // Diversity measure
}

impl<T> MultiObjectiveIndividual<T> {
    pub fn new(data: T, objectives: Vec<f64>) -> Self {
        Self {
            data,
            objectives,
            rank: 0,
            crowding_distance: 0.0,
        }
    }
}

/// `a` dominates `b` when it is no worse on every objective and strictly
/// better on at least one. Mismatched lengths never dominate.
pub fn dominates(a: &[f64], b: &[f64], directions: &[OptimizationDirection]) -> bool {
    if a.len() != b.len() || a.len() != directions.len() {
        return false;
    }

    let mut strictly_better = false;
    for ((&x, &y), direction) in a.iter().zip(b).zip(directions) {
        let ordering = match direction {
            OptimizationDirection::Maximize => x.partial_cmp(&y),
            OptimizationDirection::Minimize => y.partial_cmp(&x),
        };
        match ordering {
            Some(Ordering::Less) => return false,
            Some(Ordering::Greater) => strictly_better = true,
            _ => {}
        }
    }
    strictly_better
}

/// NSGA-II fast non-dominated sort. Sets `rank` on every member and returns
/// the fronts as indices, best front first.
pub fn fast_non_dominated_sort<T>(
    individuals: &mut [MultiObjectiveIndividual<T>],
    directions: &[OptimizationDirection],
) -> Vec<Vec<usize>> {
    let n = individuals.len();
    let mut dominated_by_count = vec![0usize; n];
    let mut dominates_list: Vec<Vec<usize>> = vec![Vec::new(); n];

    for i in 0..n {
        for j in (i + 1)..n {
            let (oi, oj) = (&individuals[i].objectives, &individuals[j].objectives);
            if dominates(oi, oj, directions) {
                dominates_list[i].push(j);
                dominated_by_count[j] += 1;
            } else if dominates(oj, oi, directions) {
                dominates_list[j].push(i);
                dominated_by_count[i] += 1;
            }
        }
    }

    let mut fronts = Vec::new();
    let mut current: Vec<usize> = (0..n).filter(|&i| dominated_by_count[i] == 0).collect();

    while !current.is_empty() {
        let mut next = Vec::new();
        for &i in &current {
            individuals[i].rank = fronts.len();
            for &j in &dominates_list[i] {
                dominated_by_count[j] -= 1;
                if dominated_by_count[j] == 0 {
                    next.push(j);
                }
            }
        }
        next.sort_unstable();
        fronts.push(std::mem::replace(&mut current, next));
    }

    fronts
}

/// Crowding distance within one front. Boundary members, and every member of
/// a front of two or fewer, get infinity.
pub fn calculate_crowding_distance<T>(
    individuals: &mut [MultiObjectiveIndividual<T>],
    front: &[usize],
) {
    if front.len() <= 2 {
        for &idx in front {
            individuals[idx].crowding_distance = f64::INFINITY;
        }
        return;
    }

    for &idx in front {
        individuals[idx].crowding_distance = 0.0;
    }

    let last = front.len() - 1;
    let objective_count = individuals[front[0]].objectives.len();

    for obj in 0..objective_count {
        let mut sorted = front.to_vec();
        sorted.sort_by(|&a, &b| {
            individuals[a].objectives[obj]
                .partial_cmp(&individuals[b].objectives[obj])
                .unwrap_or(Ordering::Equal)
        });

        let low = individuals[sorted[0]].objectives[obj];
        let high = individuals[sorted[last]].objectives[obj];
        individuals[sorted[0]].crowding_distance = f64::INFINITY;
        individuals[sorted[last]].crowding_distance = f64::INFINITY;

        let span = high - low;
        if span.abs() < 1e-10 {
            continue;
        }
        for window in sorted.windows(3) {
            let gap = individuals[window[2]].objectives[obj] - individuals[window[0]].objectives[obj];
            individuals[window[1]].crowding_distance += gap / span;
        }
    }
}

/// Extract objective values from metrics based on configuration
pub fn extract_objectives(
    metrics: &MultiObjectiveMetrics,
    objective_configs: &[ObjectiveConfig],
) -> Vec<f64> {
    objective_configs
        .iter()
        .map(|config| config.metric.extract(metrics))
        .collect()
}

/// Rank position of one population member
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntry {
    pub index: usize,
    pub front: usize,
    pub crowding_distance: f64,
}

/// Derived ranking of a fully evaluated population
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    /// Population indices, best first.
    pub order: Vec<RankedEntry>,
    /// Fronts of viable individuals as population indices. Non-viable ones are excluded.
    pub fronts: Vec<Vec<usize>>,
}

impl Ranking {
    pub fn pareto_front_size(&self) -> usize {
        self.fronts.first().map(|f| f.len()).unwrap_or(0)
    }

    /// The first `n` population indices in rank order.
    pub fn top(&self, n: usize) -> Vec<usize> {
        self.order.iter().take(n).map(|e| e.index).collect()
    }
}

/// Non-dominated sort of the viable members, with failures appended as the last front.
///
/// Order inside the population: front, then Sharpe (desc), then crowding
/// distance (desc), then id.
pub fn rank_population(population: &[Individual], objectives: &[ObjectiveConfig]) -> Ranking {
    let directions: Vec<_> = objectives.iter().map(|c| c.direction).collect();

    let mut viable: Vec<MultiObjectiveIndividual<usize>> = population
        .iter()
        .enumerate()
        .filter_map(|(i, ind)| {
            if !ind.is_viable() {
                return None;
            }
            ind.metrics
                .as_ref()
                .map(|m| MultiObjectiveIndividual::new(i, extract_objectives(m, objectives)))
        })
        .collect();

    let local_fronts = fast_non_dominated_sort(&mut viable, &directions);
    for front in &local_fronts {
        calculate_crowding_distance(&mut viable, front);
    }

    let fronts: Vec<Vec<usize>> = local_fronts
        .iter()
        .map(|front| front.iter().map(|&k| viable[k].data).collect())
        .collect();

    let failed_front = local_fronts.len();
    let mut order: Vec<RankedEntry> = viable
        .iter()
        .map(|v| RankedEntry {
            index: v.data,
            front: v.rank,
            crowding_distance: v.crowding_distance,
        })
        .collect();

    order.extend(
        population
            .iter()
            .enumerate()
            .filter(|(_, ind)| !ind.is_viable())
            .map(|(i, _)| RankedEntry {
                index: i,
                front: failed_front,
                crowding_distance: 0.0,
            }),
    );

    order.sort_by(|a, b| {
        a.front
            .cmp(&b.front)
            .then_with(|| {
                let sa = population[a.index].sharpe().unwrap_or(f64::NEG_INFINITY);
                let sb = population[b.index].sharpe().unwrap_or(f64::NEG_INFINITY);
                sb.partial_cmp(&sa).unwrap_or(Ordering::Equal)
            })
            .then_with(|| {
                b.crowding_distance
                    .partial_cmp(&a.crowding_distance)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| population[a.index].id.cmp(&population[b.index].id))
    });

    Ranking { order, fronts }
}
