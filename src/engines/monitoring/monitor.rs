use crate::config::MonitoringConfig;
use crate::engines::generation::genome::TemplateRegistry;
use crate::engines::generation::individual::Individual;
use crate::engines::generation::pareto::Ranking;
use crate::engines::monitoring::diversity::DiversityMeter;
use crate::types::MultiObjectiveMetrics;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

/// Best / mean / median of one metric over the viable individuals
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub best: f64,
    pub mean: f64,
    pub median: f64,
}

impl MetricSummary {
    /// `higher_is_better` picks whether `best` is the max or the min.
    pub fn from_values(mut values: Vec<f64>, higher_is_better: bool) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        } else {
            values[n / 2]
        };
        let best = if higher_is_better { values[n - 1] } else { values[0] };

        Self { best, mean, median }
    }
}

/// Per-generation history entry, also the metrics export record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub generation: usize,
    pub sharpe: MetricSummary,
    pub calmar: MetricSummary,
    pub total_return: MetricSummary,
    /// Drawdown magnitude; `best` is the shallowest.
    pub drawdown: MetricSummary,
    pub parameter_diversity: f64,
    pub template_diversity: f64,
    pub combined_diversity: f64,
    pub diversity_alert: bool,
    pub pareto_front_size: usize,
    pub evaluated: usize,
    pub failed: usize,
    pub evaluation_seconds: f64,
    pub champion_updated: bool,
    #[serde(default)]
    pub champion_sharpe: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Inputs for one history entry besides the population itself
pub struct GenerationContext<'a> {
    pub generation: usize,
    pub ranking: &'a Ranking,
    pub evaluation_time: Duration,
    pub champion_updated: bool,
    pub champion_sharpe: Option<f64>,
}

/// Tracks diversity and appends one record per generation
pub struct EvolutionMonitor {
    meter: DiversityMeter,
    alert_threshold: f64,
    history: Vec<GenerationRecord>,
    sink_path: Option<PathBuf>,
    sink: Option<BufWriter<File>>,
}

impl EvolutionMonitor {
    pub fn new(config: &MonitoringConfig) -> Self {
        let sink = config.history_file.as_ref().and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(BufWriter::new(file)),
                Err(e) => {
                    warn!("Cannot open history file {}: {}", path.display(), e);
                    None
                }
            }
        });

        Self {
            meter: DiversityMeter::new(config.diversity_bins),
            alert_threshold: config.diversity_alert_threshold,
            history: Vec::new(),
            sink_path: config.history_file.clone(),
            sink,
        }
    }

    /// Reinstate history from a checkpoint. The history file is rewritten to
    /// match, dropping records of generations that will be run again.
    pub fn restore(&mut self, history: Vec<GenerationRecord>) {
        self.history = history;

        let Some(path) = self.sink_path.clone() else {
            return;
        };
        self.flush();
        self.sink = match File::create(&path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                warn!("Cannot rewrite history file {}: {}", path.display(), e);
                None
            }
        };
        if let Some(sink) = self.sink.as_mut() {
            for record in &self.history {
                write_record(sink, record);
            }
        }
    }

    pub fn record_generation(
        &mut self,
        population: &[Individual],
        registry: &TemplateRegistry,
        ctx: GenerationContext<'_>,
    ) -> GenerationRecord {
        let viable: Vec<&MultiObjectiveMetrics> = population
            .iter()
            .filter(|ind| ind.is_viable())
            .filter_map(|ind| ind.metrics.as_ref())
            .collect();
        let collect = |f: fn(&MultiObjectiveMetrics) -> f64| viable.iter().map(|m| f(m)).collect::<Vec<_>>();

        let parameter_diversity = self.meter.parameter_diversity(population, registry);
        let template_diversity = self.meter.template_diversity(population, registry.len());
        let combined_diversity = DiversityMeter::combined(parameter_diversity, template_diversity);
        let diversity_alert = combined_diversity < self.alert_threshold;

        if diversity_alert {
            warn!(
                "Generation {}: diversity {:.3} below threshold {:.3} (parameter {:.3}, template {:.3}), population may be converging prematurely",
                ctx.generation,
                combined_diversity,
                self.alert_threshold,
                parameter_diversity,
                template_diversity
            );
        }

        let record = GenerationRecord {
            generation: ctx.generation,
            sharpe: MetricSummary::from_values(collect(|m| m.sharpe_ratio), true),
            calmar: MetricSummary::from_values(collect(|m| m.calmar_ratio), true),
            total_return: MetricSummary::from_values(collect(|m| m.total_return), true),
            drawdown: MetricSummary::from_values(collect(|m| m.max_drawdown.abs()), false),
            parameter_diversity,
            template_diversity,
            combined_diversity,
            diversity_alert,
            pareto_front_size: ctx.ranking.pareto_front_size(),
            evaluated: viable.len(),
            failed: population.len() - viable.len(),
            evaluation_seconds: ctx.evaluation_time.as_secs_f64(),
            champion_updated: ctx.champion_updated,
            champion_sharpe: ctx.champion_sharpe,
            recorded_at: Utc::now(),
        };

        info!(
            "Generation {}: best sharpe {:.4}, mean {:.4}, front {}, diversity {:.3}, failed {}/{}",
            record.generation,
            record.sharpe.best,
            record.sharpe.mean,
            record.pareto_front_size,
            record.combined_diversity,
            record.failed,
            population.len()
        );

        self.write_to_sink(&record);
        self.history.push(record.clone());
        record
    }

    /// Record for one generation, for external metrics consumers.
    pub fn export(&self, generation: usize) -> Option<GenerationRecord> {
        self.history.iter().find(|r| r.generation == generation).cloned()
    }

    pub fn history(&self) -> &[GenerationRecord] {
        &self.history
    }

    pub fn latest(&self) -> Option<&GenerationRecord> {
        self.history.last()
    }

    pub fn alert_count(&self) -> usize {
        self.history.iter().filter(|r| r.diversity_alert).count()
    }

    pub fn flush(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.flush() {
                warn!("Failed to flush generation history: {}", e);
            }
        }
    }

    fn write_to_sink(&mut self, record: &GenerationRecord) {
        if let Some(sink) = self.sink.as_mut() {
            write_record(sink, record);
        }
    }
}

fn write_record(sink: &mut BufWriter<File>, record: &GenerationRecord) {
    let written = serde_json::to_string(record)
        .map_err(std::io::Error::from)
        .and_then(|line| writeln!(sink, "{}", line));
    if let Err(e) = written {
        warn!("Failed to write generation history: {}", e);
    }
}

impl Drop for EvolutionMonitor {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::generation::pareto::{rank_population, ObjectiveConfig};
    use crate::types::TemplateType;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn evaluated_population(sharpes: &[f64]) -> Vec<Individual> {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        sharpes
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let genome = registry.sample_genome(TemplateType::Breakout, &mut rng).unwrap();
                let mut ind = Individual::new(i as u64, genome, 0, vec![]);
                ind.apply_metrics(
                    MultiObjectiveMetrics { sharpe_ratio: s, max_drawdown: -0.1, success: true, ..Default::default() },
                    None,
                );
                ind
            })
            .collect()
    }

    #[test]
    fn test_metric_summary() {
        let summary = MetricSummary::from_values(vec![3.0, 1.0, 2.0, 10.0], true);
        assert_eq!(summary.best, 10.0);
        assert_eq!(summary.mean, 4.0);
        assert_eq!(summary.median, 2.5);

        let lower = MetricSummary::from_values(vec![0.3, 0.1, 0.2], false);
        assert_eq!(lower.best, 0.1);
        assert_eq!(lower.median, 0.2);

        assert_eq!(MetricSummary::from_values(vec![], true), MetricSummary::default());
    }

    #[test]
    fn test_record_and_export() {
        let registry = TemplateRegistry::default();
        let mut population = evaluated_population(&[0.5, 1.5, 1.0]);
        population[2].apply_metrics(MultiObjectiveMetrics::failed(), Some("timeout".into()));
        let ranking = rank_population(&population, &ObjectiveConfig::defaults());

        let mut monitor = EvolutionMonitor::new(&MonitoringConfig::default());
        monitor.record_generation(
            &population,
            &registry,
            GenerationContext {
                generation: 0,
                ranking: &ranking,
                evaluation_time: Duration::from_millis(250),
                champion_updated: true,
                champion_sharpe: Some(1.5),
            },
        );

        let record = monitor.export(0).unwrap();
        assert_eq!(record.sharpe.best, 1.5);
        assert_eq!(record.evaluated, 2);
        assert_eq!(record.failed, 1);
        assert!(record.champion_updated);
        assert!((record.evaluation_seconds - 0.25).abs() < 1e-9);
        assert!(monitor.export(1).is_none());
    }

    #[test]
    fn test_alert_on_converged_population() {
        let registry = TemplateRegistry::default();
        let base = evaluated_population(&[1.0]).remove(0);
        let population: Vec<Individual> = (0..5).map(|i| Individual { id: i, ..base.clone() }).collect();
        let ranking = rank_population(&population, &ObjectiveConfig::defaults());

        let mut monitor = EvolutionMonitor::new(&MonitoringConfig::default());
        let record = monitor.record_generation(
            &population,
            &registry,
            GenerationContext {
                generation: 3,
                ranking: &ranking,
                evaluation_time: Duration::ZERO,
                champion_updated: false,
                champion_sharpe: Some(1.0),
            },
        );

        assert_eq!(record.combined_diversity, 0.0);
        assert!(record.diversity_alert);
        assert_eq!(monitor.alert_count(), 1);
    }

    #[test]
    fn test_history_file_receives_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let config = MonitoringConfig { history_file: Some(path.clone()), ..Default::default() };
        let registry = TemplateRegistry::default();
        let population = evaluated_population(&[0.2, 0.4]);
        let ranking = rank_population(&population, &ObjectiveConfig::defaults());

        let mut monitor = EvolutionMonitor::new(&config);
        for generation in 0..2 {
            monitor.record_generation(
                &population,
                &registry,
                GenerationContext {
                    generation,
                    ranking: &ranking,
                    evaluation_time: Duration::ZERO,
                    champion_updated: false,
                    champion_sharpe: None,
                },
            );
        }
        monitor.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: GenerationRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.generation, 1);
    }

    #[test]
    fn test_restore_rewrites_history_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let config = MonitoringConfig { history_file: Some(path.clone()), ..Default::default() };
        let registry = TemplateRegistry::default();
        let population = evaluated_population(&[0.3, 0.9]);
        let ranking = rank_population(&population, &ObjectiveConfig::defaults());
        let context = |generation| GenerationContext {
            generation,
            ranking: &ranking,
            evaluation_time: Duration::ZERO,
            champion_updated: false,
            champion_sharpe: None,
        };

        // Generations 0..3 recorded, but the last checkpoint only covers 0 and 1
        let mut crashed = EvolutionMonitor::new(&config);
        for generation in 0..3 {
            crashed.record_generation(&population, &registry, context(generation));
        }
        let checkpointed = crashed.history()[..2].to_vec();
        drop(crashed);

        let mut resumed = EvolutionMonitor::new(&config);
        resumed.restore(checkpointed);
        resumed.record_generation(&population, &registry, context(2));
        resumed.flush();

        let generations: Vec<usize> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str::<GenerationRecord>(line).unwrap().generation)
            .collect();
        assert_eq!(generations, vec![0, 1, 2]);
    }
}
