use crate::engines::evaluation::BatchOutcome;
use crate::engines::monitoring::GenerationRecord;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

pub trait ProgressCallback: Send {
    fn on_generation_start(&mut self, generation: usize);
    fn on_batch_evaluated(&mut self, generation: usize, outcome: &BatchOutcome);
    fn on_generation_complete(&mut self, record: &GenerationRecord, hall_of_fame_size: usize);
    fn on_checkpoint(&mut self, generation: usize, path: &Path);
}

/// Ignores every event
pub struct SilentProgress;

impl ProgressCallback for SilentProgress {
    fn on_generation_start(&mut self, _generation: usize) {}
    fn on_batch_evaluated(&mut self, _generation: usize, _outcome: &BatchOutcome) {}
    fn on_generation_complete(&mut self, _record: &GenerationRecord, _hall_of_fame_size: usize) {}
    fn on_checkpoint(&mut self, _generation: usize, _path: &Path) {}
}

pub struct ConsoleProgressCallback;

impl ProgressCallback for ConsoleProgressCallback {
    fn on_generation_start(&mut self, generation: usize) {
        info!("Generation {} starting...", generation + 1);
    }

    fn on_batch_evaluated(&mut self, generation: usize, outcome: &BatchOutcome) {
        if outcome.attempted > 0 {
            info!(
                "  Generation {}: evaluated {} strategies ({} failed)",
                generation + 1,
                outcome.attempted,
                outcome.failed
            );
        }
    }

    fn on_generation_complete(&mut self, record: &GenerationRecord, hall_of_fame_size: usize) {
        info!(
            "Generation {} complete. Best sharpe: {:.4}, champion: {}, Hall of Fame size: {}",
            record.generation + 1,
            record.sharpe.best,
            record
                .champion_sharpe
                .map(|s| format!("{:.4}", s))
                .unwrap_or_else(|| "none".to_string()),
            hall_of_fame_size
        );
    }

    fn on_checkpoint(&mut self, generation: usize, path: &Path) {
        info!("  Checkpoint for generation {} at {}", generation + 1, path.display());
    }
}

/// Progress events for a consumer on another thread
#[derive(Debug, Clone)]
pub enum ProgressMessage {
    GenerationStart(usize),
    BatchEvaluated { generation: usize, attempted: usize, failed: usize },
    GenerationComplete { record: Box<GenerationRecord>, hall_of_fame_size: usize },
    Checkpoint { generation: usize, path: PathBuf },
}

pub struct ChannelProgressCallback {
    sender: Sender<ProgressMessage>,
}

impl ChannelProgressCallback {
    pub fn new(sender: Sender<ProgressMessage>) -> Self {
        Self { sender }
    }
}

// A dropped receiver only means nobody is listening any more.
impl ProgressCallback for ChannelProgressCallback {
    fn on_generation_start(&mut self, generation: usize) {
        let _ = self.sender.send(ProgressMessage::GenerationStart(generation));
    }

    fn on_batch_evaluated(&mut self, generation: usize, outcome: &BatchOutcome) {
        let _ = self.sender.send(ProgressMessage::BatchEvaluated {
            generation,
            attempted: outcome.attempted,
            failed: outcome.failed,
        });
    }

    fn on_generation_complete(&mut self, record: &GenerationRecord, hall_of_fame_size: usize) {
        let _ = self.sender.send(ProgressMessage::GenerationComplete {
            record: Box::new(record.clone()),
            hall_of_fame_size,
        });
    }

    fn on_checkpoint(&mut self, generation: usize, path: &Path) {
        let _ = self.sender.send(ProgressMessage::Checkpoint {
            generation,
            path: path.to_path_buf(),
        });
    }
}
