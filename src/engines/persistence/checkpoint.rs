//! Crash-safe run snapshots.
//!
//! Every file is written to a temporary sibling, synced, then renamed into
//! place, so a crash mid-write leaves the previous checkpoint untouched.
//! `latest.json` points at the newest snapshot and is replaced the same way.

use crate::engines::generation::individual::Individual;
use crate::engines::monitoring::GenerationRecord;
use crate::error::{ForgeError, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;
const LATEST_FILE: &str = "latest.json";
const FILE_PREFIX: &str = "checkpoint-gen-";

fn current_format_version() -> u32 {
    CHECKPOINT_FORMAT_VERSION
}

/// Full state of a run after a completely evaluated generation.
///
/// Fields added after the first format version carry serde defaults so older
/// files stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default = "current_format_version")]
    pub format_version: u32,
    pub generation_number: usize,
    pub population: Vec<Individual>,
    pub champion: Option<Individual>,
    pub rng_state: ChaCha8Rng,
    pub config_fingerprint: String,
    #[serde(default)]
    pub next_id: Option<u64>,
    #[serde(default)]
    pub champion_generation: Option<usize>,
    #[serde(default)]
    pub hall_of_fame: Vec<Individual>,
    #[serde(default)]
    pub history: Vec<GenerationRecord>,
    #[serde(default)]
    pub total_evaluations: usize,
    #[serde(default)]
    pub failed_evaluations: usize,
    #[serde(default)]
    pub generations_without_improvement: usize,
    #[serde(default = "Utc::now")]
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Abort when the checkpoint was produced under a different search space.
    pub fn verify_fingerprint(&self, expected: &str) -> Result<()> {
        if self.config_fingerprint != expected {
            return Err(ForgeError::FingerprintMismatch {
                expected: expected.to_string(),
                found: self.config_fingerprint.clone(),
            });
        }
        Ok(())
    }

    /// Next unused individual id, derived from the population when the field is absent.
    pub fn resolved_next_id(&self) -> u64 {
        let max_seen = self
            .population
            .iter()
            .chain(self.champion.iter())
            .chain(self.hall_of_fame.iter())
            .map(|ind| ind.id + 1)
            .max()
            .unwrap_or(0);
        self.next_id.unwrap_or(0).max(max_seen)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LatestPointer {
    file: String,
    generation_number: usize,
}

pub struct CheckpointStore {
    dir: PathBuf,
    keep_last: usize,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(dir: P, keep_last: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            ForgeError::Checkpoint(format!(
                "Failed to create checkpoint directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir, keep_last: keep_last.max(1) })
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        let name = format!("{}{:06}.json", FILE_PREFIX, checkpoint.generation_number);
        let path = self.dir.join(&name);

        write_json_atomic(&path, checkpoint)?;
        write_json_atomic(
            &self.dir.join(LATEST_FILE),
            &LatestPointer {
                file: name,
                generation_number: checkpoint.generation_number,
            },
        )?;

        info!(
            "Checkpoint saved for generation {} at {}",
            checkpoint.generation_number,
            path.display()
        );
        self.prune(checkpoint.generation_number);
        Ok(path)
    }

    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<Checkpoint> {
        read_json(path.as_ref())
    }

    /// Newest checkpoint, or `None` when the directory holds none.
    pub fn load_latest(&self) -> Result<Option<Checkpoint>> {
        let pointer_path = self.dir.join(LATEST_FILE);
        if pointer_path.exists() {
            let pointer: LatestPointer = read_json(&pointer_path)?;
            return self.load(self.dir.join(pointer.file)).map(Some);
        }

        match self.list()?.pop() {
            Some(path) => {
                warn!("No {} pointer, falling back to {}", LATEST_FILE, path.display());
                self.load(path).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Checkpoint files, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            ForgeError::Checkpoint(format!("Failed to list {}: {}", self.dir.display(), e))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(FILE_PREFIX) && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Remove every checkpoint file and the `latest.json` pointer. Returns the
    /// number of checkpoint files deleted.
    pub fn clear(&self) -> Result<usize> {
        let files = self.list()?;
        for path in &files {
            fs::remove_file(path).map_err(|e| {
                ForgeError::Checkpoint(format!("Failed to remove {}: {}", path.display(), e))
            })?;
        }
        let pointer = self.dir.join(LATEST_FILE);
        if pointer.exists() {
            fs::remove_file(&pointer).map_err(|e| {
                ForgeError::Checkpoint(format!("Failed to remove {}: {}", pointer.display(), e))
            })?;
        }
        Ok(files.len())
    }

    /// Keep the newest `keep_last` files up to `saved_generation`, which is
    /// always among them. Files numbered past it belong to an older run.
    fn prune(&self, saved_generation: usize) {
        let files = match self.list() {
            Ok(files) => files,
            Err(e) => {
                warn!("Skipping checkpoint pruning: {}", e);
                return;
            }
        };

        let (current, stale): (Vec<PathBuf>, Vec<PathBuf>) = files
            .into_iter()
            .partition(|path| generation_of(path).map_or(false, |g| g <= saved_generation));
        let excess = current.len().saturating_sub(self.keep_last);

        for path in stale.iter().chain(current[..excess].iter()) {
            match fs::remove_file(path) {
                Ok(()) => debug!("Pruned old checkpoint {}", path.display()),
                Err(e) => warn!("Failed to prune {}: {}", path.display(), e),
            }
        }
    }
}

fn generation_of(path: &Path) -> Option<usize> {
    path.file_stem()?
        .to_str()?
        .strip_prefix(FILE_PREFIX)?
        .parse()
        .ok()
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)?;

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    };

    write().map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        ForgeError::Checkpoint(format!("Failed to write {}: {}", path.display(), e))
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| {
        ForgeError::Checkpoint(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        ForgeError::Checkpoint(format!("Corrupt checkpoint {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::generation::genome::TemplateRegistry;
    use crate::types::{MultiObjectiveMetrics, TemplateType};
    use rand::{Rng, SeedableRng};

    fn sample_checkpoint(generation: usize) -> Checkpoint {
        let registry = TemplateRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(generation as u64);
        let population: Vec<Individual> = (0..4)
            .map(|i| {
                let genome = registry.sample_genome(TemplateType::ALL[i % 4], &mut rng).unwrap();
                let mut ind = Individual::new(i as u64, genome, generation, vec![]);
                if i % 2 == 0 {
                    ind.apply_metrics(
                        MultiObjectiveMetrics { sharpe_ratio: 0.1 * i as f64, success: true, ..Default::default() },
                        None,
                    );
                } else {
                    ind.apply_metrics(MultiObjectiveMetrics::failed(), Some("evaluation timed out".into()));
                }
                ind
            })
            .collect();

        // Advance the generator so the saved state is mid-stream
        let _: u64 = rng.gen();

        Checkpoint {
            format_version: CHECKPOINT_FORMAT_VERSION,
            generation_number: generation,
            champion: Some(population[2].clone()),
            population,
            rng_state: rng,
            config_fingerprint: "abc123".to_string(),
            next_id: Some(4),
            champion_generation: Some(generation),
            hall_of_fame: Vec::new(),
            history: Vec::new(),
            total_evaluations: 4,
            failed_evaluations: 2,
            generations_without_improvement: 0,
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn test_round_trip_preserves_state_and_rng_stream() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 3).unwrap();
        let checkpoint = sample_checkpoint(7);

        store.save(&checkpoint).unwrap();
        let loaded = store.load_latest().unwrap().unwrap();

        assert_eq!(loaded.population, checkpoint.population);
        assert_eq!(loaded.champion, checkpoint.champion);

        let mut original_rng = checkpoint.rng_state.clone();
        let mut restored_rng = loaded.rng_state.clone();
        let expected: Vec<u64> = (0..16).map(|_| original_rng.gen()).collect();
        let actual: Vec<u64> = (0..16).map(|_| restored_rng.gen()).collect();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 3).unwrap();
        store.save(&sample_checkpoint(1)).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_retention_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 2).unwrap();
        for generation in 0..5 {
            store.save(&sample_checkpoint(generation)).unwrap();
        }

        let files = store.list().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(store.load_latest().unwrap().unwrap().generation_number, 4);
    }

    #[test]
    fn test_empty_directory_has_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 2).unwrap();
        assert!(store.load_latest().unwrap().is_none());
    }

    #[test]
    fn test_fingerprint_mismatch_is_rejected() {
        let checkpoint = sample_checkpoint(2);
        assert!(checkpoint.verify_fingerprint("abc123").is_ok());
        assert!(matches!(
            checkpoint.verify_fingerprint("other"),
            Err(ForgeError::FingerprintMismatch { .. })
        ));
    }

    #[test]
    fn test_older_files_without_optional_fields_still_load() {
        let full = serde_json::to_value(sample_checkpoint(3)).unwrap();
        let mut minimal = serde_json::Map::new();
        for key in ["generation_number", "population", "champion", "rng_state", "config_fingerprint"] {
            minimal.insert(key.to_string(), full[key].clone());
        }

        let loaded: Checkpoint = serde_json::from_value(serde_json::Value::Object(minimal)).unwrap();
        assert_eq!(loaded.format_version, CHECKPOINT_FORMAT_VERSION);
        assert!(loaded.history.is_empty());
        assert_eq!(loaded.resolved_next_id(), 4);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 2).unwrap();
        let path = dir.path().join("checkpoint-gen-000001.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(store.load(&path), Err(ForgeError::Checkpoint(_))));
    }

    #[test]
    fn test_shorter_run_after_longer_one_keeps_its_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 3).unwrap();
        for generation in 0..10 {
            store.save(&sample_checkpoint(generation)).unwrap();
        }

        store.save(&sample_checkpoint(0)).unwrap();
        store.save(&sample_checkpoint(1)).unwrap();

        let names: Vec<String> = store
            .list()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["checkpoint-gen-000000.json", "checkpoint-gen-000001.json"]);
        assert_eq!(store.load_latest().unwrap().unwrap().generation_number, 1);
    }

    #[test]
    fn test_clear_removes_checkpoints_and_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 5).unwrap();
        for generation in 0..3 {
            store.save(&sample_checkpoint(generation)).unwrap();
        }

        assert_eq!(store.clear().unwrap(), 3);
        assert!(!dir.path().join(LATEST_FILE).exists());
        assert!(store.load_latest().unwrap().is_none());
    }
}
