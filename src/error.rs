use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Invalid genome: {0}")]
    InvalidGenome(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Fitness oracle unavailable in generation {generation} after {attempts} attempts: {reason}")]
    OracleUnavailable {
        generation: usize,
        attempts: usize,
        reason: String,
    },

    #[error("No viable strategies found after {generations} generations ({evaluations} evaluations)")]
    NoViableStrategies { generations: usize, evaluations: usize },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Checkpoint fingerprint {found} does not match current configuration {expected}")]
    FingerprintMismatch { expected: String, found: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, ForgeError>;
