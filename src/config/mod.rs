pub mod traits;
pub mod evolution;
pub mod mutation;
pub mod evaluation;
pub mod monitoring;
pub mod checkpoint;
pub mod templates;
pub mod manager;

pub use manager::{AppConfig, ConfigManager};
pub use evolution::EvolutionConfig;
pub use mutation::MutationConfig;
pub use evaluation::EvaluationConfig;
pub use monitoring::MonitoringConfig;
pub use checkpoint::CheckpointConfig;
pub use templates::TemplateConfig;
pub use traits::ConfigSection;
