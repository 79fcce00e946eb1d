pub mod diversity;
pub mod monitor;

pub use diversity::DiversityMeter;
pub use monitor::{EvolutionMonitor, GenerationContext, GenerationRecord, MetricSummary};
