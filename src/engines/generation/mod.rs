pub mod candidate_generator;
pub mod exit_mutation;
pub mod genome;
pub mod hall_of_fame;
pub mod individual;
pub mod operators;
pub mod pareto;
pub mod population_manager;
pub mod progress;

pub use candidate_generator::{CandidateGenerator, FailureSummary};
pub use exit_mutation::{ExitMutationRecord, ExitParameterMutator, ExitParameterSpec};
pub use genome::{Genome, ParamDomain, ParamSpec, TemplateRegistry, TemplateSchema};
pub use hall_of_fame::HallOfFame;
pub use individual::{Individual, Population};
pub use pareto::{MetricKind, ObjectiveConfig, OptimizationDirection, Ranking};
pub use population_manager::{Phase, PopulationManager, RunOutcome, RunReport};
pub use progress::{ChannelProgressCallback, ConsoleProgressCallback, ProgressCallback, ProgressMessage, SilentProgress};
