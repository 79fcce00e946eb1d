pub mod evaluator;
pub mod oracle;
pub mod synthetic;

pub use evaluator::{metrics_from_report, BatchOutcome, EvaluationOutcome, FitnessEvaluator};
pub use oracle::{BacktestReport, EvalError, FitnessOracle};
pub use synthetic::SyntheticOracle;
