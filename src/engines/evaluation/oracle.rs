use crate::engines::generation::genome::Genome;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Raw backtest output. Missing or non-finite fields are read as 0.0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    #[serde(default)]
    pub sharpe_ratio: Option<f64>,
    #[serde(default)]
    pub annual_return: Option<f64>,
    #[serde(default)]
    pub max_drawdown: Option<f64>,
    #[serde(default)]
    pub win_rate: Option<f64>,
    #[serde(default)]
    pub total_return: Option<f64>,
}

impl BacktestReport {
    pub fn new(sharpe_ratio: f64, annual_return: f64, max_drawdown: f64, win_rate: f64) -> Self {
        Self {
            sharpe_ratio: Some(sharpe_ratio),
            annual_return: Some(annual_return),
            max_drawdown: Some(max_drawdown),
            win_rate: Some(win_rate),
            total_return: None,
        }
    }

    pub fn with_total_return(mut self, total_return: f64) -> Self {
        self.total_return = Some(total_return);
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("evaluation timed out")]
    Timeout,

    #[error("execution failure: {0}")]
    ExecutionFailure(String),

    #[error("invalid genome: {0}")]
    InvalidGenome(String),

    /// The backtest infrastructure itself is down, as opposed to this genome failing.
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

/// Scores a genome by backtesting it.
///
/// Implementations must give up on their own once `timeout` has passed. The
/// evaluator stops waiting at the deadline but cannot stop the call, so an
/// oracle that ignores `timeout` keeps one thread busy per expired evaluation.
pub trait FitnessOracle: Send + Sync {
    fn evaluate(&self, genome: &Genome, timeout: Duration) -> Result<BacktestReport, EvalError>;
}

impl<F> FitnessOracle for F
where
    F: Fn(&Genome, Duration) -> Result<BacktestReport, EvalError> + Send + Sync,
{
    fn evaluate(&self, genome: &Genome, timeout: Duration) -> Result<BacktestReport, EvalError> {
        self(genome, timeout)
    }
}
