use serde::{Deserialize, Serialize};
use std::fmt;

/// Strategy template family. Parameter semantics are template-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    Momentum,
    MeanReversion,
    Breakout,
    FactorRotation,
}

impl TemplateType {
    pub const ALL: [TemplateType; 4] = [
        TemplateType::Momentum,
        TemplateType::MeanReversion,
        TemplateType::Breakout,
        TemplateType::FactorRotation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateType::Momentum => "momentum",
            TemplateType::MeanReversion => "mean_reversion",
            TemplateType::Breakout => "breakout",
            TemplateType::FactorRotation => "factor_rotation",
        }
    }
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single genome parameter value.
///
/// Serialized untagged so checkpoint files read as plain `name: value` maps.
/// Integral JSON numbers decode as `Int`, fractional ones as `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Categorical(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Categorical(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Categorical(v) => f.write_str(v),
        }
    }
}

/// Evaluation state of an individual
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Unevaluated,
    Evaluated,
    Failed,
}

/// Complete multi-objective evaluation result for one genome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiObjectiveMetrics {
    pub sharpe_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown: f64,
    pub total_return: f64,
    pub annual_return: f64,
    pub win_rate: f64,
    pub success: bool,
}

impl MultiObjectiveMetrics {
    /// Zero-valued metrics marking a failed evaluation.
    pub fn failed() -> Self {
        Self::default()
    }
}
