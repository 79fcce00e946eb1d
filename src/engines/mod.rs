pub mod evaluation;
pub mod generation;
pub mod monitoring;
pub mod persistence;
