pub mod config;
pub mod engines;
pub mod error;
pub mod types;
pub mod utils;

pub use error::{ForgeError, Result};
