use crate::error::ForgeError;
use serde::{Deserialize, Serialize};

/// Trait for configuration sections
pub trait ConfigSection: Serialize + for<'de> Deserialize<'de> + Default + Clone {
    fn section_name() -> &'static str;
    fn validate(&self) -> Result<(), ForgeError>;
}

pub(crate) fn check_rate(section: &str, name: &str, value: f64) -> Result<(), ForgeError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ForgeError::Configuration(format!(
            "{}.{} must be between 0 and 1",
            section, name
        )));
    }
    Ok(())
}
