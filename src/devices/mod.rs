//! Device models predicting power and flexibility for one asset.

pub mod lighting;
pub mod thermostat;
pub mod types;
pub mod uncontrolled;

use serde::Deserialize;

use crate::config::ConfigError;

pub use lighting::{Lighting, LightingConfig};
pub use thermostat::{Thermostat, ThermostatConfig};
pub use types::{DeviceModel, Measurements, ModelContext, ModelError};
pub use uncontrolled::{UncontrolledConfig, UncontrolledLoad};

/// Number of entries in an hourly profile.
pub const HOURS_PER_DAY: usize = 24;

/// Model parameters, selected by `model_type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "model_type", rename_all = "snake_case")]
pub enum ModelConfig {
    Thermostat(ThermostatConfig),
    Lighting(LightingConfig),
    UncontrolledLoad(UncontrolledConfig),
}

impl ModelConfig {
    /// Instantiates the configured model.
    ///
    /// # Errors
    ///
    /// Propagates the model's own validation error, reported under `field`.
    pub fn build(&self, n_points: usize, field: &str) -> Result<Box<dyn DeviceModel>, ConfigError> {
        Ok(match self {
            Self::Thermostat(cfg) => Box::new(Thermostat::from_config(cfg, n_points, field)?),
            Self::Lighting(cfg) => Box::new(Lighting::from_config(cfg, n_points, field)?),
            Self::UncontrolledLoad(cfg) => {
                Box::new(UncontrolledLoad::from_config(cfg, n_points, field)?)
            }
        })
    }
}

/// One model in an asset's frame, keyed by the device topic it listens on.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    pub topic: String,
    #[serde(flatten)]
    pub model: ModelConfig,
}

/// Checks that `values` holds one entry per hour of the day.
pub(crate) fn hourly_profile(
    values: &[f64],
    field: &str,
) -> Result<[f64; HOURS_PER_DAY], ConfigError> {
    let profile: [f64; HOURS_PER_DAY] = values.try_into().map_err(|_| {
        ConfigError::new(
            field,
            format!("expected {HOURS_PER_DAY} hourly values, got {}", values.len()),
        )
    })?;
    if let Some(bad) = profile.iter().position(|v| !v.is_finite()) {
        return Err(ConfigError::new(field, format!("value at hour {bad} is not finite")));
    }
    Ok(profile)
}
