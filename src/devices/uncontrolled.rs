//! Loads the asset cannot shift.

use chrono::{DateTime, Timelike};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::config::ConfigError;
use crate::devices::types::{DeviceModel, Measurements, ModelContext, ModelError};
use crate::devices::{HOURS_PER_DAY, hourly_profile};

/// Configuration for an [`UncontrolledLoad`].
#[derive(Debug, Clone, Deserialize)]
pub struct UncontrolledConfig {
    /// Hourly power draw (kW, positive for consumption).
    pub uncontrolled_load_schedule: Vec<f64>,
}

/// A fixed hourly load that cannot be shifted. Reported in the generation
/// convention, so a positive schedule entry predicts negative power.
#[derive(Debug, Clone)]
pub struct UncontrolledLoad {
    schedule: [f64; HOURS_PER_DAY],
    n_points: usize,
}

impl UncontrolledLoad {
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the schedule is not 24 values long.
    pub fn from_config(
        config: &UncontrolledConfig,
        n_points: usize,
        field: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            schedule: hourly_profile(
                &config.uncontrolled_load_schedule,
                &format!("{field}.uncontrolled_load_schedule"),
            )?,
            n_points,
        })
    }
}

impl DeviceModel for UncontrolledLoad {
    fn device_type(&self) -> &'static str {
        "UncontrolledLoad"
    }

    fn predict_power(&self, context: &ModelContext) -> Result<f64, ModelError> {
        let hour = context
            .interval_time
            .map(|t| t.hour() as usize)
            .ok_or(ModelError::MissingMeasurement("interval_time"))?;
        Ok(-self.schedule[hour])
    }

    fn predict_flexibility(&self, context: &ModelContext) -> Result<Vec<f64>, ModelError> {
        Ok(vec![self.predict_power(context)?; self.n_points])
    }

    fn set_point_range(&self, _interval_start: DateTime<Tz>) -> Option<(f64, f64)> {
        None
    }

    fn accepts_telemetry(&self) -> bool {
        false
    }

    fn update_data(&mut self, _data: &Measurements, _now: DateTime<Tz>) -> Result<(), ModelError> {
        Ok(())
    }
}
