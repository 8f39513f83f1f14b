//! Dimmable lighting driven by an hourly level schedule.

use chrono::{DateTime, Timelike};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::warn;

use crate::config::ConfigError;
use crate::devices::types::{DeviceModel, Measurements, ModelContext, ModelError, linspace};
use crate::devices::{HOURS_PER_DAY, hourly_profile};

/// Configuration for a [`Lighting`] model.
#[derive(Debug, Clone, Deserialize)]
pub struct LightingConfig {
    /// Fixture power at full output (kW).
    pub rated_power: f64,
    /// Hourly dimming level in `[0, 1]`. Defaults to full output.
    #[serde(default)]
    pub default_lighting_schedule: Option<Vec<f64>>,
    /// Allowed deviation from the scheduled level.
    #[serde(default = "default_offset")]
    pub max_set_point_offset: f64,
    #[serde(default)]
    pub actuation_topic: Option<String>,
}

fn default_offset() -> f64 {
    0.1
}

/// Dimmable lighting following an hourly schedule.
#[derive(Debug, Clone)]
pub struct Lighting {
    rated_power: f64,
    schedule: [f64; HOURS_PER_DAY],
    max_set_point_offset: f64,
    n_points: usize,
    actuation_topic: Option<String>,
    current_time: Option<DateTime<Tz>>,
}

impl Lighting {
    /// Builds a lighting model from configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the schedule is not 24 values long or
    /// the rating or offset is negative.
    pub fn from_config(
        config: &LightingConfig,
        n_points: usize,
        field: &str,
    ) -> Result<Self, ConfigError> {
        if !(config.rated_power.is_finite() && config.rated_power >= 0.0) {
            return Err(ConfigError::new(
                format!("{field}.rated_power"),
                "must be a finite value >= 0",
            ));
        }
        if !(config.max_set_point_offset >= 0.0) {
            return Err(ConfigError::new(
                format!("{field}.max_set_point_offset"),
                "must be >= 0",
            ));
        }
        let schedule = match &config.default_lighting_schedule {
            Some(values) => hourly_profile(values, &format!("{field}.default_lighting_schedule"))?,
            None => {
                warn!("{field}: no lighting schedule configured, assuming full output");
                [1.0; HOURS_PER_DAY]
            }
        };
        Ok(Self {
            rated_power: config.rated_power,
            schedule,
            max_set_point_offset: config.max_set_point_offset,
            n_points,
            actuation_topic: config.actuation_topic.clone(),
            current_time: None,
        })
    }

    fn hour(&self, context: &ModelContext) -> Result<usize, ModelError> {
        context
            .interval_time
            .or(self.current_time)
            .map(|t| t.hour() as usize)
            .ok_or(ModelError::MissingMeasurement("interval_time"))
    }
}

impl DeviceModel for Lighting {
    fn device_type(&self) -> &'static str {
        "Lighting"
    }

    fn predict_power(&self, context: &ModelContext) -> Result<f64, ModelError> {
        let level = match context.set_point {
            Some(sp) => sp,
            None => self.schedule[self.hour(context)?],
        };
        Ok(-level * self.rated_power)
    }

    fn predict_flexibility(&self, context: &ModelContext) -> Result<Vec<f64>, ModelError> {
        let level = self.schedule[self.hour(context)?];
        let offset = self.max_set_point_offset;
        Ok(linspace(level - offset, level + offset, self.n_points)
            .into_iter()
            .map(|sp| -sp * self.rated_power)
            .collect())
    }

    fn set_point_range(&self, interval_start: DateTime<Tz>) -> Option<(f64, f64)> {
        let level = self.schedule[interval_start.hour() as usize];
        Some((level - self.max_set_point_offset, level + self.max_set_point_offset))
    }

    fn actuation_target(&self) -> Option<&str> {
        self.actuation_topic.as_deref()
    }

    fn update_data(&mut self, _data: &Measurements, now: DateTime<Tz>) -> Result<(), ModelError> {
        self.current_time = Some(now);
        Ok(())
    }
}
