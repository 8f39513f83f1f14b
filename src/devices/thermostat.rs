//! Regression model of a cooling thermostat's duty cycle.

use chrono::{DateTime, Timelike};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::debug;

use crate::config::ConfigError;
use crate::devices::types::{DeviceModel, Measurements, ModelContext, ModelError, linspace};
use crate::devices::{HOURS_PER_DAY, hourly_profile};

/// Telemetry point carrying the outdoor air temperature.
pub const OUTDOOR_AIR_TEMPERATURE: &str = "OutdoorAirTemperature";
/// Telemetry point carrying the active cooling setpoint.
pub const COOLING_SET_POINT: &str = "ZoneCoolingTemperatureSetPoint";
/// Telemetry point carrying the zone temperature.
pub const ZONE_TEMPERATURE: &str = "ZoneTemperature";

/// Configuration for a [`Thermostat`] model.
#[derive(Debug, Clone, Deserialize)]
pub struct ThermostatConfig {
    /// Hourly setpoint coefficients.
    pub c1: Vec<f64>,
    /// Hourly zone-temperature coefficients.
    pub c2: Vec<f64>,
    /// Hourly outdoor-temperature coefficients.
    pub c3: Vec<f64>,
    /// Hourly intercepts.
    pub c4: Vec<f64>,
    /// Compressor power at full duty (kW).
    pub rated_power: f64,
    #[serde(default = "default_nominal_set_point")]
    pub nominal_set_point: f64,
    #[serde(default = "default_max_set_point_offset")]
    pub max_set_point_offset: f64,
    /// Initial outdoor air temperature until telemetry arrives.
    #[serde(default)]
    pub oat: f64,
    /// Initial cooling setpoint until telemetry arrives.
    #[serde(default = "default_nominal_set_point")]
    pub csp: f64,
    /// Initial zone temperature until telemetry arrives.
    #[serde(default = "default_nominal_set_point")]
    pub room_temp: f64,
    #[serde(default)]
    pub actuation_topic: Option<String>,
}

fn default_nominal_set_point() -> f64 {
    22.8
}

fn default_max_set_point_offset() -> f64 {
    2.0
}

/// A cooling thermostat modelled by an hourly linear duty-cycle regression.
///
/// `duty = c1[h]·setpoint + c2[h]·zone_temp + c3[h]·outdoor_temp + c4[h]`,
/// clamped to `[0, 1]`, where `h` is the local hour of the interval.
/// Predicted power is `-duty · rated_power`.
#[derive(Debug, Clone)]
pub struct Thermostat {
    c1: [f64; HOURS_PER_DAY],
    c2: [f64; HOURS_PER_DAY],
    c3: [f64; HOURS_PER_DAY],
    c4: [f64; HOURS_PER_DAY],
    rated_power: f64,
    nominal_set_point: f64,
    max_set_point_offset: f64,
    n_points: usize,
    actuation_topic: Option<String>,

    oat: f64,
    csp: f64,
    room_temp: f64,
    current_time: Option<DateTime<Tz>>,
    stale: bool,
}

impl Thermostat {
    /// Builds a thermostat from configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] under `field` when a coefficient vector does
    /// not hold exactly 24 hourly values or a numeric parameter is invalid.
    pub fn from_config(
        config: &ThermostatConfig,
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
        Ok(Self {
            c1: hourly_profile(&config.c1, &format!("{field}.c1"))?,
            c2: hourly_profile(&config.c2, &format!("{field}.c2"))?,
            c3: hourly_profile(&config.c3, &format!("{field}.c3"))?,
            c4: hourly_profile(&config.c4, &format!("{field}.c4"))?,
            rated_power: config.rated_power,
            nominal_set_point: config.nominal_set_point,
            max_set_point_offset: config.max_set_point_offset,
            n_points,
            actuation_topic: config.actuation_topic.clone(),
            oat: config.oat,
            csp: config.csp,
            room_temp: config.room_temp,
            current_time: None,
            stale: false,
        })
    }

    /// Returns `true` when the last telemetry message was incomplete.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    fn duty_cycle(&self, oat: f64, zone_temp: f64, set_point: f64, hour: usize) -> f64 {
        let q = set_point * self.c1[hour] + zone_temp * self.c2[hour] + oat * self.c3[hour]
            + self.c4[hour];
        q.clamp(0.0, 1.0)
    }
}

impl DeviceModel for Thermostat {
    fn device_type(&self) -> &'static str {
        "Thermostat"
    }

    fn predict_power(&self, context: &ModelContext) -> Result<f64, ModelError> {
        let hour = context
            .interval_time
            .or(self.current_time)
            .map(|t| t.hour() as usize)
            .ok_or(ModelError::MissingMeasurement("interval_time"))?;
        let set_point = context.set_point.unwrap_or(self.csp);
        let oat = context.outside_air_temperature.unwrap_or(self.oat);
        let zone_temp = context.zone_temperature.unwrap_or(self.room_temp);

        Ok(-self.duty_cycle(oat, zone_temp, set_point, hour) * self.rated_power)
    }

    fn predict_flexibility(&self, context: &ModelContext) -> Result<Vec<f64>, ModelError> {
        let (lo, hi) = self.range();
        linspace(lo, hi, self.n_points)
            .into_iter()
            .map(|sp| self.predict_power(&context.clone().with_set_point(sp)))
            .collect()
    }

    fn set_point_range(&self, _interval_start: DateTime<Tz>) -> Option<(f64, f64)> {
        Some(self.range())
    }

    fn actuation_target(&self) -> Option<&str> {
        self.actuation_topic.as_deref()
    }

    fn update_data(&mut self, data: &Measurements, now: DateTime<Tz>) -> Result<(), ModelError> {
        let read = |key: &'static str| {
            data.get(key)
                .copied()
                .ok_or(ModelError::MissingMeasurement(key))
        };
        let reading = read(OUTDOOR_AIR_TEMPERATURE).and_then(|oat| {
            Ok((oat, read(COOLING_SET_POINT)?, read(ZONE_TEMPERATURE)?))
        });
        match reading {
            Ok((oat, csp, room_temp)) => {
                self.oat = oat;
                self.csp = csp;
                self.room_temp = room_temp;
                self.current_time = Some(now);
                self.stale = false;
                Ok(())
            }
            Err(e) => {
                debug!("thermostat telemetry rejected: {e}");
                self.stale = true;
                Err(e)
            }
        }
    }
}

impl Thermostat {
    fn range(&self) -> (f64, f64) {
        (
            self.nominal_set_point - self.max_set_point_offset,
            self.nominal_set_point + self.max_set_point_offset,
        )
    }
}
