//! Common types and traits for device models.

use std::collections::HashMap;
use std::fmt;

use chrono::DateTime;
use chrono_tz::Tz;
use thiserror::Error;

/// Latest telemetry for one device, keyed by point name.
pub type Measurements = HashMap<String, f64>;

/// Contextual information passed to models during prediction.
///
/// Every field is optional. A model falls back to its last observed value
/// where it has one and reports [`ModelError::MissingMeasurement`] otherwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelContext {
    /// Start of the interval being predicted, in the asset's local time.
    pub interval_time: Option<DateTime<Tz>>,
    /// Outdoor air temperature (°C).
    pub outside_air_temperature: Option<f64>,
    /// Zone temperature (°C).
    pub zone_temperature: Option<f64>,
    /// Setpoint to evaluate instead of the device's current one.
    pub set_point: Option<f64>,
    /// Whether the space is occupied during the interval.
    pub occupied: Option<bool>,
}

impl ModelContext {
    /// Creates a context for the interval starting at `interval_time`.
    pub fn at(interval_time: DateTime<Tz>) -> Self {
        Self {
            interval_time: Some(interval_time),
            ..Self::default()
        }
    }

    pub fn with_outside_air_temperature(mut self, oat: Option<f64>) -> Self {
        self.outside_air_temperature = oat;
        self
    }

    pub fn with_zone_temperature(mut self, temperature: f64) -> Self {
        self.zone_temperature = Some(temperature);
        self
    }

    pub fn with_set_point(mut self, set_point: f64) -> Self {
        self.set_point = Some(set_point);
        self
    }

    pub fn with_occupied(mut self, occupied: bool) -> Self {
        self.occupied = Some(occupied);
        self
    }
}

/// Why a model could not produce a prediction or accept telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("missing measurement `{0}`")]
    MissingMeasurement(&'static str),
}

/// A physical model of one controllable or uncontrolled device.
///
/// Power follows the load convention: consumption is negative.
pub trait DeviceModel: fmt::Debug + Send + Sync {
    /// Returns a human-readable type name for the device.
    fn device_type(&self) -> &'static str;

    /// Predicted average power (kW) for the context.
    fn predict_power(&self, context: &ModelContext) -> Result<f64, ModelError>;

    /// Predicted power at evenly spaced setpoints across the setpoint range,
    /// lowest setpoint first. The length equals the frame's curve resolution.
    fn predict_flexibility(&self, context: &ModelContext) -> Result<Vec<f64>, ModelError>;

    /// Allowed `(min, max)` setpoint for the interval starting at `interval_start`,
    /// or `None` when the device cannot be commanded.
    fn set_point_range(&self, interval_start: DateTime<Tz>) -> Option<(f64, f64)>;

    /// Point that receives setpoint commands, if the device is actuatable.
    fn actuation_target(&self) -> Option<&str> {
        None
    }

    /// Whether the device publishes telemetry the model should ingest.
    fn accepts_telemetry(&self) -> bool {
        true
    }

    /// Stores the latest telemetry observed at `now`.
    fn update_data(&mut self, data: &Measurements, now: DateTime<Tz>) -> Result<(), ModelError>;
}

/// `n` evenly spaced values from `lo` to `hi` inclusive.
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { hi } else { lo + step * i as f64 })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linspace_includes_both_ends() {
        assert_eq!(linspace(20.8, 24.8, 2), vec![20.8, 24.8]);
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn linspace_degenerate_lengths() {
        assert!(linspace(1.0, 2.0, 0).is_empty());
        assert_eq!(linspace(1.0, 2.0, 1), vec![1.0]);
    }
}
