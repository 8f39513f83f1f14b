//! Information-service lookup used for weather forecasts.

use std::collections::HashMap;
use std::fmt;

use crate::market::TimeInterval;

/// One forecast or measured value for one interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalMeasurement {
    pub time_interval: TimeInterval,
    pub value: f64,
}

/// Named measurement series provided by the host, e.g. an outdoor-air
/// temperature forecast.
pub trait InformationLookup: fmt::Debug + Send + Sync {
    fn by_name(&self, name: &str) -> Option<Vec<IntervalMeasurement>>;
}

/// Returns the value recorded for `time_interval`, if any.
pub fn value_for(series: &[IntervalMeasurement], time_interval: &TimeInterval) -> Option<f64> {
    series
        .iter()
        .find(|m| m.time_interval == *time_interval)
        .map(|m| m.value)
}

/// In-memory [`InformationLookup`].
#[derive(Debug, Clone, Default)]
pub struct InformationBoard {
    series: HashMap<String, Vec<IntervalMeasurement>>,
}

impl InformationBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the series stored under `name`.
    pub fn set_series(&mut self, name: impl Into<String>, values: Vec<IntervalMeasurement>) {
        self.series.insert(name.into(), values);
    }

    /// Upserts one interval value in the series `name`.
    pub fn record(&mut self, name: &str, time_interval: TimeInterval, value: f64) {
        let series = self.series.entry(name.to_string()).or_default();
        match series.iter_mut().find(|m| m.time_interval == time_interval) {
            Some(m) => m.value = value,
            None => series.push(IntervalMeasurement {
                time_interval,
                value,
            }),
        }
    }
}

impl InformationLookup for InformationBoard {
    fn by_name(&self, name: &str) -> Option<Vec<IntervalMeasurement>> {
        self.series.get(name).cloned()
    }
}
