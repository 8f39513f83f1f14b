//! Aggregation of heterogeneous device models into one asset-level prediction.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::ConfigError;
use crate::devices::{DeviceModel, ModelContext};

/// Default number of points on a flexibility curve.
pub const DEFAULT_CURVE_POINTS: usize = 2;

/// The device models of one asset, keyed by device topic.
///
/// Every model samples its flexibility at the same `n_points` setpoint ratios,
/// so curves can be summed element-wise.
#[derive(Debug)]
pub struct ModelFrame {
    models: BTreeMap<String, Box<dyn DeviceModel>>,
    n_points: usize,
}

impl ModelFrame {
    /// Creates an empty frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `n_points < 2`.
    pub fn new(n_points: usize) -> Result<Self, ConfigError> {
        if n_points < 2 {
            return Err(ConfigError::new(
                "demand_curve_points",
                format!("must be >= 2, got {n_points}"),
            ));
        }
        Ok(Self {
            models: BTreeMap::new(),
            n_points,
        })
    }

    /// Registers `model` under `topic`, replacing any previous one.
    pub fn insert(&mut self, topic: impl Into<String>, model: Box<dyn DeviceModel>) {
        self.models.insert(topic.into(), model);
    }

    pub fn n_points(&self) -> usize {
        self.n_points
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Iterates `(topic, model)` pairs in topic order.
    pub fn models(&self) -> impl Iterator<Item = (&str, &dyn DeviceModel)> {
        self.models.iter().map(|(k, m)| (k.as_str(), m.as_ref()))
    }

    pub fn get_mut(&mut self, topic: &str) -> Option<&mut (dyn DeviceModel + 'static)> {
        self.models.get_mut(topic).map(|m| m.as_mut())
    }

    /// Sum of every model's predicted power.
    ///
    /// Models that cannot predict, or predict a non-finite value, are
    /// skipped. Returns `None` when no model contributed.
    pub fn aggregate_power(&self, context: &ModelContext) -> Option<f64> {
        let mut total = None;
        for (topic, model) in &self.models {
            match model.predict_power(context) {
                Ok(p) if p.is_finite() => *total.get_or_insert(0.0) += p,
                Ok(p) => debug!("{topic}: discarding non-finite power {p}"),
                Err(e) => debug!("{topic}: skipped in power aggregate: {e}"),
            }
        }
        total
    }

    /// Element-wise sum of every model's flexibility curve.
    ///
    /// Models that cannot predict, or return a curve of the wrong length or
    /// with non-finite points, are skipped. The result always has
    /// `n_points` entries and is all zeros when nothing contributed.
    pub fn aggregate_flexibility(&self, context: &ModelContext) -> Vec<f64> {
        let mut total = vec![0.0; self.n_points];
        for (topic, model) in &self.models {
            match model.predict_flexibility(context) {
                Ok(curve) if curve.len() == self.n_points && curve.iter().all(|p| p.is_finite()) => {
                    for (acc, p) in total.iter_mut().zip(curve) {
                        *acc += p;
                    }
                }
                Ok(curve) => debug!(
                    "{topic}: discarding flexibility curve of {} points",
                    curve.len()
                ),
                Err(e) => debug!("{topic}: skipped in flexibility aggregate: {e}"),
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{Measurements, ModelError};
    use chrono::{DateTime, TimeZone};
    use chrono_tz::Tz;

    #[derive(Debug)]
    struct Fixed {
        power: Result<f64, ModelError>,
        curve: Vec<f64>,
    }

    impl DeviceModel for Fixed {
        fn device_type(&self) -> &'static str {
            "Fixed"
        }
        fn predict_power(&self, _: &ModelContext) -> Result<f64, ModelError> {
            self.power.clone()
        }
        fn predict_flexibility(&self, _: &ModelContext) -> Result<Vec<f64>, ModelError> {
            self.power.clone().map(|_| self.curve.clone())
        }
        fn set_point_range(&self, _: DateTime<Tz>) -> Option<(f64, f64)> {
            None
        }
        fn update_data(&mut self, _: &Measurements, _: DateTime<Tz>) -> Result<(), ModelError> {
            Ok(())
        }
    }

    fn ctx() -> ModelContext {
        ModelContext::at(Tz::UTC.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap())
    }

    #[test]
    fn rejects_single_point_curves() {
        assert!(ModelFrame::new(1).is_err());
        assert!(ModelFrame::new(2).is_ok());
    }

    #[test]
    fn sums_models_and_skips_failures() {
        let mut frame = ModelFrame::new(2).unwrap();
        frame.insert("a", Box::new(Fixed { power: Ok(-1.0), curve: vec![-2.0, -0.5] }));
        frame.insert("b", Box::new(Fixed { power: Ok(-3.0), curve: vec![-4.0, -3.0] }));
        frame.insert(
            "c",
            Box::new(Fixed {
                power: Err(ModelError::MissingMeasurement("ZoneTemperature")),
                curve: vec![],
            }),
        );

        assert_eq!(frame.aggregate_power(&ctx()), Some(-4.0));
        assert_eq!(frame.aggregate_flexibility(&ctx()), vec![-6.0, -3.5]);
    }

    #[test]
    fn empty_aggregate_signals_no_prediction() {
        let mut frame = ModelFrame::new(3).unwrap();
        assert_eq!(frame.aggregate_power(&ctx()), None);
        assert_eq!(frame.aggregate_flexibility(&ctx()), vec![0.0; 3]);

        frame.insert("nan", Box::new(Fixed { power: Ok(f64::NAN), curve: vec![0.0; 3] }));
        assert_eq!(frame.aggregate_power(&ctx()), None);
    }

    #[test]
    fn mismatched_curve_is_skipped() {
        let mut frame = ModelFrame::new(2).unwrap();
        frame.insert("ok", Box::new(Fixed { power: Ok(-1.0), curve: vec![-1.0, 0.0] }));
        frame.insert("bad", Box::new(Fixed { power: Ok(-1.0), curve: vec![-1.0; 5] }));
        assert_eq!(frame.aggregate_flexibility(&ctx()), vec![-1.0, 0.0]);
    }
}
