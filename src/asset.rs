//! A controllable asset whose power and flexibility come from a [`ModelFrame`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::actuation::{ActuationCycle, ActuationManager, AssetView};
use crate::devices::{Measurements, ModelContext, ModelError};
use crate::frame::ModelFrame;
use crate::information::{InformationLookup, IntervalMeasurement, value_for};
use crate::market::{IntervalValue, MarketRef, PriceStats, TimeInterval, Vertex, prune_expired};

/// Smallest gap forced between the two vertex powers of a flat curve.
pub const FLEX_EPSILON: f64 = 1e-10;

/// Default name of the outdoor-temperature forecast series.
pub const DEFAULT_TEMPERATURE_FORECAST: &str = "OutdoorAirTemperature";

/// Binds a [`ModelFrame`] and an [`ActuationManager`] to one asset.
///
/// Market events drive [`schedule_power`](Self::schedule_power),
/// [`update_vertices`](Self::update_vertices) and [`actuate`](Self::actuate).
/// Records are kept per time interval and dropped once their market expires.
#[derive(Debug)]
pub struct ModelFrameAsset {
    name: String,
    tz: Tz,
    default_power: f64,
    price_multiplier: f64,
    temperature_forecast: String,
    information: Option<Arc<dyn InformationLookup>>,
    frame: ModelFrame,
    manager: ActuationManager,
    scheduled_powers: Vec<IntervalValue<f64>>,
    active_vertices: Vec<IntervalValue<Vertex>>,
    schedule_calculated: bool,
}

impl ModelFrameAsset {
    /// Creates an asset with zero default power and a price multiplier of 1.
    pub fn new(name: impl Into<String>, tz: Tz, frame: ModelFrame, manager: ActuationManager) -> Self {
        Self {
            name: name.into(),
            tz,
            default_power: 0.0,
            price_multiplier: 1.0,
            temperature_forecast: DEFAULT_TEMPERATURE_FORECAST.to_string(),
            information: None,
            frame,
            manager,
            scheduled_powers: Vec::new(),
            active_vertices: Vec::new(),
            schedule_calculated: false,
        }
    }

    /// Power (kW) scheduled when no model can predict.
    pub fn with_default_power(mut self, power: f64) -> Self {
        self.default_power = power;
        self
    }

    /// Width of the bid price range in standard deviations.
    pub fn with_price_multiplier(mut self, k: f64) -> Self {
        self.price_multiplier = k;
        self
    }

    /// Source of the outdoor-temperature forecast named `series`.
    pub fn with_information(
        mut self,
        series: impl Into<String>,
        information: Arc<dyn InformationLookup>,
    ) -> Self {
        self.temperature_forecast = series.into();
        self.information = Some(information);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn frame(&self) -> &ModelFrame {
        &self.frame
    }

    pub fn manager(&self) -> &ActuationManager {
        &self.manager
    }

    pub fn scheduled_powers(&self) -> &[IntervalValue<f64>] {
        &self.scheduled_powers
    }

    pub fn active_vertices(&self) -> &[IntervalValue<Vertex>] {
        &self.active_vertices
    }

    pub fn schedule_calculated(&self) -> bool {
        self.schedule_calculated
    }

    /// Scheduled power for `time_interval`, if one has been computed.
    pub fn scheduled_power(&self, time_interval: &TimeInterval) -> Option<f64> {
        self.scheduled_powers
            .iter()
            .find(|sp| sp.time_interval == *time_interval)
            .map(|sp| sp.value)
    }

    /// Vertices for `time_interval`, lower price first.
    pub fn vertices(&self, time_interval: &TimeInterval) -> Vec<Vertex> {
        self.active_vertices
            .iter()
            .filter(|v| v.time_interval == *time_interval)
            .map(|v| v.value)
            .collect()
    }

    /// Sets the operator gate on actuation.
    pub fn set_actuation_allowed(&mut self, allowed: bool) {
        self.manager.set_allowed(allowed);
    }

    /// Predicts the average power of every interval of `market`.
    ///
    /// Existing entries for the same interval are replaced, including the
    /// market they belong to. Entries of expired markets are dropped.
    pub fn schedule_power(&mut self, market: &MarketRef) {
        let temperatures = self.temperatures();
        let mut intervals = market.time_intervals();
        intervals.sort();

        for ti in intervals {
            let ctx = self.context(&ti, temperatures.as_deref());
            let value = match self.frame.aggregate_power(&ctx) {
                Some(p) => p,
                None => {
                    debug!(
                        "{}: no model prediction for {}, using default power",
                        self.name, ti.start
                    );
                    self.default_power
                }
            };

            match self
                .scheduled_powers
                .iter_mut()
                .find(|sp| sp.time_interval == ti)
            {
                Some(sp) => {
                    sp.value = value;
                    sp.market = Arc::clone(market);
                }
                None => self
                    .scheduled_powers
                    .push(IntervalValue::new(ti, Arc::clone(market), value)),
            }
        }

        prune_expired(&mut self.scheduled_powers);
        self.schedule_calculated = true;
    }

    /// Rebuilds the two bid vertices of every interval of `market`.
    pub fn update_vertices(&mut self, market: &MarketRef) {
        let temperatures = self.temperatures();
        let mut intervals = market.time_intervals();
        intervals.sort();

        for ti in intervals {
            let ctx = self.context(&ti, temperatures.as_deref());
            let curve = self.frame.aggregate_flexibility(&ctx);
            let stats = market.price_model(ti.start);
            let vertices = flexibility_vertices(&curve, stats, self.price_multiplier);

            self.active_vertices.retain(|v| v.time_interval != ti);
            self.active_vertices.extend(
                vertices
                    .into_iter()
                    .map(|v| IntervalValue::new(ti, Arc::clone(market), v)),
            );
        }

        prune_expired(&mut self.active_vertices);
    }

    /// Runs one actuation cycle for `market`.
    pub async fn actuate(&mut self, market: &MarketRef) {
        let view = AssetView {
            name: &self.name,
            tz: self.tz,
            frame: &self.frame,
            active_vertices: &self.active_vertices,
            scheduled_powers: &self.scheduled_powers,
        };
        let cycle = ActuationCycle::new(market, view);
        self.manager.actuate(&cycle).await;
    }

    /// Topics of models that consume device telemetry.
    pub fn subscriptions(&self) -> Vec<&str> {
        self.frame
            .models()
            .filter(|(_, m)| m.accepts_telemetry())
            .map(|(topic, _)| topic)
            .collect()
    }

    /// Routes telemetry published on `topic` to its model.
    ///
    /// Unknown topics and models that take no telemetry are ignored.
    ///
    /// # Errors
    ///
    /// Returns the model's error when the message lacks a required point.
    pub fn ingest(
        &mut self,
        topic: &str,
        data: &Measurements,
        now: DateTime<Utc>,
    ) -> Result<(), ModelError> {
        let local = now.with_timezone(&self.tz);
        match self.frame.get_mut(topic) {
            Some(model) if model.accepts_telemetry() => model.update_data(data, local),
            Some(_) => Ok(()),
            None => {
                debug!("{}: no model subscribed to {topic}", self.name);
                Ok(())
            }
        }
    }

    /// Stops background actuation work without releasing equipment.
    pub async fn shutdown(&mut self) {
        self.manager.shutdown().await;
    }

    fn temperatures(&self) -> Option<Vec<IntervalMeasurement>> {
        let Some(information) = &self.information else {
            warn!(
                "{}: no information service, forecasting without outdoor temperature",
                self.name
            );
            return None;
        };
        let series = information.by_name(&self.temperature_forecast);
        if series.is_none() {
            warn!(
                "{}: forecast \"{}\" is not available",
                self.name, self.temperature_forecast
            );
        }
        series
    }

    fn context(&self, ti: &TimeInterval, temperatures: Option<&[IntervalMeasurement]>) -> ModelContext {
        let ctx = ModelContext::at(ti.start.with_timezone(&self.tz))
            .with_outside_air_temperature(temperatures.and_then(|s| value_for(s, ti)));
        match self.manager.occupancy() {
            Some(om) => ctx.with_occupied(om.check_schedule(ti.start)),
            None => ctx,
        }
    }
}

/// The two bid vertices for one interval.
///
/// Power spans the curve's `[min, max]`, with `min` nudged down when the curve
/// is flat so the two powers differ. Price spans `mean ± k·std_dev`.
pub fn flexibility_vertices(curve: &[f64], stats: PriceStats, k: f64) -> [Vertex; 2] {
    let (mut min_power, max_power) = match curve.split_first() {
        Some((&first, rest)) => rest
            .iter()
            .fold((first, first), |(lo, hi), &p| (lo.min(p), hi.max(p))),
        None => (0.0, 0.0),
    };
    if min_power >= max_power {
        min_power = max_power - FLEX_EPSILON.max(max_power.abs() * 2.0 * f64::EPSILON);
    }

    let a = stats.mean - k * stats.std_dev;
    let b = stats.mean + k * stats.std_dev;
    let (min_price, max_price) = (a.min(b), a.max(b));

    [
        Vertex::new(min_price, 0.0, min_power),
        Vertex::new(max_price, 0.0, max_power),
    ]
}
