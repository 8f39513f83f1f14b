//! Market-facing types consumed by the asset core.
//!
//! The market engine owns clearing and state transitions. The core only reads
//! a market through [`MarketView`] and keeps [`IntervalValue`] records that
//! point back at the market they were computed for.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// A delivery interval. Two intervals are the same interval when they start
/// at the same instant, regardless of duration.
#[derive(Debug, Clone, Copy)]
pub struct TimeInterval {
    /// Start of delivery (inclusive).
    pub start: DateTime<Utc>,
    /// Length of the delivery period.
    pub duration: Duration,
}

impl TimeInterval {
    /// Creates an interval starting at `start` lasting `duration`.
    pub fn new(start: DateTime<Utc>, duration: Duration) -> Self {
        Self { start, duration }
    }

    /// End of delivery (exclusive).
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration
    }
}

impl PartialEq for TimeInterval {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start
    }
}

impl Eq for TimeInterval {}

impl Hash for TimeInterval {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.start.hash(state);
    }
}

impl PartialOrd for TimeInterval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeInterval {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start.cmp(&other.start)
    }
}

/// Lifecycle state of a market as reported by the market engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketState {
    Inactive,
    Active,
    Negotiation,
    MarketLead,
    DeliveryLead,
    Delivery,
    Reconcile,
    Expired,
}

/// Price forecast statistics for one interval.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceStats {
    pub mean: f64,
    pub std_dev: f64,
}

impl PriceStats {
    pub fn new(mean: f64, std_dev: f64) -> Self {
        Self { mean, std_dev }
    }
}

/// A cleared (marginal) price for one interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalPrice {
    pub time_interval: TimeInterval,
    pub price: f64,
}

/// Read-only view of a market, implemented by the external market engine.
pub trait MarketView: fmt::Debug + Send + Sync {
    /// Unique market name. Records computed for a market are matched by name.
    fn name(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> MarketState;

    /// Instant at which the market clears.
    fn clearing_time(&self) -> DateTime<Utc>;

    /// Delay between clearing and the start of delivery.
    fn delivery_lead_time(&self) -> Duration;

    /// Length of each delivery interval.
    fn interval_duration(&self) -> Duration;

    /// Active time intervals of this market, in no particular order.
    fn time_intervals(&self) -> Vec<TimeInterval>;

    /// Cleared prices published so far.
    fn marginal_prices(&self) -> Vec<IntervalPrice>;

    /// Price forecast for the interval starting at `start`.
    fn price_model(&self, start: DateTime<Utc>) -> PriceStats;
}

/// Shared handle to a market. Records keep one so expiry can be observed later.
pub type MarketRef = Arc<dyn MarketView>;

/// The delivery window an actuation cycle acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuationWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ActuationWindow {
    /// `start = clearing + lead`, `end = start + interval duration`.
    pub fn for_market(market: &dyn MarketView) -> Self {
        let start = market.clearing_time() + market.delivery_lead_time();
        Self {
            start,
            end: start + market.interval_duration(),
        }
    }
}

/// One point on an asset's price-power flexibility curve.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vertex {
    pub marginal_price: f64,
    pub production_cost: f64,
    /// Power in kW, negative for consumption.
    pub power: f64,
}

impl Vertex {
    pub fn new(marginal_price: f64, production_cost: f64, power: f64) -> Self {
        Self {
            marginal_price,
            production_cost,
            power,
        }
    }
}

/// A value attached to one time interval of one market.
#[derive(Debug, Clone)]
pub struct IntervalValue<T> {
    pub time_interval: TimeInterval,
    pub market: MarketRef,
    pub value: T,
}

impl<T> IntervalValue<T> {
    pub fn new(time_interval: TimeInterval, market: MarketRef, value: T) -> Self {
        Self {
            time_interval,
            market,
            value,
        }
    }

    /// Returns `true` if this record was computed for `market`.
    pub fn belongs_to(&self, market: &dyn MarketView) -> bool {
        self.market.name() == market.name()
    }
}

/// Drops every record whose market has expired.
pub(crate) fn prune_expired<T>(values: &mut Vec<IntervalValue<T>>) {
    values.retain(|v| v.market.state() != MarketState::Expired);
}

/// Per-interval price forecast with a fallback for unlisted intervals.
#[derive(Debug, Clone, Default)]
pub struct PriceModel {
    fallback: PriceStats,
    by_start: BTreeMap<DateTime<Utc>, PriceStats>,
}

impl PriceModel {
    /// A model answering `(mean, std_dev)` for every interval.
    pub fn flat(mean: f64, std_dev: f64) -> Self {
        Self {
            fallback: PriceStats::new(mean, std_dev),
            by_start: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, start: DateTime<Utc>, stats: PriceStats) {
        self.by_start.insert(start, stats);
    }

    pub fn with_interval(mut self, start: DateTime<Utc>, stats: PriceStats) -> Self {
        self.insert(start, stats);
        self
    }

    pub fn at(&self, start: DateTime<Utc>) -> PriceStats {
        self.by_start.get(&start).copied().unwrap_or(self.fallback)
    }
}

/// Concrete market snapshot a host fills in as its auction progresses.
///
/// Intervals and the price model are fixed at construction; cleared prices and
/// the lifecycle state are written by the host before the core reads them.
#[derive(Debug)]
pub struct MarketSnapshot {
    name: String,
    clearing_time: DateTime<Utc>,
    delivery_lead_time: Duration,
    interval_duration: Duration,
    intervals: Vec<TimeInterval>,
    price_model: PriceModel,
    cleared: RwLock<Vec<IntervalPrice>>,
    state: RwLock<MarketState>,
}

impl MarketSnapshot {
    /// Creates an active market with `interval_count` consecutive intervals,
    /// the first starting at `clearing_time + delivery_lead_time`.
    pub fn new(
        name: impl Into<String>,
        clearing_time: DateTime<Utc>,
        delivery_lead_time: Duration,
        interval_duration: Duration,
        interval_count: usize,
        price_model: PriceModel,
    ) -> Self {
        let first = clearing_time + delivery_lead_time;
        let intervals = (0..interval_count)
            .map(|i| TimeInterval::new(first + interval_duration * i as i32, interval_duration))
            .collect();
        Self {
            name: name.into(),
            clearing_time,
            delivery_lead_time,
            interval_duration,
            intervals,
            price_model,
            cleared: RwLock::new(Vec::new()),
            state: RwLock::new(MarketState::Active),
        }
    }

    /// Records (or overwrites) the cleared price of the interval starting at `start`.
    pub fn clear_interval(&self, start: DateTime<Utc>, price: f64) {
        let mut cleared = self.cleared.write();
        cleared.retain(|p| p.time_interval.start != start);
        cleared.push(IntervalPrice {
            time_interval: TimeInterval::new(start, self.interval_duration),
            price,
        });
    }

    pub fn set_state(&self, state: MarketState) {
        *self.state.write() = state;
    }

    pub fn into_ref(self) -> MarketRef {
        Arc::new(self)
    }
}

impl MarketView for MarketSnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> MarketState {
        *self.state.read()
    }

    fn clearing_time(&self) -> DateTime<Utc> {
        self.clearing_time
    }

    fn delivery_lead_time(&self) -> Duration {
        self.delivery_lead_time
    }

    fn interval_duration(&self) -> Duration {
        self.interval_duration
    }

    fn time_intervals(&self) -> Vec<TimeInterval> {
        self.intervals.clone()
    }

    fn marginal_prices(&self) -> Vec<IntervalPrice> {
        self.cleared.read().clone()
    }

    fn price_model(&self, start: DateTime<Utc>) -> PriceStats {
        self.price_model.at(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, hour, 0, 0).unwrap()
    }

    fn snapshot(name: &str) -> MarketSnapshot {
        MarketSnapshot::new(
            name,
            t(9),
            Duration::minutes(15),
            Duration::hours(1),
            3,
            PriceModel::flat(0.05, 0.01),
        )
    }

    #[test]
    fn interval_identity_is_start_only() {
        let a = TimeInterval::new(t(10), Duration::hours(1));
        let b = TimeInterval::new(t(10), Duration::minutes(5));
        assert_eq!(a, b);
        assert!(TimeInterval::new(t(11), Duration::hours(1)) > a);
    }

    #[test]
    fn snapshot_lays_out_consecutive_intervals() {
        let m = snapshot("m");
        let starts: Vec<_> = m.time_intervals().iter().map(|ti| ti.start).collect();
        let first = t(9) + Duration::minutes(15);
        assert_eq!(
            starts,
            vec![first, first + Duration::hours(1), first + Duration::hours(2)]
        );
    }

    #[test]
    fn actuation_window_spans_first_interval() {
        let m = snapshot("m");
        let w = ActuationWindow::for_market(&m);
        assert_eq!(w.start, t(9) + Duration::minutes(15));
        assert_eq!(w.end, t(10) + Duration::minutes(15));
    }

    #[test]
    fn clearing_overwrites_same_interval() {
        let m = snapshot("m");
        m.clear_interval(t(10), 0.04);
        m.clear_interval(t(10), 0.06);
        let prices = m.marginal_prices();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].price, 0.06);
    }

    #[test]
    fn price_model_falls_back_to_flat_stats() {
        let model = PriceModel::flat(0.05, 0.01).with_interval(t(12), PriceStats::new(0.2, 0.05));
        assert_eq!(model.at(t(12)), PriceStats::new(0.2, 0.05));
        assert_eq!(model.at(t(13)), PriceStats::new(0.05, 0.01));
    }

    #[test]
    fn prune_keeps_records_of_live_markets() {
        let live = snapshot("live").into_ref();
        let old = Arc::new(snapshot("old"));
        let ti = TimeInterval::new(t(10), Duration::hours(1));
        let mut values = vec![
            IntervalValue::new(ti, live.clone(), 1.0),
            IntervalValue::new(ti, old.clone() as MarketRef, 2.0),
        ];

        prune_expired(&mut values);
        assert_eq!(values.len(), 2);

        old.set_state(MarketState::Expired);
        prune_expired(&mut values);
        prune_expired(&mut values);
        assert_eq!(values.len(), 1);
        assert!(values[0].belongs_to(live.as_ref()));
    }
}
