//! Harness configuration and per-interval result records.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::config::{ConfigError, SimulationConfig};

/// Timing of the market replay.
///
/// # Examples
///
/// ```
/// use transactive_asset::config::SimulationConfig;
/// use transactive_asset::sim::types::SimConfig;
///
/// let cfg = SimConfig::from_config(&SimulationConfig::default()).unwrap();
/// assert_eq!(cfg.intervals, 24);
/// assert_eq!(cfg.horizon(), 26);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Start of the first delivery interval.
    pub start: DateTime<Utc>,
    pub interval: Duration,
    pub delivery_lead: Duration,
    /// Number of markets replayed.
    pub intervals: usize,
    /// Intervals covered by each market.
    pub market_intervals: usize,
    /// Master random seed for reproducibility.
    pub seed: u64,
}

impl SimConfig {
    /// Converts the TOML section into runtime timing.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an unparseable start or zero counts.
    pub fn from_config(cfg: &SimulationConfig) -> Result<Self, ConfigError> {
        if cfg.intervals == 0 || cfg.market_intervals == 0 || cfg.interval_minutes == 0 {
            return Err(ConfigError::new(
                "simulation",
                "intervals, market_intervals and interval_minutes must be > 0",
            ));
        }
        Ok(Self {
            start: cfg.start_time()?,
            interval: Duration::minutes(i64::from(cfg.interval_minutes)),
            delivery_lead: Duration::minutes(i64::from(cfg.delivery_lead_minutes)),
            intervals: cfg.intervals,
            market_intervals: cfg.market_intervals,
            seed: cfg.seed,
        })
    }

    /// Number of distinct delivery intervals any market touches.
    pub fn horizon(&self) -> usize {
        self.intervals + self.market_intervals - 1
    }
}

/// Outcome of one market for one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// Market index.
    pub step: usize,
    /// Start of the delivered interval, local time.
    pub interval_start: DateTime<Tz>,
    pub asset: String,
    /// Forecast outdoor air temperature (°C).
    pub outdoor_temp_c: Option<f64>,
    /// Cleared price of the delivered interval ($/kWh).
    pub cleared_price: f64,
    /// Scheduled average power (kW, negative for consumption).
    pub scheduled_kw: f64,
    /// Lowest power of the bid (kW).
    pub flex_min_kw: f64,
    /// Highest power of the bid (kW).
    pub flex_max_kw: f64,
    pub bid_min_price: f64,
    pub bid_max_price: f64,
    /// Whether the asset was actuating after this market.
    pub actuation_active: bool,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let oat = self
            .outdoor_temp_c
            .map_or_else(|| "  n/a".to_string(), |t| format!("{t:>5.1}"));
        write!(
            f,
            "m={:>3} {} {:<10} | OAT={} C  price={:.4} | sched={:>7.2} kW  \
             flex=[{:>7.2}, {:>7.2}] kW @ [{:.4}, {:.4}] | act={}",
            self.step,
            self.interval_start.format("%a %H:%M"),
            self.asset,
            oat,
            self.cleared_price,
            self.scheduled_kw,
            self.flex_min_kw,
            self.flex_max_kw,
            self.bid_min_price,
            self.bid_max_price,
            self.actuation_active,
        )
    }
}
