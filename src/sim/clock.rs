use chrono::{DateTime, Duration, Utc};

use crate::market::TimeInterval;

use super::types::SimConfig;

/// One market event: the interval it delivers first and when it clears.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketTick {
    /// Zero-based market index.
    pub index: usize,
    pub clearing_time: DateTime<Utc>,
    /// First delivery interval of the market.
    pub interval: TimeInterval,
}

/// A clock that steps through consecutive market clearings.
///
/// Market `i` delivers the interval starting at `start + i·interval` and
/// clears `delivery_lead` before that.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use transactive_asset::sim::clock::MarketClock;
///
/// let start = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
/// let mut clock = MarketClock::new(start, Duration::hours(1), Duration::minutes(10), 2);
///
/// let first = clock.tick().unwrap();
/// assert_eq!(first.clearing_time, start - Duration::minutes(10));
/// assert!(clock.tick().is_some());
/// assert!(clock.tick().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct MarketClock {
    start: DateTime<Utc>,
    interval: Duration,
    delivery_lead: Duration,
    current: usize,
    total: usize,
}

impl MarketClock {
    /// Creates a clock producing `total` market ticks.
    pub fn new(start: DateTime<Utc>, interval: Duration, delivery_lead: Duration, total: usize) -> Self {
        Self {
            start,
            interval,
            delivery_lead,
            current: 0,
            total,
        }
    }

    pub fn from_config(config: &SimConfig) -> Self {
        Self::new(
            config.start,
            config.interval,
            config.delivery_lead,
            config.intervals,
        )
    }

    /// Advances to the next market.
    ///
    /// # Returns
    ///
    /// * `Some(tick)` - The market event before advancing
    /// * `None` - If every market has been produced
    pub fn tick(&mut self) -> Option<MarketTick> {
        if self.current >= self.total {
            return None;
        }
        let index = self.current;
        self.current += 1;
        let start = self.start + self.interval * index as i32;
        Some(MarketTick {
            index,
            clearing_time: start - self.delivery_lead,
            interval: TimeInterval::new(start, self.interval),
        })
    }

    pub fn remaining(&self) -> usize {
        self.total - self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 7, 0, 0).unwrap()
    }

    #[test]
    fn ticks_are_consecutive_intervals() {
        let mut clock = MarketClock::new(start(), Duration::minutes(15), Duration::minutes(5), 3);
        let ticks: Vec<_> = std::iter::from_fn(|| clock.tick()).collect();
        assert_eq!(ticks.len(), 3);
        assert_eq!(ticks[2].index, 2);
        assert_eq!(ticks[2].interval.start, start() + Duration::minutes(30));
        assert_eq!(ticks[2].clearing_time, start() + Duration::minutes(25));
    }

    #[test]
    fn empty_clock() {
        let mut clock = MarketClock::new(start(), Duration::hours(1), Duration::zero(), 0);
        assert_eq!(clock.remaining(), 0);
        assert!(clock.tick().is_none());
    }
}
