//! Synthetic weather and price series for the demo harness.

use std::f64::consts::PI;

use chrono::Timelike;
use chrono_tz::Tz;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::information::IntervalMeasurement;
use crate::market::{PriceModel, PriceStats, TimeInterval};

/// Seed offset for the price RNG to avoid correlation with the weather.
const PRICE_SEED_OFFSET: u64 = 1_009;

/// Generates Gaussian noise using the Box-Muller transform.
///
/// # Arguments
///
/// * `rng` - Random number generator
/// * `std_dev` - Standard deviation of the distribution
///
/// # Returns
///
/// A sample from N(0, std_dev²), or `0.0` when `std_dev <= 0`.
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }

    let u1: f64 = rng.random::<f64>().clamp(1e-12, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    z0 * std_dev
}

/// A daily sinusoid peaking at `peak_hour` local time, plus seeded noise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiurnalProfile {
    pub mean: f64,
    /// Half of the peak-to-trough swing.
    pub amplitude: f64,
    /// Local hour of the daily maximum.
    pub peak_hour: f64,
    pub noise_std: f64,
}

impl DiurnalProfile {
    /// Noise-free value at a fractional local hour.
    pub fn at_hour(&self, hour: f64) -> f64 {
        self.mean + self.amplitude * (2.0 * PI * (hour - self.peak_hour) / 24.0).cos()
    }

    /// One noisy sample per interval, evaluated at each interval's local start.
    pub fn sample(&self, intervals: &[TimeInterval], tz: Tz, rng: &mut StdRng) -> Vec<f64> {
        intervals
            .iter()
            .map(|ti| {
                let local = ti.start.with_timezone(&tz);
                let hour = f64::from(local.hour()) + f64::from(local.minute()) / 60.0;
                self.at_hour(hour) + gaussian_noise(rng, self.noise_std)
            })
            .collect()
    }
}

/// Outdoor-air-temperature forecast for every interval.
pub fn temperature_forecast(
    intervals: &[TimeInterval],
    tz: Tz,
    profile: DiurnalProfile,
    seed: u64,
) -> Vec<IntervalMeasurement> {
    let mut rng = StdRng::seed_from_u64(seed);
    intervals
        .iter()
        .zip(profile.sample(intervals, tz, &mut rng))
        .map(|(ti, value)| IntervalMeasurement {
            time_interval: *ti,
            value,
        })
        .collect()
}

/// Forecast price statistics and the prices that will actually clear.
#[derive(Debug, Clone)]
pub struct PriceScenario {
    pub model: PriceModel,
    /// Cleared price per interval, in the order given.
    pub cleared: Vec<f64>,
}

/// Builds a price model whose mean follows `profile` without noise, and
/// cleared prices drawn around that mean with `profile.noise_std`.
pub fn price_scenario(
    intervals: &[TimeInterval],
    tz: Tz,
    profile: DiurnalProfile,
    std_dev: f64,
    seed: u64,
) -> PriceScenario {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(PRICE_SEED_OFFSET));
    let means = DiurnalProfile {
        noise_std: 0.0,
        ..profile
    }
    .sample(intervals, tz, &mut rng);

    let mut model = PriceModel::flat(profile.mean, std_dev);
    let mut cleared = Vec::with_capacity(intervals.len());
    for (ti, mean) in intervals.iter().zip(means) {
        model.insert(ti.start, PriceStats::new(mean, std_dev));
        cleared.push((mean + gaussian_noise(&mut rng, profile.noise_std)).max(0.0));
    }
    PriceScenario { model, cleared }
}
