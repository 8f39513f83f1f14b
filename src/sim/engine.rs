//! Market replay that drives every asset through schedule, bid, clear and actuate.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::DateTime;
use chrono_tz::Tz;
use rand::{SeedableRng, rngs::StdRng};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::asset::ModelFrameAsset;
use crate::config::{ConfigError, NodeConfig};
use crate::devices::Measurements;
use crate::devices::thermostat::{COOLING_SET_POINT, OUTDOOR_AIR_TEMPERATURE, ZONE_TEMPERATURE};
use crate::forecast::{DiurnalProfile, PriceScenario, gaussian_noise, price_scenario, temperature_forecast};
use crate::information::{InformationBoard, InformationLookup, IntervalMeasurement, value_for};
use crate::market::{MarketRef, MarketSnapshot, MarketState, MarketView, TimeInterval};
use crate::transport::TargetPublisher;

use super::clock::{MarketClock, MarketTick};
use super::transport::RecordingTransport;
use super::types::{SimConfig, StepResult};

/// Local hour of the daily temperature maximum.
const OAT_PEAK_HOUR: f64 = 15.0;
/// Local hour of the daily price maximum.
const PRICE_PEAK_HOUR: f64 = 17.0;
/// Zone temperature sits this far above the active setpoint (°C).
const ZONE_OFFSET: f64 = 0.4;
const ZONE_NOISE_STD: f64 = 0.2;
/// Seed offset for telemetry noise.
const TELEMETRY_SEED_OFFSET: u64 = 2_003;

/// Replays one market per interval against the configured assets.
///
/// Each market covers `market_intervals` consecutive intervals, so later
/// markets re-schedule intervals an earlier market already covered. Markets
/// expire once none of their intervals is still ahead.
#[derive(Debug)]
pub struct Engine {
    config: SimConfig,
    node: String,
    record_topic: String,
    tz: Tz,
    clock: MarketClock,
    assets: Vec<ModelFrameAsset>,
    transport: Arc<RecordingTransport>,
    weather: Vec<IntervalMeasurement>,
    prices: PriceScenario,
    live_markets: Vec<(usize, Arc<MarketSnapshot>)>,
    rng: StdRng,
}

impl Engine {
    /// Builds the forecasts, the assets and the in-memory transport.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if timing or any asset is invalid.
    pub fn from_config(cfg: &NodeConfig) -> Result<Self, ConfigError> {
        Self::with_transport(cfg, Arc::new(RecordingTransport::new()))
    }

    /// Like [`from_config`](Self::from_config) with a caller-owned transport.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if timing or any asset is invalid.
    pub fn with_transport(
        cfg: &NodeConfig,
        transport: Arc<RecordingTransport>,
    ) -> Result<Self, ConfigError> {
        let config = SimConfig::from_config(&cfg.simulation)?;
        let tz = cfg.timezone()?;
        let s = &cfg.simulation;

        let horizon: Vec<TimeInterval> = (0..config.horizon())
            .map(|i| TimeInterval::new(config.start + config.interval * i as i32, config.interval))
            .collect();

        let weather = temperature_forecast(
            &horizon,
            tz,
            DiurnalProfile {
                mean: s.oat_mean,
                amplitude: s.oat_amplitude,
                peak_hour: OAT_PEAK_HOUR,
                noise_std: s.oat_noise_std,
            },
            config.seed,
        );
        let prices = price_scenario(
            &horizon,
            tz,
            DiurnalProfile {
                mean: s.price_mean,
                amplitude: s.price_amplitude,
                peak_hour: PRICE_PEAK_HOUR,
                noise_std: s.price_noise_std,
            },
            s.price_std_dev,
            config.seed,
        );

        let mut board = InformationBoard::new();
        for asset in &cfg.assets {
            board.set_series(asset.temperature_forecast.clone(), weather.clone());
        }
        let information: Arc<dyn InformationLookup> = Arc::new(board);

        let assets = cfg.build_assets(&transport.handles(), Some(information))?;
        for asset in &assets {
            seed_points(asset, &transport, config.start.with_timezone(&tz));
        }

        info!(
            "replaying {} markets of {} intervals for {} assets",
            config.intervals,
            config.market_intervals,
            assets.len()
        );

        Ok(Self {
            clock: MarketClock::from_config(&config),
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(TELEMETRY_SEED_OFFSET)),
            config,
            node: cfg.node.name.clone(),
            record_topic: cfg.node.record_topic.clone(),
            tz,
            assets,
            transport,
            weather,
            prices,
            live_markets: Vec::new(),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn assets(&self) -> &[ModelFrameAsset] {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut [ModelFrameAsset] {
        &mut self.assets
    }

    pub fn transport(&self) -> &Arc<RecordingTransport> {
        &self.transport
    }

    pub fn record_topic(&self) -> &str {
        &self.record_topic
    }

    /// Runs the next market. Returns `None` once every market has run.
    pub async fn step(&mut self) -> Option<Vec<StepResult>> {
        let tick = self.clock.tick()?;
        Some(self.run_market(tick).await)
    }

    /// Runs every remaining market, then stops background actuation.
    pub async fn run(&mut self) -> Vec<StepResult> {
        let mut results = Vec::with_capacity(self.clock.remaining() * self.assets.len());
        while let Some(step) = self.step().await {
            results.extend(step);
        }
        self.shutdown().await;
        results
    }

    /// Stops every asset's background re-assertion.
    ///
    /// Assets are not released: equipment keeps its last command until a
    /// later unoccupied cycle releases it.
    pub async fn shutdown(&mut self) {
        for asset in &mut self.assets {
            asset.shutdown().await;
        }
    }

    async fn run_market(&mut self, tick: MarketTick) -> Vec<StepResult> {
        let i = tick.index;
        self.expire_markets(i);
        self.feed_telemetry(&tick);

        let snapshot = Arc::new(MarketSnapshot::new(
            format!("{}-market-{i:03}", self.node),
            tick.clearing_time,
            self.config.delivery_lead,
            self.config.interval,
            self.config.market_intervals,
            self.prices.model.clone(),
        ));
        let market: MarketRef = snapshot.clone();

        for asset in &mut self.assets {
            asset.schedule_power(&market);
            asset.update_vertices(&market);
        }

        for (k, ti) in market.time_intervals().iter().enumerate() {
            if let Some(&price) = self.prices.cleared.get(i + k) {
                snapshot.clear_interval(ti.start, price);
            }
        }

        for asset in &mut self.assets {
            asset.actuate(&market).await;
        }

        self.publish_record(market.as_ref()).await;
        self.live_markets.push((i, snapshot));

        let cleared_price = self.prices.cleared.get(i).copied().unwrap_or_default();
        let outdoor_temp_c = value_for(&self.weather, &tick.interval);
        let tz = self.tz;
        self.assets
            .iter()
            .map(|asset| {
                let (flex_min, flex_max) = match asset.vertices(&tick.interval).as_slice() {
                    [lo, hi] => (*lo, *hi),
                    _ => Default::default(),
                };
                StepResult {
                    step: i,
                    interval_start: tick.interval.start.with_timezone(&tz),
                    asset: asset.name().to_string(),
                    outdoor_temp_c,
                    cleared_price,
                    scheduled_kw: asset.scheduled_power(&tick.interval).unwrap_or_default(),
                    flex_min_kw: flex_min.power,
                    flex_max_kw: flex_max.power,
                    bid_min_price: flex_min.marginal_price,
                    bid_max_price: flex_max.marginal_price,
                    actuation_active: asset.manager().is_active(),
                }
            })
            .collect()
    }

    /// Expires markets whose last interval lies before market `index`.
    fn expire_markets(&mut self, index: usize) {
        let n = self.config.market_intervals;
        self.live_markets.retain(|(j, market)| {
            if j + n <= index {
                market.set_state(MarketState::Expired);
                debug!("{} expired", market.name());
                false
            } else {
                true
            }
        });
    }

    /// Publishes the latest device readings to every subscribed model.
    fn feed_telemetry(&mut self, tick: &MarketTick) {
        let oat = value_for(&self.weather, &tick.interval);
        let local = tick.clearing_time.with_timezone(&self.tz);

        for asset in &mut self.assets {
            let messages: Vec<(String, Measurements)> = asset
                .frame()
                .models()
                .filter(|(_, model)| model.accepts_telemetry())
                .map(|(topic, model)| {
                    let set_point = model
                        .actuation_target()
                        .and_then(|point| self.transport.point(point))
                        .or_else(|| model.set_point_range(local).map(|(lo, hi)| (lo + hi) / 2.0))
                        .unwrap_or_default();
                    let mut data = Measurements::new();
                    if let Some(oat) = oat {
                        data.insert(OUTDOOR_AIR_TEMPERATURE.to_string(), oat);
                    }
                    data.insert(COOLING_SET_POINT.to_string(), set_point);
                    data.insert(
                        ZONE_TEMPERATURE.to_string(),
                        set_point + ZONE_OFFSET + gaussian_noise(&mut self.rng, ZONE_NOISE_STD),
                    );
                    (topic.to_string(), data)
                })
                .collect();

            for (topic, data) in messages {
                if let Err(e) = asset.ingest(&topic, &data, tick.clearing_time) {
                    warn!("{}: telemetry on {topic} rejected: {e}", asset.name());
                }
            }
        }
    }

    async fn publish_record(&self, market: &dyn MarketView) {
        let record = delivery_record(market, &self.assets);
        if let Err(e) = self.transport.publish(&self.record_topic, record).await {
            warn!("delivery record for {} not published: {e}", market.name());
        }
    }
}

/// `{market, balanced_prices, scheduled_powers}` for one cleared market.
pub fn delivery_record(market: &dyn MarketView, assets: &[ModelFrameAsset]) -> Value {
    let mut prices = market.marginal_prices();
    prices.sort_by_key(|p| p.time_interval);
    let balanced_prices: Vec<Value> = prices
        .iter()
        .map(|p| json!({ "start": p.time_interval.start.to_rfc3339(), "price": p.price }))
        .collect();

    let scheduled_powers: BTreeMap<&str, Vec<Value>> = assets
        .iter()
        .map(|asset| {
            let powers = asset
                .scheduled_powers()
                .iter()
                .filter(|sp| sp.belongs_to(market))
                .map(|sp| json!({ "start": sp.time_interval.start.to_rfc3339(), "power": sp.value }))
                .collect();
            (asset.name(), powers)
        })
        .collect();

    json!({
        "market": market.name(),
        "balanced_prices": balanced_prices,
        "scheduled_powers": scheduled_powers,
    })
}

/// Gives every actuatable point a starting value so captures succeed.
fn seed_points(asset: &ModelFrameAsset, transport: &RecordingTransport, at: DateTime<Tz>) {
    for (_, model) in asset.frame().models() {
        if let (Some(point), Some((lo, hi))) = (model.actuation_target(), model.set_point_range(at)) {
            transport.set_point(point, Some((lo + hi) / 2.0));
        }
    }
}
