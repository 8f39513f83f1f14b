//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;

use transactive_asset::actuation::{ActuationConfig, ActuationManager, ActuationStrategy, Passive};
use transactive_asset::asset::ModelFrameAsset;
use transactive_asset::devices::thermostat::{
    COOLING_SET_POINT, OUTDOOR_AIR_TEMPERATURE, ZONE_TEMPERATURE,
};
use transactive_asset::devices::{Measurements, Thermostat, ThermostatConfig};
use transactive_asset::frame::ModelFrame;
use transactive_asset::information::InformationBoard;
use transactive_asset::market::{MarketSnapshot, PriceModel, TimeInterval};
use transactive_asset::occupancy::OccupancyManager;

pub const THERMOSTAT_TOPIC: &str = "devices/bldg/rtu1";
pub const SET_POINT_POINT: &str = "bldg/rtu1/ZoneCoolingTemperatureSetPoint";
pub const OAT_SERIES: &str = "OutdoorAirTemperature";

/// Monday 2024-06-03 at `hour`:00 UTC.
pub fn utc(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, hour, 0, 0).unwrap()
}

/// Thermostat with flat hourly coefficients, 3 kW rated, 22 ± 2 °C.
///
/// Duty = -0.1·sp + 0.05·zone + 0.02·oat + 1.0.
pub fn thermostat_config() -> ThermostatConfig {
    ThermostatConfig {
        c1: vec![-0.1; 24],
        c2: vec![0.05; 24],
        c3: vec![0.02; 24],
        c4: vec![1.0; 24],
        rated_power: 3.0,
        nominal_set_point: 22.0,
        max_set_point_offset: 2.0,
        oat: 20.0,
        csp: 22.0,
        room_temp: 23.0,
        actuation_topic: Some(SET_POINT_POINT.to_string()),
    }
}

/// Expected thermostat power for the coefficients of [`thermostat_config`].
pub fn thermostat_power(set_point: f64, zone: f64, oat: f64) -> f64 {
    -(-0.1 * set_point + 0.05 * zone + 0.02 * oat + 1.0).clamp(0.0, 1.0) * 3.0
}

/// Telemetry message as published by the thermostat.
pub fn telemetry(oat: f64, set_point: f64, zone: f64) -> Measurements {
    Measurements::from([
        (OUTDOOR_AIR_TEMPERATURE.to_string(), oat),
        (COOLING_SET_POINT.to_string(), set_point),
        (ZONE_TEMPERATURE.to_string(), zone),
    ])
}

/// Market clearing 15 minutes before `first_hour`, with `n` hourly intervals.
pub fn market(name: &str, first_hour: u32, n: usize, prices: PriceModel) -> Arc<MarketSnapshot> {
    Arc::new(MarketSnapshot::new(
        name,
        utc(first_hour) - Duration::minutes(15),
        Duration::minutes(15),
        Duration::hours(1),
        n,
        prices,
    ))
}

/// Forecast board holding a constant outdoor temperature for `hours` hours from `first_hour`.
pub fn constant_weather(first_hour: u32, hours: u32, oat: f64) -> Arc<InformationBoard> {
    let mut board = InformationBoard::new();
    for h in first_hour..first_hour + hours {
        board.record(OAT_SERIES, TimeInterval::new(utc(h), Duration::hours(1)), oat);
    }
    Arc::new(board)
}

/// Single-thermostat asset with a two-point curve, occupied around the clock.
pub fn thermostat_asset(
    strategy: Box<dyn ActuationStrategy>,
    occupancy: Option<OccupancyManager>,
    weather: Arc<InformationBoard>,
) -> ModelFrameAsset {
    let mut frame = ModelFrame::new(2).unwrap();
    frame.insert(
        THERMOSTAT_TOPIC,
        Box::new(Thermostat::from_config(&thermostat_config(), 2, "thermostat").unwrap()),
    );
    let manager = ActuationManager::new(
        "bldg",
        &ActuationConfig::default(),
        occupancy.map(Arc::new),
        strategy,
    );
    ModelFrameAsset::new("bldg", Tz::UTC, frame, manager).with_information(OAT_SERIES, weather)
}

pub fn passive_asset(weather: Arc<InformationBoard>) -> ModelFrameAsset {
    thermostat_asset(
        Box::new(Passive),
        Some(OccupancyManager::always_occupied(Tz::UTC)),
        weather,
    )
}
