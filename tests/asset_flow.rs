mod common;

use std::sync::Arc;

use chrono::Duration;

use transactive_asset::market::{MarketRef, MarketState, PriceModel, PriceStats, TimeInterval};

use common::{
    THERMOSTAT_TOPIC, constant_weather, market, passive_asset, telemetry, thermostat_power, utc,
};

#[test]
fn thermostat_power_follows_forecast_and_telemetry() {
    let mut asset = passive_asset(constant_weather(10, 6, 30.0));
    asset
        .ingest(THERMOSTAT_TOPIC, &telemetry(28.0, 22.0, 23.0), utc(9))
        .unwrap();

    let m: MarketRef = market("m1", 10, 3, PriceModel::flat(0.1, 0.02));
    asset.schedule_power(&m);

    assert!(asset.schedule_calculated());
    assert_eq!(asset.scheduled_powers().len(), 3);
    // forecast OAT wins over the telemetry value
    let expected = thermostat_power(22.0, 23.0, 30.0);
    assert!((expected + 1.65).abs() < 1e-9);
    for sp in asset.scheduled_powers() {
        assert!((sp.value - expected).abs() < 1e-9, "got {}", sp.value);
        assert!(sp.belongs_to(m.as_ref()));
    }
}

#[test]
fn vertices_span_setpoint_range_and_price_band() {
    let mut asset = passive_asset(constant_weather(10, 6, 30.0)).with_price_multiplier(2.0);
    asset
        .ingest(THERMOSTAT_TOPIC, &telemetry(30.0, 22.0, 23.0), utc(9))
        .unwrap();

    let m: MarketRef = market(
        "m1",
        10,
        2,
        PriceModel::flat(0.1, 0.02).with_interval(utc(11), PriceStats::new(0.2, 0.05)),
    );
    asset.update_vertices(&m);
    assert_eq!(asset.active_vertices().len(), 4);

    let first = asset.vertices(&TimeInterval::new(utc(10), Duration::hours(1)));
    assert_eq!(first.len(), 2);
    assert!((first[0].power - thermostat_power(20.0, 23.0, 30.0)).abs() < 1e-9);
    assert!((first[1].power - thermostat_power(24.0, 23.0, 30.0)).abs() < 1e-9);
    assert!((first[0].marginal_price - 0.06).abs() < 1e-12);
    assert!((first[1].marginal_price - 0.14).abs() < 1e-12);

    let second = asset.vertices(&TimeInterval::new(utc(11), Duration::hours(1)));
    assert!((second[0].marginal_price - 0.1).abs() < 1e-12);
    assert!((second[1].marginal_price - 0.3).abs() < 1e-12);
}

#[test]
fn later_market_takes_over_overlapping_intervals() {
    let mut asset = passive_asset(constant_weather(10, 6, 30.0));
    let first = market("m1", 10, 3, PriceModel::flat(0.1, 0.02));
    let second = market("m2", 11, 3, PriceModel::flat(0.1, 0.02));
    let first_ref: MarketRef = first.clone();
    let second_ref: MarketRef = second.clone();

    asset.schedule_power(&first_ref);
    asset.update_vertices(&first_ref);
    asset.schedule_power(&second_ref);
    asset.update_vertices(&second_ref);

    // 10:00 from m1, 11:00 and 12:00 replaced by m2, 13:00 new
    assert_eq!(asset.scheduled_powers().len(), 4);
    let owners: Vec<&str> = asset
        .scheduled_powers()
        .iter()
        .map(|sp| sp.market.name())
        .collect();
    assert_eq!(owners.iter().filter(|n| **n == "m2").count(), 3);
    assert_eq!(asset.active_vertices().len(), 8);

    first.set_state(MarketState::Expired);
    let third: MarketRef = market("m3", 12, 3, PriceModel::flat(0.1, 0.02));
    asset.schedule_power(&third);
    asset.update_vertices(&third);

    assert!(
        asset
            .scheduled_powers()
            .iter()
            .all(|sp| sp.market.state() != MarketState::Expired)
    );
    assert!(
        asset
            .scheduled_power(&TimeInterval::new(utc(10), Duration::hours(1)))
            .is_none()
    );
    assert_eq!(asset.scheduled_powers().len(), 4);
    assert_eq!(asset.active_vertices().len(), 8);
}

#[test]
fn missing_forecast_falls_back_to_stored_temperature() {
    // weather board covers none of the market's intervals
    let mut asset = passive_asset(constant_weather(0, 2, 40.0));
    asset
        .ingest(THERMOSTAT_TOPIC, &telemetry(25.0, 22.0, 23.0), utc(9))
        .unwrap();

    let m: MarketRef = market("m1", 10, 1, PriceModel::flat(0.1, 0.02));
    asset.schedule_power(&m);
    let p = asset
        .scheduled_power(&TimeInterval::new(utc(10), Duration::hours(1)))
        .unwrap();
    assert!((p - thermostat_power(22.0, 23.0, 25.0)).abs() < 1e-9);
}

#[test]
fn incomplete_telemetry_is_rejected_and_unknown_topics_ignored() {
    let mut asset = passive_asset(Arc::new(Default::default()));
    let mut partial = telemetry(30.0, 22.0, 23.0);
    partial.remove("ZoneTemperature");
    assert!(asset.ingest(THERMOSTAT_TOPIC, &partial, utc(9)).is_err());
    assert!(asset.ingest("devices/other", &partial, utc(9)).is_ok());
    assert_eq!(asset.subscriptions(), vec![THERMOSTAT_TOPIC]);
}
