mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde_json::Value;

use transactive_asset::actuation::{ActuationConfig, ActuationStrategy, StrategyConfig};
use transactive_asset::asset::ModelFrameAsset;
use transactive_asset::market::{MarketRef, MarketSnapshot, PriceModel};
use transactive_asset::occupancy::{DaySchedule, OccupancyManager};
use transactive_asset::sim::transport::RecordingTransport;
use transactive_asset::transport::{TargetPublisher, Transport, TransportError};

use common::{SET_POINT_POINT, constant_weather, market, thermostat_asset};

fn tns() -> ActuationConfig {
    ActuationConfig {
        strategy: StrategyConfig::TnsDirectRatio {
            actuator_identity: "platform.actuator".to_string(),
            write_timeout_secs: 15,
            read_timeout_secs: 10,
        },
        ..ActuationConfig::default()
    }
}

fn ilc(topic: &str) -> ActuationConfig {
    ActuationConfig {
        strategy: StrategyConfig::Ilc {
            ilc_target_topic: topic.to_string(),
            publish_timeout_secs: 10,
        },
        ..ActuationConfig::default()
    }
}

/// Occupied 10:00-13:00 UTC every day.
fn late_morning() -> OccupancyManager {
    let window = DaySchedule::Window {
        start: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
    };
    OccupancyManager::with_week([window; 7], Tz::UTC)
}

fn strategy(config: &ActuationConfig, transport: &Arc<RecordingTransport>) -> Box<dyn ActuationStrategy> {
    config
        .build_strategy("bldg", &transport.handles(), "actuation")
        .unwrap()
}

/// Schedules, bids, clears every interval at `price` and actuates.
async fn run_market(asset: &mut ModelFrameAsset, market: &Arc<MarketSnapshot>, price: f64) {
    let m: MarketRef = market.clone();
    asset.schedule_power(&m);
    asset.update_vertices(&m);
    for ti in m.time_intervals() {
        market.clear_interval(ti.start, price);
    }
    asset.actuate(&m).await;
}

/// Schedules and bids without clearing any interval, then actuates.
async fn run_uncleared(asset: &mut ModelFrameAsset, market: &Arc<MarketSnapshot>) {
    let m: MarketRef = market.clone();
    asset.schedule_power(&m);
    asset.update_vertices(&m);
    asset.actuate(&m).await;
}

/// Bus that accepts a publish and never answers.
#[derive(Debug)]
struct SilentBus;

#[async_trait]
impl TargetPublisher for SilentBus {
    async fn publish(&self, _topic: &str, _payload: Value) -> Result<(), TransportError> {
        std::future::pending().await
    }
}

fn prices() -> PriceModel {
    PriceModel::flat(0.1, 0.02)
}

#[tokio::test]
async fn tns_writes_ratio_setpoint_then_restores_captured_value() {
    let transport = Arc::new(RecordingTransport::new());
    transport.set_point(SET_POINT_POINT, Some(23.5));
    let mut asset = thermostat_asset(
        strategy(&tns(), &transport),
        Some(late_morning()),
        constant_weather(9, 8, 30.0),
    );

    // cleared at the mean: halfway through 20..24
    run_market(&mut asset, &market("m1", 10, 3, prices()), 0.1).await;
    assert!(asset.manager().is_active());
    let writes = transport.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].point, SET_POINT_POINT);
    assert!((writes[0].value.unwrap() - 22.0).abs() < 1e-9);
    assert_eq!(writes[0].requester, "bldg");

    // cleared above the bid range: ratio clamps to 1
    run_market(&mut asset, &market("m2", 11, 3, prices()), 0.5).await;
    assert!((transport.point(SET_POINT_POINT).unwrap() - 24.0).abs() < 1e-9);

    // 13:00 is unoccupied
    run_market(&mut asset, &market("m3", 13, 3, prices()), 0.1).await;
    assert!(!asset.manager().is_active());
    assert!(!asset.manager().state().running_task);
    let last = transport.writes().pop().unwrap();
    assert_eq!(last.value, Some(23.5));
    assert_eq!(transport.point(SET_POINT_POINT), Some(23.5));

    asset.shutdown().await;
}

#[tokio::test]
async fn price_below_bid_range_writes_minimum_setpoint() {
    let transport = Arc::new(RecordingTransport::new());
    transport.set_point(SET_POINT_POINT, Some(23.5));
    let mut asset = thermostat_asset(
        strategy(&tns(), &transport),
        Some(late_morning()),
        constant_weather(9, 8, 30.0),
    );

    run_market(&mut asset, &market("m1", 10, 2, prices()), -0.5).await;
    let writes = transport.writes();
    assert_eq!(writes.len(), 1);
    assert!((writes[0].value.unwrap() - 20.0).abs() < 1e-9);
    asset.shutdown().await;
}

#[tokio::test]
async fn uncleared_market_skips_the_write_and_stays_active() {
    let transport = Arc::new(RecordingTransport::new());
    transport.set_point(SET_POINT_POINT, Some(23.5));
    let mut asset = thermostat_asset(
        strategy(&tns(), &transport),
        Some(late_morning()),
        constant_weather(9, 8, 30.0),
    );

    run_uncleared(&mut asset, &market("m1", 10, 2, prices())).await;
    assert!(asset.manager().is_active());
    assert!(transport.writes().is_empty());
    assert_eq!(transport.point(SET_POINT_POINT), Some(23.5));

    // a later cleared market still actuates
    run_market(&mut asset, &market("m2", 11, 2, prices()), 0.1).await;
    assert_eq!(transport.writes().len(), 1);
    asset.shutdown().await;
}

#[tokio::test]
async fn failed_capture_releases_to_device_default() {
    let transport = Arc::new(RecordingTransport::new());
    let mut asset = thermostat_asset(
        strategy(&tns(), &transport),
        Some(late_morning()),
        constant_weather(9, 8, 30.0),
    );

    run_market(&mut asset, &market("m1", 11, 2, prices()), 0.1).await;
    assert!(asset.manager().is_active());
    run_market(&mut asset, &market("m2", 13, 2, prices()), 0.1).await;

    let writes = transport.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[1].value, None);
}

#[tokio::test(start_paused = true)]
async fn slow_actuator_write_times_out() {
    let transport = Arc::new(RecordingTransport::new());
    transport.set_point(SET_POINT_POINT, Some(23.5));
    transport.set_write_delay(Some(Duration::from_secs(30)));
    let mut asset = thermostat_asset(
        strategy(&tns(), &transport),
        Some(late_morning()),
        constant_weather(9, 8, 30.0),
    );

    let started = tokio::time::Instant::now();
    run_market(&mut asset, &market("m1", 10, 1, prices()), 0.1).await;

    assert!(started.elapsed() >= Duration::from_secs(15));
    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(transport.writes().is_empty());
    assert_eq!(transport.point(SET_POINT_POINT), Some(23.5));
    assert!(asset.manager().is_active());
    asset.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn active_setpoints_are_reasserted_every_control_interval() {
    let transport = Arc::new(RecordingTransport::new());
    transport.set_point(SET_POINT_POINT, Some(23.5));
    let mut asset = thermostat_asset(
        strategy(&tns(), &transport),
        Some(late_morning()),
        constant_weather(9, 8, 30.0),
    );

    run_market(&mut asset, &market("m1", 10, 1, prices()), 0.1).await;
    assert!(asset.manager().state().running_task);

    tokio::time::sleep(Duration::from_secs(125)).await;
    let writes = transport.writes();
    assert_eq!(writes.len(), 3);
    assert!(writes.iter().all(|w| w.value == writes[0].value));

    asset.shutdown().await;
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(transport.writes().len(), 3);
}

#[tokio::test]
async fn disallowed_asset_never_writes() {
    let transport = Arc::new(RecordingTransport::new());
    transport.set_point(SET_POINT_POINT, Some(23.5));
    let mut asset = thermostat_asset(
        strategy(&tns(), &transport),
        Some(late_morning()),
        constant_weather(9, 8, 30.0),
    );
    asset.set_actuation_allowed(false);

    run_market(&mut asset, &market("m1", 10, 2, prices()), 0.1).await;
    assert!(!asset.manager().is_active());
    assert!(transport.writes().is_empty());
}

#[tokio::test]
async fn ilc_publishes_targets_for_every_interval_then_nulls() {
    let transport = Arc::new(RecordingTransport::new());
    let mut asset = thermostat_asset(
        strategy(&ilc("ilc/bldg/target"), &transport),
        Some(late_morning()),
        constant_weather(9, 8, 30.0),
    );

    run_market(&mut asset, &market("m1", 10, 2, prices()), 0.1).await;
    let published = transport.published_on("ilc/bldg/target");
    assert_eq!(published.len(), 2);

    let first = &published[0];
    let value = &first[0]["value"];
    assert_eq!(value["id"], "bldg_2024-06-03T10:00:00+00:00");
    assert_eq!(value["start"], "2024-06-03T10:00:00+00:00");
    assert_eq!(value["end"], "2024-06-03T11:00:00+00:00");
    let target = value["target"].as_f64().unwrap();
    assert!((target - 1.65).abs() < 1e-9, "target {target}");
    assert_eq!(first[1]["value"]["units"], "kW");
    assert_eq!(first[1]["value"]["tz"], "UTC");

    run_market(&mut asset, &market("m2", 13, 2, prices()), 0.1).await;
    let published = transport.published_on("ilc/bldg/target");
    assert_eq!(published.len(), 4);
    assert!(
        published[2..]
            .iter()
            .all(|p| p[0]["value"]["target"] == Value::Null)
    );
}

#[tokio::test]
async fn rejected_publish_does_not_stop_the_cycle() {
    let transport = Arc::new(RecordingTransport::new());
    transport.set_fail_publish(true);
    let mut asset = thermostat_asset(
        strategy(&ilc("ilc/bldg/target"), &transport),
        Some(late_morning()),
        constant_weather(9, 8, 30.0),
    );

    run_market(&mut asset, &market("m1", 10, 2, prices()), 0.1).await;
    assert!(asset.manager().is_active());
    assert!(transport.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unanswered_publish_times_out_and_the_cycle_completes() {
    let transport = Transport {
        point_io: None,
        publisher: Some(Arc::new(SilentBus)),
    };
    let config = ActuationConfig {
        strategy: StrategyConfig::Ilc {
            ilc_target_topic: "ilc/bldg/target".to_string(),
            publish_timeout_secs: 5,
        },
        ..ActuationConfig::default()
    };
    let mut asset = thermostat_asset(
        config.build_strategy("bldg", &transport, "actuation").unwrap(),
        Some(late_morning()),
        constant_weather(9, 8, 30.0),
    );

    let started = tokio::time::Instant::now();
    let m = market("m1", 10, 2, prices());
    let finished = tokio::time::timeout(Duration::from_secs(3600), run_market(&mut asset, &m, 0.1)).await;

    assert!(finished.is_ok());
    // one bounded wait per interval
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(started.elapsed() < Duration::from_secs(60));
    assert!(asset.manager().is_active());
    asset.shutdown().await;
}

#[tokio::test]
async fn asset_without_occupancy_never_actuates() {
    let transport = Arc::new(RecordingTransport::new());
    let mut asset = thermostat_asset(
        strategy(&ilc("ilc/bldg/target"), &transport),
        None,
        constant_weather(9, 8, 30.0),
    );

    run_market(&mut asset, &market("m1", 10, 2, prices()), 0.1).await;
    assert!(!asset.manager().is_active());
    assert!(transport.published().is_empty());
}
