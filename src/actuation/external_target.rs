//! Strategies that hand the asset's scheduled power to an external controller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::actuation::{ActuationCycle, ActuationStrategy};
use crate::market::TimeInterval;
use crate::transport::{TargetPublisher, bounded};

/// Destination for per-interval power targets.
#[async_trait]
pub trait TargetSink: fmt::Debug + Send + Sync {
    /// Sets the asset's power target for `interval`. `None` clears it.
    async fn set_target(&self, asset: &str, tz: Tz, target: Option<f64>, interval: &TimeInterval);

    /// Withdraws the target for `interval`. Does nothing unless overridden.
    async fn release_target(&self, _asset: &str, _tz: Tz, _interval: &TimeInterval) {}
}

/// Sink that only logs targets.
#[derive(Debug, Default)]
pub struct LogTargets;

#[async_trait]
impl TargetSink for LogTargets {
    async fn set_target(&self, asset: &str, _tz: Tz, target: Option<f64>, interval: &TimeInterval) {
        debug!("{asset}: target {target:?} kW for {}", interval.start);
    }
}

/// Sink publishing targets for an integrated load-control coordinator.
///
/// Targets are published sign-inverted (positive means consumption) with an
/// id of `"{asset}_{start}"`, unit `kW` and the node timezone. Every publish
/// is abandoned after the publish timeout.
#[derive(Debug)]
pub struct IlcTargetSink {
    publisher: Arc<dyn TargetPublisher>,
    topic: String,
    publish_timeout: Duration,
}

impl IlcTargetSink {
    pub fn new(publisher: Arc<dyn TargetPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            publish_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_publish_timeout(mut self, limit: Duration) -> Self {
        self.publish_timeout = limit;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Builds the load-control target message for one interval.
pub fn ilc_payload(asset: &str, tz: Tz, target: Option<f64>, interval: &TimeInterval) -> Value {
    let start = interval.start.with_timezone(&tz).to_rfc3339();
    let end = interval.end().with_timezone(&tz).to_rfc3339();
    json!([
        {
            "value": {
                "id": format!("{asset}_{start}"),
                "target": target.map(|t| -t),
                "start": start,
                "end": end,
            }
        },
        {
            "value": {
                "units": "kW",
                "tz": tz.name(),
            }
        }
    ])
}

#[async_trait]
impl TargetSink for IlcTargetSink {
    async fn set_target(&self, asset: &str, tz: Tz, target: Option<f64>, interval: &TimeInterval) {
        let payload = ilc_payload(asset, tz, target, interval);
        let publish = self.publisher.publish(&self.topic, payload);
        if let Err(e) = bounded(self.publish_timeout, publish).await {
            warn!("{asset}: error publishing target to {}: {e}", self.topic);
        }
    }

    async fn release_target(&self, asset: &str, tz: Tz, interval: &TimeInterval) {
        self.set_target(asset, tz, None, interval).await;
    }
}

/// Forwards every scheduled power of the cycle's market to a [`TargetSink`].
#[derive(Debug)]
pub struct ExternalTarget<S> {
    sink: S,
}

impl<S: TargetSink> ExternalTarget<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[async_trait]
impl<S: TargetSink> ActuationStrategy for ExternalTarget<S> {
    fn kind(&self) -> &'static str {
        "external_target"
    }

    async fn actuate(&mut self, cycle: &ActuationCycle<'_>) {
        let asset = &cycle.asset;
        for sp in asset
            .scheduled_powers
            .iter()
            .filter(|sp| sp.belongs_to(cycle.market.as_ref()))
        {
            self.sink
                .set_target(asset.name, asset.tz, Some(sp.value), &sp.time_interval)
                .await;
        }
    }

    async fn release(&mut self, cycle: &ActuationCycle<'_>) {
        let asset = &cycle.asset;
        for sp in asset
            .scheduled_powers
            .iter()
            .filter(|sp| sp.belongs_to(cycle.market.as_ref()))
        {
            self.sink
                .release_target(asset.name, asset.tz, &sp.time_interval)
                .await;
        }
    }
}
