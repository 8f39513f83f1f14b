//! Proportional setpoint control from the cleared price's position in the bid range.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::actuation::periodic::PeriodicAction;
use crate::actuation::{ActuationCycle, ActuationStrategy, AssetView};
use crate::transport::{RemotePointIo, bounded};

/// Default bound on a remote setpoint write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);
/// Default bound on reading a point's release value.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// One setpoint to write to one actuation target.
#[derive(Debug, Clone, PartialEq)]
pub struct SetpointCommand {
    pub target: String,
    pub set_point: f64,
}

/// Delivers setpoints computed by [`DirectRatio`].
#[async_trait]
pub trait SetpointWriter: fmt::Debug + Send + Sync + 'static {
    /// Called once when actuation becomes active, before the first write.
    async fn prepare(&self, _targets: &[String]) {}

    async fn direct_actuate(&self, target: &str, set_point: f64);

    /// Hands `target` back to the device once actuation stops.
    async fn direct_release(&self, _target: &str) {}
}

/// Writer that only logs. Used when no actuator service is wired in.
#[derive(Debug, Default)]
pub struct LogSetpoints;

#[async_trait]
impl SetpointWriter for LogSetpoints {
    async fn direct_actuate(&self, target: &str, set_point: f64) {
        debug!("{target}: setpoint {set_point:.3}");
    }
}

/// Writer that commands points through a remote actuator service.
///
/// On activation it reads each target's current value so release can
/// restore it. Reads and writes are time-bounded; failures are logged and the
/// cycle continues.
#[derive(Debug)]
pub struct RemoteSetpointWriter {
    point_io: Arc<dyn RemotePointIo>,
    actuator: String,
    requester: String,
    write_timeout: Duration,
    read_timeout: Duration,
    release_values: Mutex<HashMap<String, Option<f64>>>,
}

impl RemoteSetpointWriter {
    pub fn new(
        point_io: Arc<dyn RemotePointIo>,
        actuator: impl Into<String>,
        requester: impl Into<String>,
    ) -> Self {
        Self {
            point_io,
            actuator: actuator.into(),
            requester: requester.into(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            release_values: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timeouts(mut self, write: Duration, read: Duration) -> Self {
        self.write_timeout = write;
        self.read_timeout = read;
        self
    }

    /// Value captured for `target` on the last activation, if any.
    pub fn release_value(&self, target: &str) -> Option<f64> {
        self.release_values.lock().get(target).copied().flatten()
    }

    async fn write(&self, target: &str, value: Option<f64>) {
        let call = self
            .point_io
            .write(target, value, &self.requester, self.write_timeout);
        if let Err(e) = bounded(self.write_timeout, call).await {
            warn!("failed to set {target} via {}: {e}", self.actuator);
        }
    }
}

#[async_trait]
impl SetpointWriter for RemoteSetpointWriter {
    async fn prepare(&self, targets: &[String]) {
        for target in targets {
            let call = self.point_io.read(target, self.read_timeout);
            let value = match bounded(self.read_timeout, call).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("failed to get {target} via {}: {e}", self.actuator);
                    None
                }
            };
            self.release_values.lock().insert(target.clone(), value);
        }
    }

    async fn direct_actuate(&self, target: &str, set_point: f64) {
        self.write(target, Some(set_point)).await;
    }

    async fn direct_release(&self, target: &str) {
        let value = self.release_values.lock().remove(target).flatten();
        self.write(target, value).await;
    }
}

/// Position of `price` within `[min, max]`, clamped to `[0, 1]`.
///
/// A degenerate range yields `0`.
pub fn price_ratio(price: f64, min: f64, max: f64) -> f64 {
    if max <= min {
        return 0.0;
    }
    let clamped = price.max(min).min(max);
    (clamped - min) / (max - min)
}

/// Maps the cleared price of the cycle's interval onto each actuatable
/// model's setpoint range.
///
/// Returns `None`, after logging, when the price or the bid range is unknown.
pub fn setpoint_commands(cycle: &ActuationCycle<'_>) -> Option<Vec<SetpointCommand>> {
    let start = cycle.window.start;
    let asset = &cycle.asset;

    let Some(price) = cycle
        .market
        .marginal_prices()
        .into_iter()
        .find(|p| p.time_interval.start == start)
        .map(|p| p.price)
    else {
        warn!("{}: no cleared price for {start}, skipping actuation", asset.name);
        return None;
    };

    let Some((min, max)) = vertex_price_range(asset, start) else {
        warn!("{}: no vertices for {start}, skipping actuation", asset.name);
        return None;
    };

    let ratio = price_ratio(price, min, max);
    debug!(
        "{}: cleared {price:.4} in [{min:.4}, {max:.4}] -> ratio {ratio:.3}",
        asset.name
    );

    let local_start = start.with_timezone(&asset.tz);
    let commands = asset
        .frame
        .models()
        .filter_map(|(_, model)| {
            let target = model.actuation_target()?;
            let (lo, hi) = model.set_point_range(local_start)?;
            Some(SetpointCommand {
                target: target.to_string(),
                set_point: lo + ratio * (hi - lo),
            })
        })
        .collect();
    Some(commands)
}

fn vertex_price_range(asset: &AssetView<'_>, start: DateTime<Utc>) -> Option<(f64, f64)> {
    asset
        .active_vertices
        .iter()
        .filter(|v| v.time_interval.start == start)
        .map(|v| v.value.marginal_price)
        .fold(None, |acc, p| match acc {
            None => Some((p, p)),
            Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
        })
}

/// Targets of every model that accepts setpoint commands.
fn actuation_targets(asset: &AssetView<'_>) -> Vec<String> {
    asset
        .frame
        .models()
        .filter_map(|(_, m)| m.actuation_target().map(str::to_string))
        .collect()
}

/// Direct-ratio strategy over a pluggable [`SetpointWriter`].
#[derive(Debug)]
pub struct DirectRatio<W> {
    writer: Arc<W>,
    last_commands: Arc<Mutex<Vec<SetpointCommand>>>,
}

impl<W: SetpointWriter> DirectRatio<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(writer),
            last_commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Setpoints written by the last cycle.
    pub fn last_commands(&self) -> Vec<SetpointCommand> {
        self.last_commands.lock().clone()
    }
}

#[async_trait]
impl<W: SetpointWriter> ActuationStrategy for DirectRatio<W> {
    fn kind(&self) -> &'static str {
        "direct_ratio"
    }

    async fn on_activate(&mut self, cycle: &ActuationCycle<'_>) {
        self.writer.prepare(&actuation_targets(&cycle.asset)).await;
    }

    async fn actuate(&mut self, cycle: &ActuationCycle<'_>) {
        let Some(commands) = setpoint_commands(cycle) else {
            return;
        };
        for cmd in &commands {
            info!("{}: {} -> {:.3}", cycle.asset.name, cmd.target, cmd.set_point);
            self.writer.direct_actuate(&cmd.target, cmd.set_point).await;
        }
        *self.last_commands.lock() = commands;
    }

    async fn release(&mut self, cycle: &ActuationCycle<'_>) {
        self.last_commands.lock().clear();
        for target in actuation_targets(&cycle.asset) {
            info!("{}: releasing {target}", cycle.asset.name);
            self.writer.direct_release(&target).await;
        }
    }

    fn periodic_action(&self) -> Option<Arc<dyn PeriodicAction>> {
        Some(Arc::new(Reassert {
            writer: Arc::clone(&self.writer),
            last_commands: Arc::clone(&self.last_commands),
        }))
    }
}

/// Re-writes the most recent setpoints.
#[derive(Debug)]
struct Reassert<W> {
    writer: Arc<W>,
    last_commands: Arc<Mutex<Vec<SetpointCommand>>>,
}

#[async_trait]
impl<W: SetpointWriter> PeriodicAction for Reassert<W> {
    async fn run(&self) {
        let commands = self.last_commands.lock().clone();
        for cmd in commands {
            self.writer.direct_actuate(&cmd.target, cmd.set_point).await;
        }
    }
}
