//! Actuation gate and strategies.
//!
//! The [`ActuationManager`] decides on every market event whether the asset
//! may command its equipment, and drives one [`ActuationStrategy`] through
//! the activate, re-assert and release transitions.

/// Proportional setpoint strategy and its writers.
pub mod direct_ratio;
/// Power-target strategies.
pub mod external_target;
/// Background re-assertion loop.
pub mod periodic;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::frame::ModelFrame;
use crate::market::{ActuationWindow, IntervalValue, MarketRef, Vertex};
use crate::occupancy::OccupancyManager;
use crate::transport::Transport;

pub use direct_ratio::{DirectRatio, LogSetpoints, RemoteSetpointWriter, SetpointWriter};
pub use external_target::{ExternalTarget, IlcTargetSink, LogTargets, TargetSink};
pub use periodic::{PeriodicAction, PeriodicTask};

/// Read-only view of the asset lent to the strategy for one cycle.
#[derive(Debug, Clone, Copy)]
pub struct AssetView<'a> {
    pub name: &'a str,
    pub tz: Tz,
    pub frame: &'a ModelFrame,
    pub active_vertices: &'a [IntervalValue<Vertex>],
    pub scheduled_powers: &'a [IntervalValue<f64>],
}

/// Everything a strategy may consult during one market-driven cycle.
#[derive(Debug, Clone, Copy)]
pub struct ActuationCycle<'a> {
    pub market: &'a MarketRef,
    pub window: ActuationWindow,
    pub asset: AssetView<'a>,
}

impl<'a> ActuationCycle<'a> {
    pub fn new(market: &'a MarketRef, asset: AssetView<'a>) -> Self {
        Self {
            market,
            window: ActuationWindow::for_market(market.as_ref()),
            asset,
        }
    }
}

/// What to do when actuation is active, and how to undo it.
#[async_trait]
pub trait ActuationStrategy: fmt::Debug + Send + Sync {
    /// Short identifier used in logs.
    fn kind(&self) -> &'static str;

    /// Runs once on the inactive to active edge, before the first [`actuate`](Self::actuate).
    async fn on_activate(&mut self, _cycle: &ActuationCycle<'_>) {}

    /// Runs on every cycle while active.
    async fn actuate(&mut self, cycle: &ActuationCycle<'_>);

    /// Runs once on the active to inactive edge.
    async fn release(&mut self, _cycle: &ActuationCycle<'_>) {}

    /// Work to repeat between market events while active, if any.
    fn periodic_action(&self) -> Option<Arc<dyn PeriodicAction>> {
        None
    }
}

/// Gate-only strategy that never commands equipment.
#[derive(Debug, Default)]
pub struct Passive;

#[async_trait]
impl ActuationStrategy for Passive {
    fn kind(&self) -> &'static str {
        "passive"
    }

    async fn actuate(&mut self, cycle: &ActuationCycle<'_>) {
        debug!("{}: actuation active, nothing to command", cycle.asset.name);
    }
}

fn default_active_onstart() -> bool {
    true
}

fn default_control_interval_secs() -> u64 {
    60
}

fn default_write_timeout_secs() -> u64 {
    15
}

fn default_read_timeout_secs() -> u64 {
    10
}

fn default_publish_timeout_secs() -> u64 {
    10
}

/// Strategy selection, tagged by `strategy`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyConfig {
    Passive,
    DirectRatio,
    TnsDirectRatio {
        actuator_identity: String,
        #[serde(default = "default_write_timeout_secs")]
        write_timeout_secs: u64,
        #[serde(default = "default_read_timeout_secs")]
        read_timeout_secs: u64,
    },
    ExternalTarget,
    Ilc {
        ilc_target_topic: String,
        #[serde(default = "default_publish_timeout_secs")]
        publish_timeout_secs: u64,
    },
}

/// Actuation settings of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActuationConfig {
    /// Initial value of the operator gate.
    #[serde(default = "default_active_onstart")]
    pub active_onstart: bool,
    /// Period of the re-assertion loop, in seconds.
    #[serde(default = "default_control_interval_secs")]
    pub control_interval_secs: u64,
    #[serde(flatten)]
    pub strategy: StrategyConfig,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self {
            active_onstart: default_active_onstart(),
            control_interval_secs: default_control_interval_secs(),
            strategy: StrategyConfig::Passive,
        }
    }
}

impl ActuationConfig {
    /// Field-level problems, reported under `field`.
    pub fn validate(&self, field: &str) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        if self.control_interval_secs == 0 {
            errors.push(ConfigError::new(
                format!("{field}.control_interval_secs"),
                "must be > 0",
            ));
        }
        match &self.strategy {
            StrategyConfig::TnsDirectRatio {
                actuator_identity,
                write_timeout_secs,
                read_timeout_secs,
            } => {
                if actuator_identity.trim().is_empty() {
                    errors.push(ConfigError::new(
                        format!("{field}.actuator_identity"),
                        "must not be empty",
                    ));
                }
                if *write_timeout_secs == 0 {
                    errors.push(ConfigError::new(
                        format!("{field}.write_timeout_secs"),
                        "must be > 0",
                    ));
                }
                if *read_timeout_secs == 0 {
                    errors.push(ConfigError::new(
                        format!("{field}.read_timeout_secs"),
                        "must be > 0",
                    ));
                }
            }
            StrategyConfig::Ilc {
                ilc_target_topic,
                publish_timeout_secs,
            } => {
                if ilc_target_topic.trim().is_empty() {
                    errors.push(ConfigError::new(
                        format!("{field}.ilc_target_topic"),
                        "must not be empty",
                    ));
                }
                if *publish_timeout_secs == 0 {
                    errors.push(ConfigError::new(
                        format!("{field}.publish_timeout_secs"),
                        "must be > 0",
                    ));
                }
            }
            _ => {}
        }
        errors
    }

    /// Instantiates the configured strategy for `asset`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the strategy needs a transport handle
    /// that `transport` does not provide.
    pub fn build_strategy(
        &self,
        asset: &str,
        transport: &Transport,
        field: &str,
    ) -> Result<Box<dyn ActuationStrategy>, ConfigError> {
        Ok(match &self.strategy {
            StrategyConfig::Passive => Box::new(Passive),
            StrategyConfig::DirectRatio => Box::new(DirectRatio::new(LogSetpoints)),
            StrategyConfig::TnsDirectRatio {
                actuator_identity,
                write_timeout_secs,
                read_timeout_secs,
            } => {
                let point_io = transport.point_io.clone().ok_or_else(|| {
                    ConfigError::new(field, "tns_direct_ratio needs a remote point service")
                })?;
                let writer = RemoteSetpointWriter::new(point_io, actuator_identity, asset)
                    .with_timeouts(
                        Duration::from_secs(*write_timeout_secs),
                        Duration::from_secs(*read_timeout_secs),
                    );
                Box::new(DirectRatio::new(writer))
            }
            StrategyConfig::ExternalTarget => Box::new(ExternalTarget::new(LogTargets)),
            StrategyConfig::Ilc {
                ilc_target_topic,
                publish_timeout_secs,
            } => {
                let publisher = transport.publisher.clone().ok_or_else(|| {
                    ConfigError::new(field, "ilc needs a target publisher")
                })?;
                Box::new(ExternalTarget::new(
                    IlcTargetSink::new(publisher, ilc_target_topic)
                        .with_publish_timeout(Duration::from_secs(*publish_timeout_secs)),
                ))
            }
        })
    }
}

/// Snapshot of the manager's gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuationState {
    /// Whether the last cycle was actuating.
    pub active: bool,
    /// Operator permission to actuate.
    pub allowed: bool,
    /// Whether a periodic re-assertion loop is running.
    pub running_task: bool,
}

/// Per-asset actuation state machine.
#[derive(Debug)]
pub struct ActuationManager {
    asset: String,
    active: bool,
    allowed: bool,
    control_interval: Duration,
    occupancy: Option<Arc<OccupancyManager>>,
    strategy: Box<dyn ActuationStrategy>,
    periodic: Option<PeriodicTask>,
    lock: Arc<Mutex<()>>,
}

impl ActuationManager {
    /// Creates an inactive manager.
    ///
    /// Without an occupancy manager the gate never opens.
    pub fn new(
        asset: impl Into<String>,
        config: &ActuationConfig,
        occupancy: Option<Arc<OccupancyManager>>,
        strategy: Box<dyn ActuationStrategy>,
    ) -> Self {
        let asset = asset.into();
        if occupancy.is_none() {
            warn!("{asset}: no occupancy manager configured, actuation is disabled");
        }
        Self {
            asset,
            active: false,
            allowed: config.active_onstart,
            control_interval: Duration::from_secs(config.control_interval_secs),
            occupancy,
            strategy,
            periodic: None,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn state(&self) -> ActuationState {
        ActuationState {
            active: self.active,
            allowed: self.allowed,
            running_task: self.periodic.as_ref().is_some_and(|t| !t.is_finished()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn occupancy(&self) -> Option<&OccupancyManager> {
        self.occupancy.as_deref()
    }

    pub fn strategy(&self) -> &dyn ActuationStrategy {
        self.strategy.as_ref()
    }

    /// Sets the operator gate. Takes effect on the next [`actuate`](Self::actuate).
    pub fn set_allowed(&mut self, allowed: bool) {
        if self.allowed != allowed {
            info!("{}: actuation allowed = {allowed}", self.asset);
        }
        self.allowed = allowed;
    }

    /// Whether actuation should be active for `window`.
    pub fn should_actuate(&self, window: ActuationWindow) -> bool {
        let Some(occupancy) = &self.occupancy else {
            return false;
        };
        self.allowed && occupancy.check_schedule(window.start) && occupancy.check_schedule(window.end)
    }

    /// Evaluates the gate for the cycle's interval and runs the matching transition.
    pub async fn actuate(&mut self, cycle: &ActuationCycle<'_>) {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.lock().await;

        let active_now = self.should_actuate(cycle.window);
        match (self.active, active_now) {
            (false, true) => {
                info!(
                    "{}: actuation activated ({}) for {}",
                    self.asset,
                    self.strategy.kind(),
                    cycle.window.start
                );
                self.active = true;
                self.strategy.on_activate(cycle).await;
                self.strategy.actuate(cycle).await;
                self.ensure_periodic();
            }
            (true, true) => {
                self.strategy.actuate(cycle).await;
                self.ensure_periodic();
            }
            (true, false) => {
                info!("{}: actuation deactivated for {}", self.asset, cycle.window.start);
                self.cancel_periodic().await;
                self.strategy.release(cycle).await;
                self.active = false;
            }
            (false, false) => {
                debug!("{}: actuation inactive for {}", self.asset, cycle.window.start);
            }
        }
    }

    /// Stops background work. The manager stays usable.
    pub async fn shutdown(&mut self) {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.lock().await;
        self.cancel_periodic().await;
    }

    fn ensure_periodic(&mut self) {
        if self.periodic.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        if let Some(action) = self.strategy.periodic_action() {
            self.periodic = Some(PeriodicTask::spawn(
                self.asset.clone(),
                self.control_interval,
                Arc::clone(&self.lock),
                action,
            ));
        }
    }

    async fn cancel_periodic(&mut self) {
        if let Some(task) = self.periodic.take() {
            debug!("{}: cancelling periodic actuation", self.asset);
            task.cancel().await;
        }
    }
}

impl Drop for ActuationManager {
    fn drop(&mut self) {
        if let Some(task) = self.periodic.take() {
            task.abort();
        }
    }
}
