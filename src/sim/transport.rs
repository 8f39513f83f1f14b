//! In-memory actuator and message bus.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::transport::{RemotePointIo, TargetPublisher, Transport, TransportError};

/// One write received by the actuator.
#[derive(Debug, Clone, PartialEq)]
pub struct PointWrite {
    pub point: String,
    pub value: Option<f64>,
    pub requester: String,
}

/// One payload received by the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Value,
}

#[derive(Debug, Default)]
struct State {
    points: HashMap<String, Option<f64>>,
    failing: HashSet<String>,
    writes: Vec<PointWrite>,
    published: Vec<Published>,
    write_delay: Option<Duration>,
    fail_publish: bool,
}

/// Records every call and stores point values in memory.
///
/// Reading a point that was never seeded or written is a remote error, as
/// with a real actuator that does not know the point.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    state: Mutex<State>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the current value of `point`.
    pub fn set_point(&self, point: impl Into<String>, value: Option<f64>) {
        self.state.lock().points.insert(point.into(), value);
    }

    /// Makes every read and write of `point` fail.
    pub fn fail_point(&self, point: impl Into<String>) {
        self.state.lock().failing.insert(point.into());
    }

    /// Delays every write by `delay` before it is applied.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.state.lock().write_delay = delay;
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.state.lock().fail_publish = fail;
    }

    /// Current value of `point`; `None` if unknown or released.
    pub fn point(&self, point: &str) -> Option<f64> {
        self.state.lock().points.get(point).copied().flatten()
    }

    pub fn writes(&self) -> Vec<PointWrite> {
        self.state.lock().writes.clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.state.lock().published.clone()
    }

    /// Payloads published on `topic`, oldest first.
    pub fn published_on(&self, topic: &str) -> Vec<Value> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.payload.clone())
            .collect()
    }

    /// Handles for strategies, both backed by `self`.
    pub fn handles(self: &Arc<Self>) -> Transport {
        Transport::new(
            Arc::clone(self) as Arc<dyn RemotePointIo>,
            Arc::clone(self) as Arc<dyn TargetPublisher>,
        )
    }
}

#[async_trait]
impl RemotePointIo for RecordingTransport {
    async fn read(&self, point: &str, _timeout: Duration) -> Result<Option<f64>, TransportError> {
        let state = self.state.lock();
        if state.failing.contains(point) {
            return Err(TransportError::Remote(format!("read of {point} failed")));
        }
        state
            .points
            .get(point)
            .copied()
            .ok_or_else(|| TransportError::Remote(format!("unknown point {point}")))
    }

    async fn write(
        &self,
        point: &str,
        value: Option<f64>,
        requester: &str,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        let delay = self.state.lock().write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.failing.contains(point) {
            return Err(TransportError::Remote(format!("write of {point} failed")));
        }
        state.points.insert(point.to_string(), value);
        state.writes.push(PointWrite {
            point: point.to_string(),
            value,
            requester: requester.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl TargetPublisher for RecordingTransport {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_publish {
            return Err(TransportError::Publish(format!("bus rejected {topic}")));
        }
        state.published.push(Published {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}
