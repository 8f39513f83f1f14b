//! Capabilities the core needs from the host's message bus.
//!
//! The core never talks to a bus directly. Strategies hold these handles and
//! wrap every call with a bounded wait; failures are logged at the call site.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Transient failure talking to a remote collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Read and write access to physical points behind an actuator service.
#[async_trait]
pub trait RemotePointIo: fmt::Debug + Send + Sync {
    /// Reads the current value of `point`. `None` means the point has no value.
    async fn read(&self, point: &str, timeout: Duration) -> Result<Option<f64>, TransportError>;

    /// Writes `value` to `point` on behalf of `requester`. Writing `None`
    /// releases the point back to its device default.
    async fn write(
        &self,
        point: &str,
        value: Option<f64>,
        requester: &str,
        timeout: Duration,
    ) -> Result<(), TransportError>;
}

/// Best-effort publish of structured payloads.
#[async_trait]
pub trait TargetPublisher: fmt::Debug + Send + Sync {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), TransportError>;
}

/// Handles injected into strategies when an asset is built.
#[derive(Debug, Clone, Default)]
pub struct Transport {
    pub point_io: Option<Arc<dyn RemotePointIo>>,
    pub publisher: Option<Arc<dyn TargetPublisher>>,
}

impl Transport {
    pub fn new(point_io: Arc<dyn RemotePointIo>, publisher: Arc<dyn TargetPublisher>) -> Self {
        Self {
            point_io: Some(point_io),
            publisher: Some(publisher),
        }
    }
}

/// Runs `call`, failing with [`TransportError::Timeout`] if it does not finish within `limit`.
pub(crate) async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| TransportError::Timeout(limit))?
}
