//! Background re-assertion of the last issued commands while actuation is active.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Work repeated on every tick of a [`PeriodicTask`].
#[async_trait]
pub trait PeriodicAction: fmt::Debug + Send + Sync {
    async fn run(&self);
}

/// A spawned loop running a [`PeriodicAction`] every `period`.
///
/// The first tick fires one full period after spawning. Each tick holds the
/// asset's actuation lock, so it never interleaves with a market-driven cycle.
#[derive(Debug)]
pub struct PeriodicTask {
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawns the loop on the current tokio runtime.
    pub fn spawn(
        asset: String,
        period: Duration,
        lock: Arc<Mutex<()>>,
        action: Arc<dyn PeriodicAction>,
    ) -> Self {
        let first = Instant::now() + period;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("{asset}: periodic actuation started (every {period:?})");

            loop {
                ticker.tick().await;
                let _guard = lock.lock().await;
                debug!("{asset}: periodic actuation tick");
                action.run().await;
            }
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Aborts the loop and waits until any in-flight tick has been dropped.
    pub async fn cancel(self) {
        self.handle.abort();
        // A cancelled join error is the expected outcome here.
        let _ = self.handle.await;
    }

    /// Aborts the loop without waiting.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Counter(AtomicUsize);

    #[async_trait]
    impl PeriodicAction for Counter {
        async fn run(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_after_each_period_until_cancelled() {
        let counter = Arc::new(Counter::default());
        let lock = Arc::new(Mutex::new(()));
        let task = PeriodicTask::spawn(
            "a".to_string(),
            Duration::from_secs(60),
            Arc::clone(&lock),
            counter.clone(),
        );

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(62)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);

        task.cancel().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_waits_for_the_actuation_lock() {
        let counter = Arc::new(Counter::default());
        let lock = Arc::new(Mutex::new(()));
        let task = PeriodicTask::spawn(
            "a".to_string(),
            Duration::from_secs(10),
            Arc::clone(&lock),
            counter.clone(),
        );

        let guard = lock.lock().await;
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        drop(guard);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(counter.0.load(Ordering::SeqCst) >= 1);
        task.cancel().await;
    }
}
