//! Background Expiry Sweeper
//!
//! Reads already hide expired records (lazy expiry), but a root key that
//! expires and is never touched again would otherwise sit in the map
//! forever. The sweeper is a Tokio task that periodically purges them
//! ("active expiry").
//!
//! A collection's TTL lives on its meta record only. When the sweeper evicts
//! an expired meta record it removes every record under the collection's
//! content prefixes in the same pass.
//!
//! ## Adaptive Frequency
//!
//! ```text
//!   expired / records > speedup_threshold   -> interval / 2 (>= min)
//!   nothing expired                         -> interval * 2 (<= max)
//! ```

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Starting interval between sweeps (default: 100ms)
    pub base_interval: Duration,

    /// Fastest the sweeper will ever run (default: 10ms)
    pub min_interval: Duration,

    /// Slowest the sweeper will ever run (default: 1s)
    pub max_interval: Duration,

    /// Expired fraction above which the interval halves
    pub speedup_threshold: f64,

    /// Expired fraction below which an idle sweeper backs off
    pub slowdown_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        }
    }
}

impl ExpiryConfig {
    /// Default tuning with a different starting interval.
    pub fn with_interval(base_interval: Duration) -> Self {
        Self {
            base_interval,
            max_interval: base_interval.max(Duration::from_secs(1)),
            ..Default::default()
        }
    }

    fn next_interval(&self, current: Duration, expired: u64, records_before: usize) -> Duration {
        if records_before == 0 {
            return current;
        }
        let rate = expired as f64 / records_before as f64;
        if rate > self.speedup_threshold {
            (current / 2).max(self.min_interval)
        } else if rate < self.slowdown_threshold && expired == 0 {
            (current * 2).min(self.max_interval)
        } else {
            current
        }
    }
}

/// Handle to the running sweeper task. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current Tokio runtime.
    ///
    /// ```
    /// use raptorkv::storage::{ExpiryConfig, ExpirySweeper, StorageEngine};
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let engine = Arc::new(StorageEngine::new());
    /// let sweeper = ExpirySweeper::start(engine, ExpiryConfig::default());
    /// drop(sweeper);
    /// # }
    /// ```
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(engine, config, shutdown_rx));
        info!("Background expiry sweeper started");

        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let records_before = engine.raw_len();
        let expired = engine.cleanup_expired();
        let next = config.next_interval(interval, expired, records_before);

        if next < interval {
            debug!(
                expired,
                new_interval_ms = next.as_millis() as u64,
                "High expiry rate, speeding up sweeper"
            );
        } else if next > interval {
            trace!(
                new_interval_ms = next.as_millis() as u64,
                "Nothing expired, slowing down sweeper"
            );
        }
        interval = next;

        if expired > 0 {
            debug!(
                expired,
                records_remaining = engine.raw_len(),
                "Expired records cleaned up"
            );
        }
    }
}

/// Starts the sweeper with default tuning.
pub fn start_expiry_sweeper(engine: Arc<StorageEngine>) -> ExpirySweeper {
    ExpirySweeper::start(engine, ExpiryConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use bytes::Bytes;

    fn fast() -> ExpiryConfig {
        ExpiryConfig {
            base_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sweeper_purges_expired_records() {
        let engine = Arc::new(StorageEngine::new());

        for i in 0..10 {
            engine
                .set(
                    Bytes::from(format!("key{}", i)),
                    Bytes::from("value"),
                    Some(Duration::from_millis(30)),
                )
                .unwrap();
        }
        engine
            .set(Bytes::from("persistent"), Bytes::from("value"), None)
            .unwrap();
        assert_eq!(engine.raw_len(), 11);

        let _sweeper = ExpirySweeper::start(Arc::clone(&engine), fast());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(engine.raw_len(), 1);
        assert!(engine.exists(b"persistent").unwrap());
    }

    #[tokio::test]
    async fn test_sweeper_purges_expired_collection_records() {
        use crate::encoding::{self, KeyType};
        use crate::storage::{TtlPolicy, WriteBatch};

        let engine = Arc::new(StorageEngine::new());
        let mut batch = WriteBatch::new();
        for field in ["a", "b", "c"] {
            batch.put(encoding::field_key(b"h", field.as_bytes()), Bytes::from("v"));
        }
        batch.put_with_ttl(
            Bytes::from("h"),
            encoding::encode_meta(KeyType::Hash, 3),
            TtlPolicy::Expire(Duration::from_millis(30)),
        );
        engine.write(batch).unwrap();
        assert_eq!(engine.raw_len(), 4);

        let _sweeper = ExpirySweeper::start(Arc::clone(&engine), fast());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(engine.raw_len(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let engine = Arc::new(StorageEngine::new());

        {
            let _sweeper = ExpirySweeper::start(Arc::clone(&engine), fast());
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        engine
            .set(
                Bytes::from("key"),
                Bytes::from("value"),
                Some(Duration::from_millis(10)),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        // No sweeper: the record is still held, only hidden from reads
        assert_eq!(engine.raw_len(), 1);
        assert!(engine.get(b"key").unwrap().is_none());
    }

    #[test]
    fn test_interval_adapts() {
        let config = ExpiryConfig {
            base_interval: Duration::from_millis(40),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(100),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        };
        let base = config.base_interval;

        assert_eq!(config.next_interval(base, 50, 100), Duration::from_millis(20));
        assert_eq!(
            config.next_interval(Duration::from_millis(15), 50, 100),
            Duration::from_millis(10)
        );
        assert_eq!(config.next_interval(base, 0, 100), Duration::from_millis(80));
        assert_eq!(
            config.next_interval(Duration::from_millis(80), 0, 100),
            Duration::from_millis(100)
        );
        assert_eq!(config.next_interval(base, 5, 100), base);
        assert_eq!(config.next_interval(base, 0, 0), base);
    }
}
