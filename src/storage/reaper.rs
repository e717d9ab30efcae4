//! Background TTL Reaper
//!
//! Lazy expiry only reclaims keys that somebody reads again. A session cache
//! is full of keys that are written once and never touched after they
//! expire, so a background task periodically samples each shard and evicts a
//! bounded number of expired entries.
//!
//! ## Bounded Passes
//!
//! One pass visits every shard but does a fixed amount of work per shard:
//! the total budget (`keys_per_scan`) is split evenly, and a shard scan
//! stops after either finding its share of expired keys or inspecting twice
//! that many entries. A pass is therefore O(budget), never O(dataset).
//!
//! The reaper and lazy expiry are independently correct; together they keep
//! steady-state memory bounded.

use crate::storage::map::{now_unix, ShardedMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Configuration for the TTL reaper.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Time between cleanup passes.
    pub cleanup_interval: Duration,

    /// Total eviction budget per pass, split across all shards.
    /// Too large hurts tail latency, too small lets cold garbage linger.
    pub keys_per_scan: usize,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(1),
            keys_per_scan: 100,
        }
    }
}

struct ReaperTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodically evicts expired entries from a [`ShardedMap`].
///
/// # Example
///
/// ```ignore
/// let map = Arc::new(ShardedMap::new());
/// let reaper = TtlReaper::new(Arc::clone(&map), ReaperConfig::default());
/// reaper.start();
/// // ...
/// reaper.stop().await;
/// ```
pub struct TtlReaper {
    map: Arc<ShardedMap>,
    config: ReaperConfig,
    state: Mutex<Option<ReaperTask>>,
}

impl TtlReaper {
    /// Creates a reaper for `map`. The task is not started yet.
    pub fn new(map: Arc<ShardedMap>, config: ReaperConfig) -> Self {
        Self {
            map,
            config,
            state: Mutex::new(None),
        }
    }

    /// Spawns the cleanup task. Non-blocking.
    ///
    /// Calling `start` while the reaper is already running is a no-op.
    pub fn start(&self) {
        let mut state = self.state.lock().unwrap();
        if state.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(reap_loop(
            Arc::clone(&self.map),
            self.config.clone(),
            shutdown_rx,
        ));

        *state = Some(ReaperTask {
            shutdown_tx,
            handle,
        });

        info!(
            interval_ms = self.config.cleanup_interval.as_millis() as u64,
            keys_per_scan = self.config.keys_per_scan,
            "TTL reaper started"
        );
    }

    /// Signals the cleanup task and waits for it to finish.
    ///
    /// Safe to call when the reaper is not running, and safe to call more
    /// than once.
    pub async fn stop(&self) {
        let task = self.state.lock().unwrap().take();
        let Some(task) = task else {
            return;
        };

        let _ = task.shutdown_tx.send(true);
        let _ = task.handle.await;
        info!("TTL reaper stopped");
    }

    /// True while the cleanup task is running.
    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }

    /// The configuration this reaper was built with.
    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }
}

impl Drop for TtlReaper {
    fn drop(&mut self) {
        // Best effort: signal the task without waiting for it.
        if let Some(task) = self.state.lock().unwrap().take() {
            let _ = task.shutdown_tx.send(true);
        }
    }
}

/// The cleanup loop. Sleeps, sweeps every shard once, repeats.
async fn reap_loop(map: Arc<ShardedMap>, config: ReaperConfig, mut shutdown_rx: watch::Receiver<bool>) {
    let per_shard_budget = (config.keys_per_scan / map.shard_count()).max(1);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.cleanup_interval) => {}
            _ = shutdown_rx.changed() => {
                debug!("TTL reaper received shutdown signal");
                return;
            }
        }

        let now = now_unix();
        let mut evicted = 0usize;

        for index in 0..map.shard_count() {
            // Shutdown is observed between shards, never mid-shard.
            if *shutdown_rx.borrow() {
                return;
            }
            evicted += map.sweep_shard(index, per_shard_budget, now);
        }

        if evicted > 0 {
            debug!(evicted, remaining = map.len(), "reaper pass evicted expired keys");
        } else {
            trace!("reaper pass found nothing to evict");
        }
    }
}
