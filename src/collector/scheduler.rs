//! Drives the registered collectors on a fixed cadence.
//!
//! A single atomic flag guards against overlapping cycles, the first
//! tick is aligned to the last persisted collection mark so the cadence
//! survives restarts, and every cycle runs under a 20-second deadline.

use super::Collector;
use crate::storage::insert::COLLECTION_MARK_METRIC;
use crate::storage::Store;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CYCLE_DEADLINE: Duration = Duration::from_secs(20);

pub struct CollectorManager {
    store: Arc<Store>,
    collectors: Vec<Arc<dyn Collector>>,
    interval: Duration,
    cancel: CancellationToken,
    is_collecting: AtomicBool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionResult {
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub duration: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub timestamp: DateTime<Utc>,
    pub duration: String,
    pub results: Vec<CollectionResult>,
}

/// Clears the overrun flag even when a cycle panics or is cancelled.
struct CollectingGuard<'a>(&'a AtomicBool);

impl Drop for CollectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CollectorManager {
    pub fn new(store: Arc<Store>, interval: Duration) -> Self {
        Self {
            store,
            collectors: Vec::new(),
            interval,
            cancel: CancellationToken::new(),
            is_collecting: AtomicBool::new(false),
        }
    }

    /// Collectors run in registration order within each cycle.
    pub fn register(&mut self, collector: Arc<dyn Collector>) {
        self.collectors.push(collector);
    }

    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let delay = manager.startup_delay();
            if !delay.is_zero() {
                info!(delay_secs = delay.as_secs(), "delaying first collection based on last mark");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = manager.cancel.cancelled() => return,
                }
            }

            manager.run_collection().await;

            let mut ticker = tokio::time::interval(manager.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; the initial run above
            // already covered it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.run_collection().await,
                    _ = manager.cancel.cancelled() => return,
                }
            }
        });
    }

    /// Ends the ticker loop. An in-flight cycle runs to completion,
    /// bounded by its own deadline.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// How long to wait before the first tick so the external cadence
    /// stays stable across restarts.
    pub fn startup_delay(&self) -> Duration {
        let last = match self.store.last_timestamp(COLLECTION_MARK_METRIC) {
            Ok(last) => last,
            Err(err) => {
                warn!(%err, "could not determine last collection time");
                return Duration::ZERO;
            }
        };
        if last == 0 {
            return Duration::ZERO;
        }

        let elapsed = Utc::now().timestamp() - last;
        let interval = self.interval.as_secs() as i64;
        if elapsed < 0 || elapsed >= interval {
            return Duration::ZERO;
        }
        Duration::from_secs((interval - elapsed) as u64)
    }

    pub async fn run_collection(&self) {
        if self
            .is_collecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("previous collection cycle still in progress, skipping");
            return;
        }
        let _guard = CollectingGuard(&self.is_collecting);

        debug!("collection cycle started");
        let started = Instant::now();
        // All samples of the cycle share the mark's truncated timestamp.
        let cycle_start_ms = (Utc::now().timestamp_millis() / 1000) * 1000;

        let cycle = async {
            for collector in &self.collectors {
                debug!(collector = collector.name(), "running collector");
                if let Err(err) = collector.collect(&self.store).await {
                    error!(%err, collector = collector.name(), "error collecting metrics");
                }
            }
        };
        if tokio::time::timeout(CYCLE_DEADLINE, cycle).await.is_err() {
            warn!("collection cycle hit its deadline");
        }

        if let Err(err) = self.store.insert_collection_mark(cycle_start_ms) {
            warn!(%err, "failed to record collection mark");
        }
        if let Err(err) = self.store.flush() {
            warn!(%err, "failed to flush store");
        }

        info!(duration_ms = started.elapsed().as_millis() as u64, "collection cycle completed");
    }

    /// Run every collector once, outside the scheduled cadence.
    pub async fn force_run(&self) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport {
            timestamp: Utc::now(),
            duration: String::new(),
            results: Vec::with_capacity(self.collectors.len()),
        };
        for collector in &self.collectors {
            report.results.push(self.run_one(collector.as_ref()).await);
        }
        report.duration = format!("{:?}", started.elapsed());
        report
    }

    /// Run exactly one collector by name; None when unknown.
    pub async fn force_run_one(&self, name: &str) -> Option<CollectionResult> {
        for collector in &self.collectors {
            if collector.name() == name {
                return Some(self.run_one(collector.as_ref()).await);
            }
        }
        None
    }

    async fn run_one(&self, collector: &dyn Collector) -> CollectionResult {
        let started = Instant::now();
        let outcome = collector.collect(&self.store).await;
        let duration = format!("{:?}", started.elapsed());
        match outcome {
            Ok(message) => CollectionResult {
                name: collector.name().to_string(),
                success: true,
                message,
                error: String::new(),
                duration,
            },
            Err(err) => CollectionResult {
                name: collector.name().to_string(),
                success: false,
                message: String::new(),
                error: err.to_string(),
                duration,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreOptions;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct SlowCollector {
        runs: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Collector for SlowCollector {
        fn name(&self) -> &'static str {
            "SlowCollector"
        }

        async fn collect(&self, _store: &Store) -> Result<String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok("done".to_string())
        }
    }

    struct FailingCollector;

    #[async_trait]
    impl Collector for FailingCollector {
        fn name(&self) -> &'static str {
            "FailingCollector"
        }

        async fn collect(&self, _store: &Store) -> Result<String> {
            anyhow::bail!("gateway unreachable")
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> Arc<Store> {
        Arc::new(
            Store::open(StoreOptions {
                path: dir.path().to_path_buf(),
                retention: Duration::ZERO,
                partition_duration: Duration::from_secs(2 * 3600),
            })
            .unwrap(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overrun_guard_skips_overlapping_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let collector = Arc::new(SlowCollector {
            runs: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
        });
        let mut manager = CollectorManager::new(store.clone(), Duration::from_secs(30));
        manager.register(collector.clone());
        let manager = Arc::new(manager);

        let a = {
            let m = Arc::clone(&manager);
            tokio::spawn(async move { m.run_collection().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let b = {
            let m = Arc::clone(&manager);
            tokio::spawn(async move { m.run_collection().await })
        };
        a.await.unwrap();
        b.await.unwrap();

        // The overlapping cycle was skipped: one run, one mark.
        assert_eq!(collector.runs.load(Ordering::SeqCst), 1);
        let marks = store
            .select(
                COLLECTION_MARK_METRIC,
                &std::collections::HashMap::new(),
                0,
                Utc::now().timestamp() + 10,
                0,
                "",
            )
            .unwrap();
        assert_eq!(marks.len(), 1);
    }

    #[tokio::test]
    async fn test_startup_alignment_waits_out_the_interval() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        // Mark 10 seconds ago with a 30 second interval: wait ~20s.
        let mark_ms = (Utc::now().timestamp() - 10) * 1000;
        store.insert_collection_mark(mark_ms).unwrap();
        let manager = CollectorManager::new(store.clone(), Duration::from_secs(30));
        let delay = manager.startup_delay();
        assert!(delay >= Duration::from_secs(18) && delay <= Duration::from_secs(21));
    }

    #[tokio::test]
    async fn test_startup_alignment_immediate_when_mark_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let mark_ms = (Utc::now().timestamp() - 2 * 3600) * 1000;
        store.insert_collection_mark(mark_ms).unwrap();
        let manager = CollectorManager::new(store.clone(), Duration::from_secs(30));
        assert_eq!(manager.startup_delay(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_startup_alignment_immediate_without_mark() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let manager = CollectorManager::new(store, Duration::from_secs(30));
        assert_eq!(manager.startup_delay(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_force_run_reports_errors_without_stopping() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let mut manager = CollectorManager::new(store, Duration::from_secs(30));
        manager.register(Arc::new(FailingCollector));
        manager.register(Arc::new(SlowCollector {
            runs: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }));

        let report = manager.force_run().await;
        assert_eq!(report.results.len(), 2);
        assert!(!report.results[0].success);
        assert_eq!(report.results[0].error, "gateway unreachable");
        assert!(report.results[1].success);
        assert_eq!(report.results[1].message, "done");
    }

    #[tokio::test]
    async fn test_force_run_one_unknown_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let mut manager = CollectorManager::new(store, Duration::from_secs(30));
        manager.register(Arc::new(FailingCollector));

        assert!(manager.force_run_one("NoSuchCollector").await.is_none());
        let result = manager.force_run_one("FailingCollector").await.unwrap();
        assert!(!result.success);
    }
}
