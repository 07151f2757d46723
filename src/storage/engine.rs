//! The local time-series engine.
//!
//! Samples are appended through a batched [`Appender`] into an in-memory
//! head block backed by a write-ahead log. Finished head ranges are
//! compacted into immutable on-disk blocks of up to one partition
//! duration; late samples go through an out-of-order side buffer that is
//! merged into historical blocks on flush. Blocks behind the retention
//! horizon are dropped whole.

use super::block::{self, Block, StoredSeries};
use super::error::StorageError;
use super::wal::Wal;
use crate::datamodel::labels::series_key;
use crate::datamodel::{GridPulseLabels, Sample};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Allowance for late-arriving samples: ten years.
pub const OOO_WINDOW_MS: i64 = 10 * 365 * 24 * 60 * 60 * 1000;

/// The head never spans more than twelve hours, even with larger
/// partitions.
const MAX_HEAD_MS: i64 = 12 * 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub path: PathBuf,
    /// Maximum age of persisted data. Zero means keep everything.
    pub retention: Duration,
    /// Target size of on-disk blocks.
    pub partition_duration: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct MemSeries {
    pub metric: String,
    pub labels: GridPulseLabels,
    /// Sorted ascending in the head; unsorted in the OOO buffer.
    pub samples: Vec<(i64, f64)>,
}

#[derive(Debug)]
pub(crate) struct Head {
    /// Lower bound of in-order ingestion; anything older is out-of-order.
    pub min_time: Option<i64>,
    pub series: HashMap<String, MemSeries>,
    pub ooo: HashMap<String, MemSeries>,
    pub wal: Wal,
}

#[derive(Debug)]
pub struct Store {
    pub(crate) path: PathBuf,
    pub(crate) retention_ms: i64,
    pub(crate) partition_ms: i64,
    pub(crate) head_ms: i64,
    pub(crate) blocks: RwLock<Vec<Arc<Block>>>,
    pub(crate) head: Mutex<Head>,
}

pub(crate) fn align_down(t: i64, step: i64) -> i64 {
    t.div_euclid(step) * step
}

fn sort_dedup(samples: &mut Vec<(i64, f64)>) {
    samples.sort_by_key(|(t, _)| *t);
    // On duplicate timestamps the later write wins.
    samples.dedup_by(|next, prev| {
        if next.0 == prev.0 {
            prev.1 = next.1;
            true
        } else {
            false
        }
    });
}

impl Store {
    pub fn open(opts: StoreOptions) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&opts.path).map_err(StorageError::from_io)?;

        let partition_ms = (opts.partition_duration.as_millis() as i64).max(1);
        let head_ms = partition_ms.min(MAX_HEAD_MS);
        let retention_ms = opts.retention.as_millis() as i64;

        info!(
            path = %opts.path.display(),
            retention_ms,
            partition_ms,
            "opening time-series store"
        );

        let blocks = block::list_blocks(&opts.path)?
            .into_iter()
            .map(Arc::new)
            .collect();

        let (wal, replayed) = Wal::open(&opts.path)?;
        let mut head = Head {
            min_time: None,
            series: HashMap::new(),
            ooo: HashMap::new(),
            wal,
        };
        if !replayed.is_empty() {
            debug!(samples = replayed.len(), "replaying write-ahead log");
            for sample in replayed {
                Self::route_to_head(&mut head, sample, head_ms);
            }
        }

        Ok(Self {
            path: opts.path,
            retention_ms,
            partition_ms,
            head_ms,
            blocks: RwLock::new(blocks),
            head: Mutex::new(head),
        })
    }

    pub fn appender(&self) -> Appender<'_> {
        Appender {
            store: self,
            staged: Vec::new(),
            now_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Append a batch of samples atomically: either all of them become
    /// visible to queries, or none.
    pub fn append_samples(&self, samples: Vec<Sample>) -> Result<(), StorageError> {
        let mut app = self.appender();
        let mut staged = Ok(());
        for Sample {
            metric,
            labels,
            timestamp_ms,
            value,
        } in samples
        {
            if let Err(err) = app.append(&metric, labels, timestamp_ms, value) {
                staged = Err(err);
                break;
            }
        }
        match staged {
            Ok(()) => app.commit(),
            Err(err) => {
                app.rollback();
                Err(err)
            }
        }
    }

    pub(crate) fn lock_head(&self) -> std::sync::MutexGuard<'_, Head> {
        self.head.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn commit_batch(&self, staged: Vec<Sample>) -> Result<(), StorageError> {
        if staged.is_empty() {
            return Ok(());
        }
        let mut head = self.lock_head();
        // The batch is durable before it becomes visible; a failed WAL
        // write rolls the whole batch back.
        head.wal.append_batch(&staged)?;
        for sample in staged {
            Self::route_to_head(&mut head, sample, self.head_ms);
        }
        Ok(())
    }

    fn route_to_head(head: &mut Head, sample: Sample, head_ms: i64) {
        let key = series_key(&sample.metric, &sample.labels);
        let min_time = *head
            .min_time
            .get_or_insert_with(|| align_down(sample.timestamp_ms, head_ms));

        if sample.timestamp_ms < min_time {
            Self::push_ooo(head, key, sample);
            return;
        }

        let last = head
            .series
            .get(&key)
            .and_then(|s| s.samples.last().copied());
        match last {
            Some((last_t, _)) if sample.timestamp_ms < last_t => {
                Self::push_ooo(head, key, sample);
            }
            Some((last_t, _)) => {
                if let Some(series) = head.series.get_mut(&key) {
                    if sample.timestamp_ms == last_t {
                        if let Some(slot) = series.samples.last_mut() {
                            slot.1 = sample.value;
                        }
                    } else {
                        series.samples.push((sample.timestamp_ms, sample.value));
                    }
                }
            }
            None => {
                head.series.insert(
                    key,
                    MemSeries {
                        metric: sample.metric,
                        labels: sample.labels,
                        samples: vec![(sample.timestamp_ms, sample.value)],
                    },
                );
            }
        }
    }

    fn push_ooo(head: &mut Head, key: String, sample: Sample) {
        let series = head.ooo.entry(key).or_insert_with(|| MemSeries {
            metric: sample.metric.clone(),
            labels: sample.labels.clone(),
            samples: Vec::new(),
        });
        series.samples.push((sample.timestamp_ms, sample.value));
    }

    /// Compact finished head ranges to disk, merge the OOO buffer, drop
    /// blocks behind the retention horizon and truncate the WAL.
    pub fn flush(&self) -> Result<(), StorageError> {
        debug!("triggering manual compaction (flush)");
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut head = self.lock_head();

        let mut groups: HashMap<i64, HashMap<String, MemSeries>> = HashMap::new();

        // Everything older than the range holding the newest sample has
        // seen its head duration elapse and moves to disk.
        let newest = head
            .series
            .values()
            .filter_map(|s| s.samples.last().map(|(t, _)| *t))
            .max();
        if let Some(newest) = newest {
            let current_start = align_down(newest, self.head_ms);
            if head.min_time.is_some_and(|mt| mt < current_start) {
                for (key, series) in head.series.iter_mut() {
                    let split = series.samples.partition_point(|(t, _)| *t < current_start);
                    if split > 0 {
                        let older: Vec<(i64, f64)> = series.samples.drain(..split).collect();
                        Self::group_samples(
                            &mut groups,
                            key,
                            &series.metric,
                            &series.labels,
                            older,
                            self.partition_ms,
                        );
                    }
                }
                head.series.retain(|_, s| !s.samples.is_empty());
                head.min_time = Some(current_start);
            }
        }

        let ooo = std::mem::take(&mut head.ooo);
        for (key, series) in ooo {
            Self::group_samples(
                &mut groups,
                &key,
                &series.metric,
                &series.labels,
                series.samples,
                self.partition_ms,
            );
        }

        self.persist_groups(groups)?;
        self.enforce_retention(now_ms)?;

        let remaining = Self::snapshot_samples(&head);
        head.wal.reset(&remaining)?;
        Ok(())
    }

    /// Merge the OOO buffer into historical blocks without touching the
    /// head. Entry point for bulk importers between chunks.
    pub fn compact_ooo(&self) -> Result<(), StorageError> {
        debug!("triggering manual compaction (ooo)");
        let mut head = self.lock_head();
        if head.ooo.is_empty() {
            return Ok(());
        }

        let mut groups: HashMap<i64, HashMap<String, MemSeries>> = HashMap::new();
        let ooo = std::mem::take(&mut head.ooo);
        for (key, series) in ooo {
            Self::group_samples(
                &mut groups,
                &key,
                &series.metric,
                &series.labels,
                series.samples,
                self.partition_ms,
            );
        }
        self.persist_groups(groups)?;

        let remaining = Self::snapshot_samples(&head);
        head.wal.reset(&remaining)?;
        Ok(())
    }

    /// Chunk boundary hook for the historical importer.
    pub fn checkpoint(&self) -> Result<(), StorageError> {
        debug!("triggering manual compaction (checkpoint)");
        self.compact_ooo()
    }

    pub fn close(&self) -> Result<(), StorageError> {
        info!("closing time-series store");
        self.flush()
    }

    fn group_samples(
        groups: &mut HashMap<i64, HashMap<String, MemSeries>>,
        key: &str,
        metric: &str,
        labels: &GridPulseLabels,
        samples: Vec<(i64, f64)>,
        partition_ms: i64,
    ) {
        for (t, v) in samples {
            let range_start = align_down(t, partition_ms);
            let series = groups
                .entry(range_start)
                .or_default()
                .entry(key.to_string())
                .or_insert_with(|| MemSeries {
                    metric: metric.to_string(),
                    labels: labels.clone(),
                    samples: Vec::new(),
                });
            series.samples.push((t, v));
        }
    }

    fn persist_groups(
        &self,
        groups: HashMap<i64, HashMap<String, MemSeries>>,
    ) -> Result<(), StorageError> {
        if groups.is_empty() {
            return Ok(());
        }
        let mut blocks = self
            .blocks
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for (range_start, mut series_map) in groups {
            let range_end = range_start + self.partition_ms;

            // Merge with an existing block of the same range; its samples
            // go first so later writes win on duplicate timestamps.
            let existing = blocks.iter().position(|b| b.meta.min_time == range_start);
            if let Some(idx) = existing {
                for stored in blocks[idx].read_series()? {
                    let labels = GridPulseLabels::from_iter(stored.labels.clone());
                    let key = series_key(&stored.metric, &labels);
                    match series_map.get_mut(&key) {
                        Some(series) => {
                            let mut merged = stored.samples;
                            merged.append(&mut series.samples);
                            series.samples = merged;
                        }
                        None => {
                            series_map.insert(
                                key,
                                MemSeries {
                                    metric: stored.metric,
                                    labels,
                                    samples: stored.samples,
                                },
                            );
                        }
                    }
                }
            }

            let mut stored: Vec<(String, StoredSeries)> = series_map
                .into_iter()
                .map(|(key, mut series)| {
                    sort_dedup(&mut series.samples);
                    (
                        key,
                        StoredSeries {
                            metric: series.metric,
                            labels: series.labels.into_iter().collect(),
                            samples: series.samples,
                        },
                    )
                })
                .collect();
            stored.sort_by(|a, b| a.0.cmp(&b.0));
            let stored: Vec<StoredSeries> = stored.into_iter().map(|(_, s)| s).collect();

            debug!(
                range_start,
                range_end,
                series = stored.len(),
                "writing block"
            );
            let written = Arc::new(Block::write(&self.path, range_start, range_end, &stored)?);
            match existing {
                Some(idx) => blocks[idx] = written,
                None => blocks.push(written),
            }
        }
        blocks.sort_by_key(|b| b.meta.min_time);
        Ok(())
    }

    fn enforce_retention(&self, now_ms: i64) -> Result<(), StorageError> {
        if self.retention_ms == 0 {
            return Ok(());
        }
        let horizon = now_ms - self.retention_ms;
        let mut blocks = self
            .blocks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut kept = Vec::with_capacity(blocks.len());
        for b in blocks.drain(..) {
            if b.meta.max_time < horizon {
                info!(
                    min_time = b.meta.min_time,
                    max_time = b.meta.max_time,
                    "dropping block behind retention horizon"
                );
                if let Err(err) = b.remove() {
                    warn!(%err, "failed to remove expired block");
                }
            } else {
                kept.push(b);
            }
        }
        *blocks = kept;
        Ok(())
    }

    fn snapshot_samples(head: &Head) -> Vec<Sample> {
        let mut out = Vec::new();
        for series in head.series.values().chain(head.ooo.values()) {
            for (t, v) in &series.samples {
                out.push(Sample {
                    metric: series.metric.clone(),
                    labels: series.labels.clone(),
                    timestamp_ms: *t,
                    value: *v,
                });
            }
        }
        out
    }
}

/// Batched appender. Samples are validated and staged by [`append`];
/// nothing is visible until [`commit`], and [`rollback`] discards the
/// whole batch.
///
/// [`append`]: Appender::append
/// [`commit`]: Appender::commit
/// [`rollback`]: Appender::rollback
pub struct Appender<'a> {
    store: &'a Store,
    staged: Vec<Sample>,
    now_ms: i64,
}

impl Appender<'_> {
    pub fn append(
        &mut self,
        metric: &str,
        labels: GridPulseLabels,
        timestamp_ms: i64,
        value: f64,
    ) -> Result<(), StorageError> {
        if metric.is_empty() {
            return Err(StorageError::BadLabel("empty metric name".to_string()));
        }
        if metric.contains('\u{0}') {
            return Err(StorageError::BadLabel(format!(
                "metric name contains NUL: {:?}",
                metric
            )));
        }
        let mut clean = GridPulseLabels::new();
        for (name, val) in labels {
            // Empty-valued labels are dropped at ingest.
            if val.is_empty() {
                continue;
            }
            if name.is_empty() || name.contains('\u{0}') || val.contains('\u{0}') {
                return Err(StorageError::BadLabel(format!(
                    "unencodable label pair ({:?}, {:?})",
                    name, val
                )));
            }
            clean.push((name, val));
        }

        if self.store.retention_ms > 0
            && timestamp_ms < self.now_ms - (self.store.retention_ms + OOO_WINDOW_MS)
        {
            return Err(StorageError::OutOfWindow {
                metric: metric.to_string(),
                timestamp_ms,
            });
        }

        self.staged.push(Sample {
            metric: metric.to_string(),
            labels: clean,
            timestamp_ms,
            value,
        });
        Ok(())
    }

    pub fn append_if_set(
        &mut self,
        metric: &str,
        labels: GridPulseLabels,
        timestamp_ms: i64,
        value: Option<f64>,
    ) -> Result<(), StorageError> {
        match value {
            Some(v) => self.append(metric, labels, timestamp_ms, v),
            None => Ok(()),
        }
    }

    pub fn commit(self) -> Result<(), StorageError> {
        self.store.commit_batch(self.staged)
    }

    pub fn rollback(self) {
        // Staged samples are simply dropped.
    }
}
