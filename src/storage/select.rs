//! Read path: range queries, downsampling aggregation and series
//! discovery across the immutable blocks, the head and the OOO buffer.

use super::engine::Store;
use super::error::StorageError;
use crate::datamodel::labels::series_key;
use crate::datamodel::{DataPoint, GridPulseLabels, GridPulseLabelsExt};
use chrono::{Local, TimeZone};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

const DAY_SECS: i64 = 24 * 60 * 60;
const LAST_POINT_WINDOW_SECS: i64 = DAY_SECS;
const LAST_TIMESTAMP_WINDOW_SECS: i64 = 30 * DAY_SECS;

/// Gaps larger than this are skipped by the `integral` function so a
/// collector outage does not turn into an energy spike.
const INTEGRAL_MAX_GAP_SECS: i64 = 120;

#[derive(Debug)]
pub(crate) struct GatheredSeries {
    pub labels: GridPulseLabels,
    pub samples: Vec<(i64, f64)>,
}

/// Bucket timestamp for a sample, aligned to the local timezone offset.
/// Integer division truncates toward zero, matching the query surface
/// the web UI was built against.
pub fn bucket_timestamp(t_sec: i64, step: i64, offset_sec: i64) -> i64 {
    ((t_sec + offset_sec) / step) * step - offset_sec
}

fn local_offset_secs(t_sec: i64) -> i64 {
    match Local.timestamp_opt(t_sec, 0) {
        chrono::LocalResult::Single(dt) => dt.offset().local_minus_utc() as i64,
        chrono::LocalResult::Ambiguous(dt, _) => dt.offset().local_minus_utc() as i64,
        chrono::LocalResult::None => 0,
    }
}

fn matches_tags(labels: &GridPulseLabels, tags: &HashMap<String, String>) -> bool {
    tags.iter()
        .filter(|(_, v)| !v.is_empty())
        .all(|(k, v)| labels.get_value(k) == Some(v.as_str()))
}

struct Bucket {
    sum: f64,
    count: u64,
    min: f64,
    max: f64,
}

impl Store {
    /// Collect every matching series with its in-range samples, merged
    /// across blocks, head and OOO buffer, sorted and de-duplicated.
    pub(crate) fn gather(
        &self,
        metric: &str,
        tags: &HashMap<String, String>,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<GatheredSeries>, StorageError> {
        let blocks: Vec<Arc<super::block::Block>> = {
            let guard = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
            guard
                .iter()
                .filter(|b| b.overlaps(start_ms, end_ms))
                .cloned()
                .collect()
        };

        let mut found: HashMap<String, GatheredSeries> = HashMap::new();

        for block in blocks {
            for stored in block.read_series()? {
                if stored.metric != metric {
                    continue;
                }
                let labels = GridPulseLabels::from_iter(stored.labels);
                if !matches_tags(&labels, tags) {
                    continue;
                }
                let key = series_key(&stored.metric, &labels);
                let entry = found.entry(key).or_insert_with(|| GatheredSeries {
                    labels,
                    samples: Vec::new(),
                });
                entry.samples.extend(
                    stored
                        .samples
                        .into_iter()
                        .filter(|(t, _)| *t >= start_ms && *t <= end_ms),
                );
            }
        }

        {
            let head = self.lock_head();
            for series in head.series.values().chain(head.ooo.values()) {
                if series.metric != metric || !matches_tags(&series.labels, tags) {
                    continue;
                }
                let key = series_key(&series.metric, &series.labels);
                let entry = found.entry(key).or_insert_with(|| GatheredSeries {
                    labels: series.labels.clone(),
                    samples: Vec::new(),
                });
                entry.samples.extend(
                    series
                        .samples
                        .iter()
                        .filter(|(t, _)| *t >= start_ms && *t <= end_ms),
                );
            }
        }

        let mut gathered: Vec<GatheredSeries> = found
            .into_values()
            .filter(|s| !s.samples.is_empty())
            .collect();
        for series in gathered.iter_mut() {
            series.samples.sort_by_key(|(t, _)| *t);
            series.samples.dedup_by(|next, prev| {
                if next.0 == prev.0 {
                    prev.1 = next.1;
                    true
                } else {
                    false
                }
            });
        }
        Ok(gathered)
    }

    /// Range query with optional downsampling.
    ///
    /// With `step == 0` the raw samples come back ascending by timestamp.
    /// With `step > 0` samples are grouped into `step`-second buckets
    /// aligned to the local timezone offset and reduced per `function`:
    /// `sum`, `min`, `max`, `delta` (max − min), `integral` (Σ v·Δt over
    /// gaps of at most two minutes), anything else the arithmetic mean.
    /// Results are sorted by (timestamp, value) so ties are deterministic.
    pub fn select(
        &self,
        metric: &str,
        tags: &HashMap<String, String>,
        start: i64,
        end: i64,
        step: i64,
        function: &str,
    ) -> Result<Vec<DataPoint>, StorageError> {
        if metric.is_empty() {
            return Err(StorageError::BadInput("metric is required".to_string()));
        }
        if end < start {
            return Err(StorageError::BadInput(format!(
                "end {} before start {}",
                end, start
            )));
        }
        if step < 0 {
            return Err(StorageError::BadInput(format!("negative step {}", step)));
        }

        let gathered = self.gather(metric, tags, start * 1000, end * 1000)?;
        let mut results: Vec<DataPoint> = Vec::new();

        if step == 0 {
            for series in &gathered {
                results.extend(series.samples.iter().map(|(t, v)| DataPoint {
                    timestamp: t / 1000,
                    value: *v,
                }));
            }
        } else {
            let mut buckets: HashMap<i64, Bucket> = HashMap::new();
            for series in &gathered {
                let mut prev_t: i64 = 0;
                for (t_ms, v) in &series.samples {
                    let t_sec = t_ms / 1000;
                    let offset = local_offset_secs(t_sec);
                    let bucket_ts = bucket_timestamp(t_sec, step, offset);

                    let bucket = buckets.entry(bucket_ts).or_insert(Bucket {
                        sum: 0.0,
                        count: 0,
                        min: *v,
                        max: *v,
                    });

                    if function == "integral" {
                        if prev_t > 0 {
                            let dt = (t_ms - prev_t) / 1000;
                            if dt > 0 && dt <= INTEGRAL_MAX_GAP_SECS {
                                bucket.sum += v * dt as f64;
                            }
                        }
                        bucket.count += 1;
                    } else {
                        bucket.sum += v;
                        bucket.count += 1;
                    }

                    if *v < bucket.min {
                        bucket.min = *v;
                    }
                    if *v > bucket.max {
                        bucket.max = *v;
                    }
                    prev_t = *t_ms;
                }
            }

            for (t, bucket) in buckets {
                let value = match function {
                    "sum" => bucket.sum,
                    // Already integrated, in value-seconds.
                    "integral" => bucket.sum,
                    "min" => bucket.min,
                    "max" => bucket.max,
                    "delta" => bucket.max - bucket.min,
                    _ => bucket.sum / bucket.count as f64,
                };
                results.push(DataPoint {
                    timestamp: t,
                    value,
                });
            }
        }

        results.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.value.total_cmp(&b.value))
        });
        Ok(results)
    }

    /// Last known timestamp for any series of `metric` within the last
    /// thirty days, in seconds. Zero when the metric has no samples.
    pub fn last_timestamp(&self, metric: &str) -> Result<i64, StorageError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let start_ms = now_ms - LAST_TIMESTAMP_WINDOW_SECS * 1000;
        let gathered = self.gather(metric, &HashMap::new(), start_ms, now_ms)?;
        let last = gathered
            .iter()
            .filter_map(|s| s.samples.last().map(|(t, _)| *t))
            .max()
            .unwrap_or(0);
        Ok(last / 1000)
    }

    /// Most recent sample matching every tag, looking back 24 hours so
    /// a gap does not hide the series.
    pub fn last_point(
        &self,
        metric: &str,
        tags: &HashMap<String, String>,
    ) -> Result<Option<DataPoint>, StorageError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let start_ms = now_ms - LAST_POINT_WINDOW_SECS * 1000;
        let gathered = self.gather(metric, tags, start_ms, now_ms)?;
        let last = gathered
            .iter()
            .filter_map(|s| s.samples.last().copied())
            .max_by_key(|(t, _)| *t);
        Ok(last.map(|(t, v)| DataPoint {
            timestamp: t / 1000,
            value: v,
        }))
    }

    /// Distinct label sets seen for `metric` in the last 24 hours.
    pub fn series(&self, metric: &str) -> Result<Vec<GridPulseLabels>, StorageError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let start_ms = now_ms - LAST_POINT_WINDOW_SECS * 1000;
        let gathered = self.gather(metric, &HashMap::new(), start_ms, now_ms)?;
        Ok(gathered.into_iter().map(|s| s.labels).collect())
    }

    /// Every metric with its label sets over the last thirty days, keyed
    /// by the canonical sorted `name=value,...` string.
    pub fn all_series(
        &self,
    ) -> Result<HashMap<String, HashMap<String, GridPulseLabels>>, StorageError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let start_ms = now_ms - LAST_TIMESTAMP_WINDOW_SECS * 1000;

        let mut result: HashMap<String, HashMap<String, GridPulseLabels>> = HashMap::new();

        let blocks: Vec<Arc<super::block::Block>> = {
            let guard = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
            guard
                .iter()
                .filter(|b| b.overlaps(start_ms, now_ms))
                .cloned()
                .collect()
        };
        for block in blocks {
            for stored in block.read_series()? {
                if !stored.samples.iter().any(|(t, _)| *t >= start_ms) {
                    continue;
                }
                let labels = GridPulseLabels::from_iter(stored.labels);
                result
                    .entry(stored.metric)
                    .or_default()
                    .insert(labels.canonical_string(), labels);
            }
        }

        let head = self.lock_head();
        for series in head.series.values().chain(head.ooo.values()) {
            if !series.samples.iter().any(|(t, _)| *t >= start_ms) {
                continue;
            }
            result
                .entry(series.metric.clone())
                .or_default()
                .insert(series.labels.canonical_string(), series.labels.clone());
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_timestamp_utc() {
        assert_eq!(bucket_timestamp(0, 60, 0), 0);
        assert_eq!(bucket_timestamp(59, 60, 0), 0);
        assert_eq!(bucket_timestamp(60, 60, 0), 60);
        assert_eq!(bucket_timestamp(120, 60, 0), 120);
    }

    #[test]
    fn test_bucket_timestamp_with_offset() {
        // Offset aligned to the step keeps UTC boundaries.
        assert_eq!(bucket_timestamp(0, 3600, 7200), 0);
        assert_eq!(bucket_timestamp(3600, 3600, 7200), 3600);
        // A half-hour offset shifts the boundaries by -offset.
        assert_eq!(bucket_timestamp(0, 3600, 1800), -1800);
        assert_eq!(bucket_timestamp(1799, 3600, 1800), -1800);
        assert_eq!(bucket_timestamp(1800, 3600, 1800), 1800);
    }

    #[test]
    fn test_bucket_timestamp_groups_across_step() {
        // Two samples one step apart never share a bucket.
        let a = bucket_timestamp(0, 3600, 7200);
        let b = bucket_timestamp(3600, 3600, 7200);
        assert_ne!(a, b);
        // With a step spanning both they do.
        let a = bucket_timestamp(0, 7200, 7200);
        let b = bucket_timestamp(3600, 7200, 7200);
        assert_eq!(a, b);
    }
}
