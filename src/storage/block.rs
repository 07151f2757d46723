//! Immutable on-disk partitions.
//!
//! A block directory is named `block-<t0>-<t1>` for the half-open
//! millisecond range `[t0, t1)` and contains a `meta.json` plus a
//! gzip-compressed `series.jsonl.gz` with one JSON line per series.
//! Blocks are written once, replaced atomically on merge, and removed
//! whole when they fall behind the retention horizon.

use super::error::StorageError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const META_FILE: &str = "meta.json";
const SERIES_FILE: &str = "series.jsonl.gz";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMeta {
    /// Inclusive lower bound of the partition range, in milliseconds.
    pub min_time: i64,
    /// Exclusive upper bound of the partition range, in milliseconds.
    pub max_time: i64,
    pub series_count: usize,
    pub sample_count: usize,
}

/// One persisted series: metric, label pairs, and (timestamp, value)
/// samples sorted ascending with unique timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSeries {
    pub metric: String,
    pub labels: Vec<(String, String)>,
    pub samples: Vec<(i64, f64)>,
}

#[derive(Debug)]
pub struct Block {
    pub meta: BlockMeta,
    pub dir: PathBuf,
}

impl Block {
    /// Directory name for a partition range.
    pub fn dir_name(min_time: i64, max_time: i64) -> String {
        format!("block-{}-{}", min_time, max_time)
    }

    pub fn open(dir: PathBuf) -> Result<Self, StorageError> {
        let meta_path = dir.join(META_FILE);
        let raw = fs::read(&meta_path).map_err(StorageError::from_io)?;
        let meta: BlockMeta = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::corrupted(&dir, format!("bad {}: {}", META_FILE, e)))?;
        Ok(Self { meta, dir })
    }

    pub fn overlaps(&self, start_ms: i64, end_ms: i64) -> bool {
        self.meta.min_time <= end_ms && start_ms < self.meta.max_time
    }

    /// Read every series of the block. Queries filter the result; the
    /// block itself is oblivious to metrics and labels.
    pub fn read_series(&self) -> Result<Vec<StoredSeries>, StorageError> {
        let path = self.dir.join(SERIES_FILE);
        let file = File::open(&path).map_err(StorageError::from_io)?;
        let reader = BufReader::new(GzDecoder::new(file));
        let mut series = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(StorageError::from_io)?;
            if line.is_empty() {
                continue;
            }
            let one: StoredSeries = serde_json::from_str(&line)
                .map_err(|e| StorageError::corrupted(&self.dir, e.to_string()))?;
            series.push(one);
        }
        Ok(series)
    }

    /// Write a new block directory for `[min_time, max_time)`, replacing
    /// any existing directory of the same range. The write goes to a
    /// temporary sibling first so a crash never leaves a half-written
    /// block under the final name.
    pub fn write(
        parent: &Path,
        min_time: i64,
        max_time: i64,
        series: &[StoredSeries],
    ) -> Result<Self, StorageError> {
        let final_dir = parent.join(Self::dir_name(min_time, max_time));
        let tmp_dir = parent.join(format!("{}.tmp", Self::dir_name(min_time, max_time)));
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir).map_err(StorageError::from_io)?;
        }
        fs::create_dir_all(&tmp_dir).map_err(StorageError::from_io)?;

        let sample_count = series.iter().map(|s| s.samples.len()).sum();
        let meta = BlockMeta {
            min_time,
            max_time,
            series_count: series.len(),
            sample_count,
        };

        let meta_raw = serde_json::to_vec_pretty(&meta)
            .map_err(|e| StorageError::BadInput(e.to_string()))?;
        fs::write(tmp_dir.join(META_FILE), meta_raw).map_err(StorageError::from_io)?;

        let file = File::create(tmp_dir.join(SERIES_FILE)).map_err(StorageError::from_io)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        for one in series {
            let line =
                serde_json::to_string(one).map_err(|e| StorageError::BadInput(e.to_string()))?;
            encoder.write_all(line.as_bytes()).map_err(StorageError::from_io)?;
            encoder.write_all(b"\n").map_err(StorageError::from_io)?;
        }
        let mut inner = encoder.finish().map_err(StorageError::from_io)?;
        inner.flush().map_err(StorageError::from_io)?;

        if final_dir.exists() {
            Self::remove_dir(&final_dir)?;
        }
        fs::rename(&tmp_dir, &final_dir).map_err(StorageError::from_io)?;

        Ok(Self {
            meta,
            dir: final_dir,
        })
    }

    /// Rename-then-delete so a concurrent reader never sees a
    /// half-deleted block under the canonical name.
    pub fn remove_dir(dir: &Path) -> Result<(), StorageError> {
        let mut deleted = dir.as_os_str().to_owned();
        deleted.push(".deleted");
        let deleted = PathBuf::from(deleted);
        fs::rename(dir, &deleted).map_err(StorageError::from_io)?;
        fs::remove_dir_all(&deleted).map_err(StorageError::from_io)?;
        Ok(())
    }

    pub fn remove(&self) -> Result<(), StorageError> {
        Self::remove_dir(&self.dir)
    }
}

/// List the block directories under a data path, ignoring anything that
/// is not a finished block (tmp and deleted leftovers are cleaned up).
pub fn list_blocks(parent: &Path) -> Result<Vec<Block>, StorageError> {
    let mut blocks = Vec::new();
    for entry in fs::read_dir(parent).map_err(StorageError::from_io)? {
        let entry = entry.map_err(StorageError::from_io)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if name.ends_with(".tmp") || name.ends_with(".deleted") {
            tracing::warn!(block = %name, "removing leftover block directory");
            fs::remove_dir_all(&path).map_err(StorageError::from_io)?;
            continue;
        }
        if name.starts_with("block-") {
            blocks.push(Block::open(path)?);
        }
    }
    blocks.sort_by_key(|b| b.meta.min_time);
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_series() -> Vec<StoredSeries> {
        vec![
            StoredSeries {
                metric: "power_watts".to_string(),
                labels: vec![("site".to_string(), "load".to_string())],
                samples: vec![(1000, 120.0), (2000, 140.0)],
            },
            StoredSeries {
                metric: "voltage_volts".to_string(),
                labels: vec![],
                samples: vec![(1500, 240.1)],
            },
        ]
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let block = Block::write(dir.path(), 0, 7_200_000, &sample_series()).unwrap();
        assert_eq!(block.meta.series_count, 2);
        assert_eq!(block.meta.sample_count, 3);

        let reopened = Block::open(block.dir.clone()).unwrap();
        let series = reopened.read_series().unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].metric, "power_watts");
        assert_eq!(series[0].samples, vec![(1000, 120.0), (2000, 140.0)]);
    }

    #[test]
    fn test_overlaps() {
        let dir = tempfile::tempdir().unwrap();
        let block = Block::write(dir.path(), 10_000, 20_000, &[]).unwrap();
        assert!(block.overlaps(15_000, 25_000));
        assert!(block.overlaps(0, 10_000));
        assert!(!block.overlaps(20_000, 30_000));
        assert!(!block.overlaps(0, 9_999));
    }

    #[test]
    fn test_list_blocks_skips_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        Block::write(dir.path(), 0, 1000, &[]).unwrap();
        Block::write(dir.path(), 1000, 2000, &[]).unwrap();
        std::fs::create_dir(dir.path().join("block-9-10.tmp")).unwrap();
        std::fs::create_dir(dir.path().join("wal-unrelated")).unwrap();

        let blocks = list_blocks(dir.path()).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].meta.min_time, 0);
        assert_eq!(blocks[1].meta.min_time, 1000);
        assert!(!dir.path().join("block-9-10.tmp").exists());
    }

    #[test]
    fn test_replace_existing_range() {
        let dir = tempfile::tempdir().unwrap();
        Block::write(dir.path(), 0, 1000, &sample_series()).unwrap();
        let replaced = Block::write(dir.path(), 0, 1000, &sample_series()[..1]).unwrap();
        assert_eq!(replaced.meta.series_count, 1);
        let blocks = list_blocks(dir.path()).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].meta.series_count, 1);
    }
}
