//! Write-ahead log for the head block.
//!
//! One JSON line per committed batch. The log is replayed on open and
//! rewritten as a single snapshot line whenever the head is compacted,
//! so it only ever covers data that is not yet in an immutable block.

use super::error::StorageError;
use crate::datamodel::{GridPulseLabels, Sample};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const WAL_FILE: &str = "wal.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct WalSample {
    m: String,
    l: Vec<(String, String)>,
    t: i64,
    v: f64,
}

impl From<&Sample> for WalSample {
    fn from(s: &Sample) -> Self {
        Self {
            m: s.metric.clone(),
            l: s.labels.iter().cloned().collect(),
            t: s.timestamp_ms,
            v: s.value,
        }
    }
}

impl From<WalSample> for Sample {
    fn from(w: WalSample) -> Self {
        Sample {
            metric: w.m,
            labels: GridPulseLabels::from_iter(w.l),
            timestamp_ms: w.t,
            value: w.v,
        }
    }
}

#[derive(Debug)]
pub struct Wal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Wal {
    /// Replay any existing log, then open it for appending. A torn final
    /// line (crash mid-write) is dropped with a warning.
    pub fn open(dir: &Path) -> Result<(Self, Vec<Sample>), StorageError> {
        let path = dir.join(WAL_FILE);
        let mut replayed = Vec::new();

        if path.exists() {
            let file = File::open(&path).map_err(StorageError::from_io)?;
            for line in BufReader::new(file).lines() {
                let line = line.map_err(StorageError::from_io)?;
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Vec<WalSample>>(&line) {
                    Ok(batch) => replayed.extend(batch.into_iter().map(Sample::from)),
                    Err(err) => {
                        tracing::warn!(%err, "dropping torn write-ahead log entry");
                        break;
                    }
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(StorageError::from_io)?;
        Ok((
            Self {
                path,
                writer: BufWriter::new(file),
            },
            replayed,
        ))
    }

    /// Durably record one batch before it becomes visible in the head.
    pub fn append_batch(&mut self, samples: &[Sample]) -> Result<(), StorageError> {
        let entries: Vec<WalSample> = samples.iter().map(WalSample::from).collect();
        let line =
            serde_json::to_string(&entries).map_err(|e| StorageError::BadInput(e.to_string()))?;
        self.writer
            .write_all(line.as_bytes())
            .map_err(StorageError::from_io)?;
        self.writer.write_all(b"\n").map_err(StorageError::from_io)?;
        self.writer.flush().map_err(StorageError::from_io)?;
        self.writer
            .get_ref()
            .sync_data()
            .map_err(StorageError::from_io)?;
        Ok(())
    }

    /// Replace the log with a snapshot of the samples still living in the
    /// head and the out-of-order buffer.
    pub fn reset(&mut self, remaining: &[Sample]) -> Result<(), StorageError> {
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let file = File::create(&tmp).map_err(StorageError::from_io)?;
            let mut writer = BufWriter::new(file);
            if !remaining.is_empty() {
                let entries: Vec<WalSample> = remaining.iter().map(WalSample::from).collect();
                let line = serde_json::to_string(&entries)
                    .map_err(|e| StorageError::BadInput(e.to_string()))?;
                writer
                    .write_all(line.as_bytes())
                    .map_err(StorageError::from_io)?;
                writer.write_all(b"\n").map_err(StorageError::from_io)?;
            }
            writer.flush().map_err(StorageError::from_io)?;
            writer
                .get_ref()
                .sync_data()
                .map_err(StorageError::from_io)?;
        }
        fs::rename(&tmp, &self.path).map_err(StorageError::from_io)?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(StorageError::from_io)?;
        self.writer = BufWriter::new(file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::GridPulseLabelsExt;

    fn sample(metric: &str, t: i64, v: f64) -> Sample {
        Sample::new(
            metric,
            GridPulseLabels::from_pairs([("site", "load")]),
            t,
            v,
        )
    }

    #[test]
    fn test_replay_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (mut wal, replayed) = Wal::open(dir.path()).unwrap();
            assert!(replayed.is_empty());
            wal.append_batch(&[sample("power_watts", 1000, 5.0)]).unwrap();
            wal.append_batch(&[sample("power_watts", 2000, 6.0), sample("voltage_volts", 2000, 240.0)])
                .unwrap();
        }
        let (_, replayed) = Wal::open(dir.path()).unwrap();
        assert_eq!(replayed.len(), 3);
        assert_eq!(replayed[0].timestamp_ms, 1000);
        assert_eq!(replayed[2].metric, "voltage_volts");
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (mut wal, _) = Wal::open(dir.path()).unwrap();
            wal.append_batch(&[sample("power_watts", 1000, 5.0)]).unwrap();
        }
        // Simulate a crash mid-write.
        let path = dir.path().join("wal.jsonl");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("[{\"m\":\"power_wat");
        std::fs::write(&path, content).unwrap();

        let (_, replayed) = Wal::open(dir.path()).unwrap();
        assert_eq!(replayed.len(), 1);
    }

    #[test]
    fn test_reset_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let (mut wal, _) = Wal::open(dir.path()).unwrap();
        wal.append_batch(&[sample("power_watts", 1000, 5.0)]).unwrap();
        wal.append_batch(&[sample("power_watts", 2000, 6.0)]).unwrap();
        wal.reset(&[sample("power_watts", 2000, 6.0)]).unwrap();
        wal.append_batch(&[sample("power_watts", 3000, 7.0)]).unwrap();

        let (_, replayed) = Wal::open(dir.path()).unwrap();
        let times: Vec<i64> = replayed.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(times, vec![2000, 3000]);
    }
}
