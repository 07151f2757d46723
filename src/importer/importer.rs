//! Chunked bulk import from the external time-series service into the
//! storage engine, tolerant of out-of-order data.

use super::influx::{ImportSourceConfig, InfluxClient};
use super::mapping::{map_series, ReadingBatch};
use super::ImportError;
use crate::storage::Store;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_MEASUREMENTS: &[&str] = &["http", "alerts", "soe", "vitals", "pwfans", "pwtemps"];
const DEFAULT_RETENTION_POLICIES: &[&str] = &[
    "autogen", "strings", "pwtemps", "vitals", "pod", "pwfans", "alerts",
];

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

struct SourceSeries {
    measurement: String,
    tags: HashMap<String, String>,
    columns: Vec<String>,
    values: Vec<Vec<serde_json::Value>>,
}

pub struct Importer {
    config: ImportSourceConfig,
    store: Arc<Store>,
}

impl Importer {
    pub fn new(mut config: ImportSourceConfig, store: Arc<Store>) -> Self {
        if config.measurements.is_empty() {
            config.measurements = DEFAULT_MEASUREMENTS.iter().map(|s| s.to_string()).collect();
        }
        if config.retention_policies.is_empty() {
            config.retention_policies = DEFAULT_RETENTION_POLICIES
                .iter()
                .map(|s| s.to_string())
                .collect();
        }
        Self { config, store }
    }

    /// Ping the source and verify the configured database exists.
    pub async fn test_connection(&self) -> Result<()> {
        let client = InfluxClient::new(
            &self.config.host,
            &self.config.user,
            &self.config.password,
            Some(TEST_TIMEOUT),
        )
        .context("failed to create client")?;

        client.ping().await.context("ping failed")?;

        let found = client.has_database(&self.config.database).await?;
        if !found {
            return Err(anyhow!("database '{}' not found", self.config.database));
        }
        Ok(())
    }

    /// Import `[start, end)` in day-sized chunks. A failed chunk query is
    /// logged and skipped; a storage error aborts the import. The sink
    /// receives one progress line per chunk and is closed on return.
    pub async fn run_import(
        &self,
        cancel: &CancellationToken,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        progress: mpsc::Sender<String>,
    ) -> Result<(), ImportError> {
        let client = InfluxClient::new(
            &self.config.host,
            &self.config.user,
            &self.config.password,
            None,
        )
        .map_err(ImportError::Source)?;

        let chunk_size = ChronoDuration::hours(24);
        let mut chunk_start = start;
        while chunk_start < end {
            if cancel.is_cancelled() {
                return Err(ImportError::Cancelled);
            }

            let mut chunk_end = chunk_start + chunk_size;
            if chunk_end > end {
                chunk_end = end;
            }

            // The sink has capacity one: the producer advances only when
            // the consumer has read the previous message.
            let _ = progress
                .send(format!(
                    "Processing {} to {}",
                    chunk_start.format("%Y-%m-%d"),
                    chunk_end.format("%Y-%m-%d")
                ))
                .await;

            let mut all_series = Vec::new();
            for rp in &self.config.retention_policies {
                for measurement in &self.config.measurements {
                    let query = format!(
                        "SELECT * FROM \"{}\".\"{}\" WHERE time >= '{}' AND time < '{}' GROUP BY * ORDER BY time ASC",
                        rp,
                        measurement,
                        chunk_start.to_rfc3339_opts(SecondsFormat::Secs, true),
                        chunk_end.to_rfc3339_opts(SecondsFormat::Secs, true),
                    );
                    let response = match client
                        .query(&query, Some(&self.config.database), Some("ns"))
                        .await
                    {
                        Ok(response) => response,
                        Err(err) => {
                            debug!(%err, rp = %rp, measurement = %measurement, "chunk query failed, skipping");
                            continue;
                        }
                    };
                    if response.error().is_some() {
                        continue;
                    }
                    for result in response.results {
                        for series in result.series {
                            all_series.push(SourceSeries {
                                measurement: measurement.clone(),
                                tags: series.tags,
                                columns: series.columns,
                                values: series.values,
                            });
                        }
                    }
                }
            }

            if all_series.is_empty() {
                debug!(
                    start = %chunk_start,
                    end = %chunk_end,
                    "no data found in chunk"
                );
            } else {
                info!(
                    series_count = all_series.len(),
                    start = %chunk_start,
                    end = %chunk_end,
                    "importing data chunk"
                );
                self.ingest_chunk(&all_series)?;
                if let Err(err) = self.store.checkpoint() {
                    warn!(%err, "checkpoint after chunk failed");
                }
            }

            chunk_start = chunk_start + chunk_size;
        }

        info!("import complete, flushing storage");
        self.store.flush()?;
        Ok(())
    }

    fn ingest_chunk(&self, all_series: &[SourceSeries]) -> Result<(), ImportError> {
        let mut batch = ReadingBatch::default();
        for series in all_series {
            map_series(
                &mut batch,
                &series.measurement,
                &series.tags,
                &series.columns,
                &series.values,
            );
        }
        if batch.is_empty() {
            return Ok(());
        }

        debug!(
            meters = batch.meters.len(),
            batteries = batch.batteries.len(),
            inverters = batch.inverters.len(),
            solar = batch.solar.len(),
            environment = batch.environment.len(),
            alerts = batch.alerts.len(),
            "inserting chunk readings"
        );
        self.store.insert_meter_readings(&batch.meters)?;
        self.store.insert_battery_readings(&batch.batteries)?;
        self.store.insert_system_status(&batch.system)?;
        self.store.insert_inverter_readings(&batch.inverters)?;
        self.store.insert_solar_readings(&batch.solar)?;
        self.store.insert_environmental_readings(&batch.environment)?;
        self.store.insert_alerts(&batch.alerts)?;
        Ok(())
    }
}
