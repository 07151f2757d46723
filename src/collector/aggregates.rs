//! Normalizes the meter aggregates JSON into per-site meter readings,
//! including the virtual import/export sites the dashboard queries.

use super::Collector;
use crate::datamodel::MeterReading;
use crate::gateway::GatewayClient;
use crate::storage::Store;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct MeterAggregate {
    pub instant_power: f64,
    pub instant_reactive_power: f64,
    pub instant_apparent_power: f64,
    pub frequency: f64,
    pub energy_exported: f64,
    pub energy_imported: f64,
    pub instant_average_voltage: f64,
    pub instant_average_current: f64,
    pub v_a_voltage: f64,
    pub v_b_voltage: f64,
    pub v_c_voltage: f64,
}

pub fn normalize_aggregates(
    aggregates: &HashMap<String, MeterAggregate>,
    timestamp_ms: i64,
) -> Vec<MeterReading> {
    let mut readings = Vec::new();
    let now = timestamp_ms;

    for (site, meter) in aggregates {
        let site_name = site.to_lowercase();

        readings.push(MeterReading {
            power: Some(meter.instant_power),
            reactive: Some(meter.instant_reactive_power),
            apparent: Some(meter.instant_apparent_power),
            current: Some(meter.instant_average_current),
            frequency: Some(meter.frequency),
            imported: Some(meter.energy_imported),
            exported: Some(meter.energy_exported),
            ..MeterReading::at(now, site_name.clone())
        });

        for (phase, voltage) in [
            ("1", meter.v_a_voltage),
            ("2", meter.v_b_voltage),
            ("3", meter.v_c_voltage),
        ] {
            if voltage != 0.0 {
                readings.push(MeterReading {
                    phase: Some(phase.to_string()),
                    voltage: Some(voltage),
                    ..MeterReading::at(now, site_name.clone())
                });
            }
        }

        // Virtual sites so positive and negative flows can be queried
        // independently: positive power imports, negative exports.
        if site_name == "site" || site_name == "battery" {
            let (import_val, export_val) = if meter.instant_power > 0.0 {
                (meter.instant_power, 0.0)
            } else {
                (0.0, -meter.instant_power)
            };
            readings.push(MeterReading {
                power: Some(import_val),
                ..MeterReading::at(now, format!("{}_import", site_name))
            });
            readings.push(MeterReading {
                power: Some(export_val),
                ..MeterReading::at(now, format!("{}_export", site_name))
            });
        }
    }

    readings
}

pub struct AggregatesCollector {
    gateway: Arc<GatewayClient>,
}

impl AggregatesCollector {
    pub fn new(gateway: Arc<GatewayClient>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Collector for AggregatesCollector {
    fn name(&self) -> &'static str {
        "AggregatesCollector"
    }

    async fn collect(&self, store: &Store) -> Result<String> {
        let raw = self
            .gateway
            .api_request(Method::GET, "meters/aggregates")
            .await
            .context("failed to get aggregates")?;
        let aggregates: HashMap<String, MeterAggregate> =
            serde_json::from_slice(&raw).context("failed to parse aggregates")?;

        let now_ms = (chrono::Utc::now().timestamp_millis() / 1000) * 1000;
        let readings = normalize_aggregates(&aggregates, now_ms);
        store.insert_meter_readings(&readings)?;

        Ok(format!(
            "Processed {} meter aggregate readings",
            readings.len()
        ))
    }
}
