//! System state-of-energy from the legacy API.

use super::Collector;
use crate::datamodel::BatteryReading;
use crate::gateway::GatewayClient;
use crate::storage::Store;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct SoeResponse {
    #[serde(default)]
    percentage: f64,
}

pub struct SoeCollector {
    gateway: Arc<GatewayClient>,
}

impl SoeCollector {
    pub fn new(gateway: Arc<GatewayClient>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Collector for SoeCollector {
    fn name(&self) -> &'static str {
        "SoeCollector"
    }

    async fn collect(&self, store: &Store) -> Result<String> {
        let raw = self
            .gateway
            .api_request(Method::GET, "system_status/soe")
            .await
            .context("failed to get soe")?;
        let soe: SoeResponse = serde_json::from_slice(&raw).context("failed to parse soe")?;

        let now_ms = (chrono::Utc::now().timestamp_millis() / 1000) * 1000;
        store.insert_battery_readings(&[BatteryReading {
            soe: Some(soe.percentage),
            ..BatteryReading::at(now_ms, -1)
        }])?;

        Ok(format!("System SOE: {:.1}%", soe.percentage))
    }
}
