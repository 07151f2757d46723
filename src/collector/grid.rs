//! Grid connection status as a numeric code plus the grid-services flag.

use super::Collector;
use crate::datamodel::SystemStatus;
use crate::gateway::GatewayClient;
use crate::storage::Store;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use std::sync::Arc;

/// Numeric encoding of the island-state machine. Transitions sit between
/// connected (1) and islanded (0); faults go negative.
pub fn grid_status_code(status: &str) -> f64 {
    match status {
        "SystemGridConnected" => 1.0,
        "SystemIslandedActive" => 0.0,
        "SystemTransitionToGrid" => 0.5,
        "SystemTransitionToIsland" => 0.5,
        "SystemIslandedReady" => 0.1,
        "SystemMicroGridFaulted" => -1.0,
        "SystemWaitForUser" => -2.0,
        _ => 0.0,
    }
}

#[derive(Debug, Deserialize)]
struct GridStatusResponse {
    #[serde(default)]
    grid_status: String,
    #[serde(default)]
    grid_services_active: bool,
}

pub struct GridCollector {
    gateway: Arc<GatewayClient>,
}

impl GridCollector {
    pub fn new(gateway: Arc<GatewayClient>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Collector for GridCollector {
    fn name(&self) -> &'static str {
        "GridCollector"
    }

    async fn collect(&self, store: &Store) -> Result<String> {
        let raw = self
            .gateway
            .api_request(Method::GET, "system_status/grid_status")
            .await
            .context("failed to get grid status")?;
        let status: GridStatusResponse =
            serde_json::from_slice(&raw).context("failed to parse grid status")?;

        let now_ms = (chrono::Utc::now().timestamp_millis() / 1000) * 1000;
        store.insert_system_status(&[SystemStatus {
            timestamp_ms: now_ms,
            grid_status: Some(grid_status_code(&status.grid_status)),
            services_active: Some(status.grid_services_active),
        }])?;

        Ok(format!(
            "Grid Status: {}, Services Active: {}",
            status.grid_status, status.grid_services_active
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_status_codes() {
        assert_eq!(grid_status_code("SystemGridConnected"), 1.0);
        assert_eq!(grid_status_code("SystemIslandedActive"), 0.0);
        assert_eq!(grid_status_code("SystemTransitionToGrid"), 0.5);
        assert_eq!(grid_status_code("SystemIslandedReady"), 0.1);
        assert_eq!(grid_status_code("SystemMicroGridFaulted"), -1.0);
        assert_eq!(grid_status_code("SystemWaitForUser"), -2.0);
        assert_eq!(grid_status_code("SomethingNew"), 0.0);
    }
}
