use super::GridPulseLabels;
use serde::{Deserialize, Serialize};

/// A single observation on its way into the storage engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: String,
    pub labels: GridPulseLabels,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(
        metric: impl Into<String>,
        labels: GridPulseLabels,
        timestamp_ms: i64,
        value: f64,
    ) -> Self {
        Self {
            metric: metric.into(),
            labels,
            timestamp_ms,
            value,
        }
    }
}

/// A query result point. Timestamps are seconds since the Unix epoch on
/// the query surface, matching what the web UI consumes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    #[serde(rename = "t")]
    pub timestamp: i64,
    #[serde(rename = "v")]
    pub value: f64,
}
