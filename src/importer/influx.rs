//! Minimal client for the external InfluxDB-1.x-dialect time-series
//! service the importer reads from.

use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImportSourceConfig {
    pub host: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub measurements: Vec<String>,
    pub retention_policies: Vec<String>,
}

#[derive(Debug)]
pub struct InfluxClient {
    base: Url,
    user: Option<String>,
    password: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QueryResponse {
    pub results: Vec<QueryResult>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QueryResult {
    pub series: Vec<SeriesResult>,
    pub error: Option<String>,
}

/// One result series: its tag set plus column-indexed rows. The first
/// column is always `time`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeriesResult {
    pub name: String,
    pub tags: HashMap<String, String>,
    pub columns: Vec<String>,
    pub values: Vec<Vec<serde_json::Value>>,
}

impl QueryResponse {
    pub fn error(&self) -> Option<&str> {
        if let Some(err) = &self.error {
            return Some(err);
        }
        self.results.iter().find_map(|r| r.error.as_deref())
    }
}

impl InfluxClient {
    pub fn new(
        host: &str,
        user: &str,
        password: &str,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let base = Url::parse(host).with_context(|| format!("invalid import host: {}", host))?;
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            base,
            user: (!user.is_empty()).then(|| user.to_string()),
            password: (!password.is_empty()).then(|| password.to_string()),
            http: builder.build().context("failed to build import client")?,
        })
    }

    pub async fn ping(&self) -> Result<()> {
        let url = self.base.join("ping")?;
        let response = self.http.get(url).send().await.context("ping failed")?;
        if !response.status().is_success() {
            bail!("ping returned {}", response.status());
        }
        Ok(())
    }

    /// Issue one query. `epoch` selects the timestamp precision of the
    /// result (`ns` for imports).
    pub async fn query(
        &self,
        q: &str,
        database: Option<&str>,
        epoch: Option<&str>,
    ) -> Result<QueryResponse> {
        let url = self.base.join("query")?;
        let mut request = self.http.get(url).query(&[("q", q)]);
        if let Some(db) = database {
            request = request.query(&[("db", db)]);
        }
        if let Some(epoch) = epoch {
            request = request.query(&[("epoch", epoch)]);
        }
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_deref());
        }
        let response = request.send().await.context("query request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("query returned {}", status);
        }
        response
            .json::<QueryResponse>()
            .await
            .context("failed to decode query response")
    }

    /// Verify the configured database exists on the source.
    pub async fn has_database(&self, database: &str) -> Result<bool> {
        let response = self
            .query("SHOW DATABASES", None, None)
            .await
            .context("failed to query databases")?;
        if let Some(err) = response.error() {
            bail!("{}", err);
        }
        let found = response.results.iter().any(|result| {
            result.series.iter().any(|series| {
                series
                    .values
                    .iter()
                    .any(|row| row.first().and_then(|v| v.as_str()) == Some(database))
            })
        });
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_response_decoding() {
        let raw = r#"{
            "results": [{
                "series": [{
                    "name": "soe",
                    "tags": {"host": "gw"},
                    "columns": ["time", "percentage"],
                    "values": [[1700000000000000000, 0.83], [1700000030000000000, 0.84]]
                }]
            }]
        }"#;
        let response: QueryResponse = serde_json::from_str(raw).unwrap();
        assert!(response.error().is_none());
        let series = &response.results[0].series[0];
        assert_eq!(series.name, "soe");
        assert_eq!(series.columns, vec!["time", "percentage"]);
        assert_eq!(series.values.len(), 2);
        assert_eq!(series.tags["host"], "gw");
    }

    #[test]
    fn test_query_response_error_propagation() {
        let raw = r#"{"results": [{"error": "database not found"}]}"#;
        let response: QueryResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.error(), Some("database not found"));
    }
}
