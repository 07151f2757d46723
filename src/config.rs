use crate::storage::StoreOptions;
use anyhow::{bail, Context, Error, Result};
use confique::Config;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

#[derive(Debug, Config)]
pub struct GridPulseConfig {
    /// Gateway base URL; the device lives on its own network interface.
    #[config(env = "GRIDPULSE_ENDPOINT", default = "https://192.168.91.1/")]
    pub endpoint: String,

    /// Installer password used for both API dialects.
    #[config(env = "GRIDPULSE_PASSWORD", default = "")]
    pub password: String,

    /// Address the external HTTP layer binds to.
    #[config(env = "GRIDPULSE_LISTEN", default = "0.0.0.0:8080")]
    pub listen: String,

    /// Seconds between collection cycles.
    #[config(env = "GRIDPULSE_COLLECTION_INTERVAL", default = 30)]
    pub collection_interval: u64,

    #[config(env = "GRIDPULSE_LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Run without the polling scheduler (queries and imports only).
    #[config(env = "GRIDPULSE_NO_COLLECTOR", default = false)]
    pub no_collector: bool,

    #[config(nested)]
    pub storage: StorageSection,
}

#[derive(Debug, Config)]
pub struct StorageSection {
    #[config(env = "GRIDPULSE_STORAGE_PATH", default = "./data")]
    pub path: String,

    /// Maximum age of persisted data as a duration string; "0" keeps
    /// everything.
    #[config(env = "GRIDPULSE_STORAGE_RETENTION", default = "0")]
    pub retention: String,

    /// On-disk partition duration.
    #[config(env = "GRIDPULSE_STORAGE_PARTITION", default = "2h")]
    pub partition: String,
}

impl GridPulseConfig {
    pub fn load() -> Result<GridPulseConfig, Error> {
        let c = GridPulseConfig::builder()
            .env()
            .file("gridpulse.toml")
            .load()?;

        Ok(c)
    }
}

impl StorageSection {
    pub fn retention(&self) -> Result<Duration> {
        if self.retention.is_empty() || self.retention == "0" {
            return Ok(Duration::ZERO);
        }
        parse_duration(&self.retention).context("invalid storage.retention")
    }

    pub fn partition_duration(&self) -> Result<Duration> {
        if self.partition.is_empty() {
            return Ok(Duration::from_secs(2 * 3600));
        }
        let parsed = parse_duration(&self.partition).context("invalid storage.partition")?;
        if parsed.is_zero() {
            return Ok(Duration::from_secs(2 * 3600));
        }
        Ok(parsed)
    }

    pub fn store_options(&self) -> Result<StoreOptions> {
        Ok(StoreOptions {
            path: PathBuf::from(&self.path),
            retention: self.retention()?,
            partition_duration: self.partition_duration()?,
        })
    }
}

/// Parse duration strings like "45s", "30m", "2h", "90d" or compounds
/// like "1h30m". A bare "0" is the zero duration.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() {
        bail!("empty duration");
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut matched_any = false;

    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            bail!("bad duration string: {:?}", input);
        }
        let amount: u64 = digits.parse()?;
        let unit_secs = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 24 * 3600,
            'w' => 7 * 24 * 3600,
            _ => bail!("unknown duration unit {:?} in {:?}", c, input),
        };
        total += Duration::from_secs(amount * unit_secs);
        digits.clear();
        matched_any = true;
    }

    if !digits.is_empty() || !matched_any {
        bail!("bad duration string: {:?}", input);
    }
    Ok(total)
}

static GRIDPULSE_CONFIG: OnceLock<Arc<GridPulseConfig>> = OnceLock::new();

pub fn get() -> Result<Arc<GridPulseConfig>, Error> {
    GRIDPULSE_CONFIG.get().cloned().ok_or_else(|| {
        Error::msg(
            "Configuration not loaded. Please call load_configuration() before using the configuration",
        )
    })
}

pub fn load_configuration() -> Result<(), Error> {
    // Check if the configuration has already been loaded
    if GRIDPULSE_CONFIG.get().is_some() {
        return Ok(());
    }

    let config = GridPulseConfig::load()?;
    GRIDPULSE_CONFIG.get_or_init(|| Arc::new(config));

    Ok(())
}
