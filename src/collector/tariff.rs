//! Tariff collection: refreshes the site config on an hourly cadence,
//! evaluates the current energy rate each tick, and hosts the shared
//! config cache the HTTP layer reads through.

use super::Collector;
use crate::datamodel::{GridPulseLabels, GridPulseLabelsExt};
use crate::gateway::site_config::{Season, TouPeriod};
use crate::gateway::{GatewayClient, SiteConfigResponse, TariffContent};
use crate::storage::Store;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// How often the collector refetches the config tree from the device.
const CONFIG_REFRESH: Duration = Duration::from_secs(3600);

/// TTL of the shared [`TariffCache`] serving the HTTP layer.
const CACHE_TTL: Duration = Duration::from_secs(15 * 60);

fn in_season(season: &Season, month: u32, day: u32) -> bool {
    // A zeroed window is an empty or unset season entry.
    if season.from_month == 0 {
        return false;
    }
    let start = season.from_month * 100 + season.from_day;
    let end = season.to_month * 100 + season.to_day;
    let curr = month * 100 + day;
    if start <= end {
        curr >= start && curr <= end
    } else {
        // The window wraps the year end.
        curr >= start || curr <= end
    }
}

fn in_window(period: &TouPeriod, dow: u32, curr_min: u32) -> bool {
    if dow < period.from_day_of_week || dow > period.to_day_of_week {
        return false;
    }
    let start_min = period.from_hour * 60 + period.from_minute;
    let end_min = period.to_hour * 60 + period.to_minute;
    if start_min <= end_min {
        curr_min >= start_min && curr_min < end_min
    } else {
        // The window wraps midnight.
        curr_min >= start_min || curr_min < end_min
    }
}

/// The rate and period name in effect at `at` local time, if any.
///
/// Finds the season whose calendar window contains the date, then the
/// first period window containing the (weekday, minute-of-day). Falls
/// back to a flat `ALL`/`ALL` (or `All`/`All`) charge when no period
/// matches.
pub fn current_rate(tariff: &TariffContent, at: NaiveDateTime) -> Option<(f64, String)> {
    let month = at.month();
    let day = at.day();
    let dow = at.weekday().num_days_from_sunday();
    let curr_min = at.hour() * 60 + at.minute();

    for (season_name, season) in &tariff.seasons {
        if !in_season(season, month, day) {
            continue;
        }
        for (period_name, windows) in &season.tou_periods {
            for window in windows {
                if !in_window(window, dow, curr_min) {
                    continue;
                }
                if let Some(rate) = tariff
                    .energy_charges
                    .get(season_name)
                    .and_then(|rates| rates.get(period_name))
                {
                    return Some((*rate, period_name.clone()));
                }
            }
        }
    }

    for key in ["ALL", "All"] {
        if let Some(rate) = tariff.energy_charges.get(key).and_then(|rates| rates.get(key)) {
            if *rate != 0.0 {
                return Some((*rate, "Flat".to_string()));
            }
        }
    }
    None
}

struct CachedConfig {
    fetched_at: Instant,
    config: SiteConfigResponse,
}

pub struct ConfigCollector {
    gateway: Arc<GatewayClient>,
    state: tokio::sync::Mutex<Option<CachedConfig>>,
}

impl ConfigCollector {
    pub fn new(gateway: Arc<GatewayClient>) -> Self {
        Self {
            gateway,
            state: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl Collector for ConfigCollector {
    fn name(&self) -> &'static str {
        "ConfigCollector"
    }

    async fn collect(&self, store: &Store) -> Result<String> {
        let mut state = self.state.lock().await;

        let stale = state
            .as_ref()
            .map_or(true, |c| c.fetched_at.elapsed() > CONFIG_REFRESH);
        if stale {
            let config = self
                .gateway
                .fetch_config()
                .await
                .context("failed to fetch config")?;
            info!(vin = %config.vin, "updated system config");
            *state = Some(CachedConfig {
                fetched_at: Instant::now(),
                config,
            });
        }

        let tariff = match state.as_ref() {
            Some(cached) if !cached.config.site_info.tariff_content.code.is_empty() => {
                &cached.config.site_info.tariff_content
            }
            _ => return Ok("No tariff config available".to_string()),
        };

        let now = Local::now();
        let Some((rate, period)) = current_rate(tariff, now.naive_local()) else {
            return Ok("No active rate found".to_string());
        };

        store.insert(
            "energy_price_usd",
            GridPulseLabels::from_pairs([("period", period.as_str())]),
            rate,
            now.timestamp(),
        )?;

        Ok(format!("Recorded rate ${:.4} ({})", rate, period))
    }
}

/// Injectable time source so the cache can be tested without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Shared config cache for the HTTP layer: read under a shared lock,
/// refreshed under an exclusive lock once the TTL elapses.
pub struct TariffCache<C: Clock = SystemClock> {
    ttl: Duration,
    clock: C,
    cached: tokio::sync::RwLock<Option<(Instant, Arc<SiteConfigResponse>)>>,
}

impl TariffCache {
    pub fn new() -> Self {
        Self::with_clock(SystemClock, CACHE_TTL)
    }
}

impl Default for TariffCache {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> TariffCache<C> {
    pub fn with_clock(clock: C, ttl: Duration) -> Self {
        Self {
            ttl,
            clock,
            cached: tokio::sync::RwLock::new(None),
        }
    }

    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<Arc<SiteConfigResponse>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<SiteConfigResponse>>,
    {
        {
            let cached = self.cached.read().await;
            if let Some((at, config)) = cached.as_ref() {
                if self.clock.now().duration_since(*at) < self.ttl {
                    return Ok(Arc::clone(config));
                }
            }
        }

        let mut cached = self.cached.write().await;
        // Another task may have refreshed while this one waited.
        if let Some((at, config)) = cached.as_ref() {
            if self.clock.now().duration_since(*at) < self.ttl {
                return Ok(Arc::clone(config));
            }
        }

        let config = Arc::new(fetch().await?);
        *cached = Some((self.clock.now(), Arc::clone(&config)));
        Ok(config)
    }
}
