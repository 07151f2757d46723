//! Typed view of the gateway's `config.json`, reduced to the site and
//! tariff subtrees the rate evaluator needs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfigResponse {
    pub vin: String,
    pub site_info: SiteInfo,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteInfo {
    pub site_name: String,
    pub timezone: String,
    pub tariff_content: TariffContent,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TariffContent {
    pub code: String,
    pub utility: String,
    pub name: String,
    /// Season name -> calendar window and time-of-use periods.
    pub seasons: HashMap<String, Season>,
    /// Season name -> period name -> price in USD per kWh.
    pub energy_charges: HashMap<String, HashMap<String, f64>>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Season {
    #[serde(rename = "fromMonth")]
    pub from_month: u32,
    #[serde(rename = "fromDay")]
    pub from_day: u32,
    #[serde(rename = "toMonth")]
    pub to_month: u32,
    #[serde(rename = "toDay")]
    pub to_day: u32,
    /// Period name -> windows. A season usually has ON_PEAK/OFF_PEAK
    /// style periods, each with one or more windows.
    pub tou_periods: HashMap<String, Vec<TouPeriod>>,
}

/// One (day-of-week, time-of-day) window. Days follow the device's
/// convention of 0 = Sunday through 6 = Saturday and the day range is a
/// plain inclusive span; only the minute range may wrap past midnight.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TouPeriod {
    #[serde(rename = "fromDayOfWeek")]
    pub from_day_of_week: u32,
    #[serde(rename = "toDayOfWeek")]
    pub to_day_of_week: u32,
    #[serde(rename = "fromHour")]
    pub from_hour: u32,
    #[serde(rename = "fromMinute")]
    pub from_minute: u32,
    #[serde(rename = "toHour")]
    pub to_hour: u32,
    #[serde(rename = "toMinute")]
    pub to_minute: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tariff_tree() {
        let raw = r#"{
            "vin": "1232100-00-E--TG123456789ABC",
            "site_info": {
                "site_name": "Home",
                "tariff_content": {
                    "code": "utility:plan-tou",
                    "utility": "Utility Co",
                    "seasons": {
                        "SUMMER": {
                            "fromMonth": 6, "fromDay": 1, "toMonth": 9, "toDay": 30,
                            "tou_periods": {
                                "ON_PEAK": [{"fromDayOfWeek": 1, "toDayOfWeek": 5, "fromHour": 16, "fromMinute": 0, "toHour": 21, "toMinute": 0}]
                            }
                        }
                    },
                    "energy_charges": {"SUMMER": {"ON_PEAK": 0.42, "OFF_PEAK": 0.18}}
                }
            }
        }"#;
        let config: SiteConfigResponse = serde_json::from_str(raw).unwrap();
        let tariff = &config.site_info.tariff_content;
        assert_eq!(tariff.code, "utility:plan-tou");
        assert_eq!(tariff.seasons["SUMMER"].from_month, 6);
        assert_eq!(tariff.seasons["SUMMER"].tou_periods["ON_PEAK"][0].from_hour, 16);
        assert_eq!(tariff.energy_charges["SUMMER"]["ON_PEAK"], 0.42);
    }
}
