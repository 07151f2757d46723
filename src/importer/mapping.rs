//! Column-to-reading routing for imported rows.
//!
//! The source stores one measurement per table with loosely structured
//! column names accumulated over years of exporters. Each non-`time`
//! column is parsed into a float and routed into a reading family by
//! name. A literal `0` usually means "channel not present" and is
//! dropped, except for status-like columns where `0` is a real
//! observation.

use crate::datamodel::{
    Alert, BatteryReading, EnvironmentalReading, InverterKind, InverterReading, MeterReading,
    SolarReading, SystemStatus,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static SOLAR_STRING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z])(\d*)_(Voltage|Current|Power)$").unwrap());
static PW_INDEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^PW(\d+)_").unwrap());
static FAN_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^([A-Z])(\d*)_(actual|target)_rpm$").unwrap());

/// Accumulates readings across every series of one import chunk so each
/// family is inserted as a single batch.
#[derive(Debug, Default)]
pub struct ReadingBatch {
    pub meters: Vec<MeterReading>,
    pub batteries: Vec<BatteryReading>,
    pub system: Vec<SystemStatus>,
    pub inverters: Vec<InverterReading>,
    pub solar: Vec<SolarReading>,
    pub environment: Vec<EnvironmentalReading>,
    pub alerts: Vec<Alert>,
}

impl ReadingBatch {
    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
            && self.batteries.is_empty()
            && self.system.is_empty()
            && self.inverters.is_empty()
            && self.solar.is_empty()
            && self.environment.is_empty()
            && self.alerts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.meters.len()
            + self.batteries.len()
            + self.system.len()
            + self.inverters.len()
            + self.solar.len()
            + self.environment.len()
            + self.alerts.len()
    }
}

/// Parse a cell into a float, accepting numeric and string forms.
pub fn parse_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Column names where a value of `0` is a legitimate observation rather
/// than a missing channel.
pub fn is_status_field(column: &str) -> bool {
    let lower = column.to_lowercase();
    lower.contains("status")
        || lower.contains("connected")
        || lower.contains("active")
        || lower.contains("alert")
}

fn index_from_tags(tags: &HashMap<String, String>) -> usize {
    tags.get("index")
        .or_else(|| tags.get("pvac"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Route every row of one result series into `batch`.
pub fn map_series(
    batch: &mut ReadingBatch,
    measurement: &str,
    tags: &HashMap<String, String>,
    columns: &[String],
    values: &[Vec<serde_json::Value>],
) {
    for row in values {
        let Some(ts_ns) = row.first().and_then(parse_number) else {
            continue;
        };
        if ts_ns == 0.0 {
            continue;
        }
        let ts = (ts_ns as i64) / 1_000_000;

        for (idx, column) in columns.iter().enumerate() {
            if column == "time" {
                continue;
            }
            let Some(cell) = row.get(idx) else {
                continue;
            };
            let parsed = parse_number(cell);
            if parsed.is_none() && measurement != "alerts" && !column.contains("GridConnected") {
                continue;
            }
            let value = parsed.unwrap_or(0.0);
            if value == 0.0 && !is_status_field(column) && measurement != "alerts" {
                continue;
            }

            map_column(batch, measurement, tags, column, cell, value, ts);
        }
    }
}

fn map_column(
    batch: &mut ReadingBatch,
    measurement: &str,
    tags: &HashMap<String, String>,
    column: &str,
    cell: &serde_json::Value,
    value: f64,
    ts: i64,
) {
    if column == "percentage" || (column == "value" && measurement == "soe") {
        // Fractional exports are rescaled to percent.
        let soe = if value < 1.01 { value * 100.0 } else { value };
        batch.batteries.push(BatteryReading {
            soe: Some(soe),
            ..BatteryReading::at(ts, -1)
        });
    } else if column == "home" || column == "load" {
        batch.meters.push(MeterReading {
            power: Some(value),
            ..MeterReading::at(ts, "load")
        });
    } else if column == "solar" {
        batch.meters.push(MeterReading {
            power: Some(value),
            ..MeterReading::at(ts, "solar")
        });
    } else if column == "from_grid" {
        // Dual emission: directional virtual site plus the signed base
        // site, so consumers can pick either view.
        batch.meters.push(MeterReading {
            power: Some(value),
            ..MeterReading::at(ts, "site_import")
        });
        batch.meters.push(MeterReading {
            power: Some(value),
            ..MeterReading::at(ts, "site")
        });
    } else if column == "to_grid" {
        batch.meters.push(MeterReading {
            power: Some(value),
            ..MeterReading::at(ts, "site_export")
        });
        batch.meters.push(MeterReading {
            power: Some(-value),
            ..MeterReading::at(ts, "site")
        });
    } else if column == "from_pw" {
        batch.meters.push(MeterReading {
            power: Some(value),
            ..MeterReading::at(ts, "battery_export")
        });
        batch.meters.push(MeterReading {
            power: Some(value),
            ..MeterReading::at(ts, "battery")
        });
    } else if column == "to_pw" {
        batch.meters.push(MeterReading {
            power: Some(value),
            ..MeterReading::at(ts, "battery_import")
        });
        batch.meters.push(MeterReading {
            power: Some(-value),
            ..MeterReading::at(ts, "battery")
        });
    } else if let Some((site, phase)) = islander_voltage_column(column) {
        batch.meters.push(MeterReading {
            phase: Some(phase.to_string()),
            voltage: Some(value),
            ..MeterReading::at(ts, site)
        });
    } else if let Some((site, phase)) = islander_frequency_column(column) {
        batch.meters.push(MeterReading {
            phase: phase.map(|p| p.to_string()),
            frequency: Some(value),
            ..MeterReading::at(ts, site)
        });
    } else if column == "PVAC_Fan_Speed_Actual_RPM"
        || column == "pvac_fan_speed_actual_rpm"
        || column == "fan_speed"
    {
        batch.environment.push(EnvironmentalReading {
            fan_speed_actual: Some(value),
            ..EnvironmentalReading::at(ts, index_from_tags(tags))
        });
    } else if column == "PVAC_Fan_Speed_Target_RPM"
        || column == "pvac_fan_speed_target_rpm"
        || column == "fan_target"
    {
        batch.environment.push(EnvironmentalReading {
            fan_speed_target: Some(value),
            ..EnvironmentalReading::at(ts, index_from_tags(tags))
        });
    } else if let Some(caps) = FAN_FIELD_RE.captures(column) {
        // Letter-indexed fan columns: A -> 0, B -> 1, plus an optional
        // trailing digit.
        let letter = caps[1].to_uppercase().bytes().next().unwrap_or(b'A');
        let mut index = (letter - b'A') as usize;
        if let Ok(extra) = caps[2].parse::<usize>() {
            index += extra;
        }
        let is_target = caps[3].eq_ignore_ascii_case("target");
        let mut reading = EnvironmentalReading::at(ts, index);
        if is_target {
            reading.fan_speed_target = Some(value);
        } else {
            reading.fan_speed_actual = Some(value);
        }
        batch.environment.push(reading);
    } else if let Some(caps) = SOLAR_STRING_RE.captures(column) {
        let index: usize = caps[2].parse().unwrap_or(0);
        let mut reading = SolarReading::at(ts, index, &caps[1]);
        match &caps[3] {
            "Voltage" => reading.voltage = Some(value),
            "Current" => reading.current = Some(value),
            _ => reading.power = Some(value),
        }
        batch.solar.push(reading);
    } else if let Some(caps) = PW_INDEX_RE.captures(column) {
        let n: usize = caps[1].parse().unwrap_or(0);
        // PW1 is the first unit; PW0 appears in some exports and stays 0.
        let index = n.saturating_sub(1);
        let suffix = &column[caps.get(0).map_or(0, |m| m.end())..];
        map_pw_column(batch, suffix, index, value, ts);
    } else if column == "ISLAND_GridConnected" || column == "grid_status" {
        let status = match cell.as_str() {
            Some(s) => {
                if s == "Connected" {
                    1.0
                } else {
                    0.0
                }
            }
            None => value,
        };
        batch.system.push(SystemStatus {
            timestamp_ms: ts,
            grid_status: Some(status),
            services_active: None,
        });
    } else if measurement == "alerts" {
        let name = column.strip_prefix("max_").unwrap_or(column);
        if name == "value" || name == "alerts" {
            return;
        }
        if value >= 1.0 {
            batch.alerts.push(Alert {
                timestamp_ms: ts,
                source: "control".to_string(),
                name: name.to_string(),
            });
        }
    }
}

fn map_pw_column(batch: &mut ReadingBatch, suffix: &str, index: usize, value: f64, ts: i64) {
    let non_zero = |v: f64| if v == 0.0 { None } else { Some(v) };
    match suffix {
        "temp" => batch.environment.push(EnvironmentalReading {
            ambient_temp: Some(value),
            ..EnvironmentalReading::at(ts, index)
        }),
        "PVAC_Fan_Speed_Actual_RPM" => batch.environment.push(EnvironmentalReading {
            fan_speed_actual: Some(value),
            ..EnvironmentalReading::at(ts, index)
        }),
        "PVAC_Fan_Speed_Target_RPM" => batch.environment.push(EnvironmentalReading {
            fan_speed_target: Some(value),
            ..EnvironmentalReading::at(ts, index)
        }),
        "PINV_Fout" => batch.inverters.push(InverterReading {
            frequency: Some(value),
            ..InverterReading::at(ts, index, InverterKind::Battery)
        }),
        "p_out" => batch.inverters.push(InverterReading {
            power: Some(value),
            ..InverterReading::at(ts, index, InverterKind::Battery)
        }),
        "PINVVSplit1" | "PINV_VSplit1" => batch.inverters.push(InverterReading {
            voltage1: non_zero(value),
            ..InverterReading::at(ts, index, InverterKind::Battery)
        }),
        "PINVVSplit2" | "PINV_VSplit2" => batch.inverters.push(InverterReading {
            voltage2: non_zero(value),
            ..InverterReading::at(ts, index, InverterKind::Battery)
        }),
        "PINVVSplit3" | "PINV_VSplit3" => batch.inverters.push(InverterReading {
            voltage3: non_zero(value),
            ..InverterReading::at(ts, index, InverterKind::Battery)
        }),
        "POD_nom_energy_remaining" => batch.batteries.push(BatteryReading {
            energy_remaining: Some(value),
            ..BatteryReading::at(ts, index as i32)
        }),
        "POD_nom_full_pack_energy" => batch.batteries.push(BatteryReading {
            energy_capacity: Some(value),
            ..BatteryReading::at(ts, index as i32)
        }),
        _ => {}
    }
}

fn islander_voltage_column(column: &str) -> Option<(&'static str, &'static str)> {
    if column.contains("ISLAND_VL1N_Main") || column == "grid_voltage_l1" {
        Some(("site", "1"))
    } else if column.contains("ISLAND_VL2N_Main") || column == "grid_voltage_l2" {
        Some(("site", "2"))
    } else if column.contains("ISLAND_VL1N_Load") || column == "load_voltage_l1" {
        Some(("load", "1"))
    } else if column.contains("ISLAND_VL2N_Load") || column == "load_voltage_l2" {
        Some(("load", "2"))
    } else {
        None
    }
}

fn islander_frequency_column(column: &str) -> Option<(&'static str, Option<&'static str>)> {
    if column.contains("ISLAND_FreqL1_Main") || column == "grid_frequency_l1" {
        Some(("site", Some("1")))
    } else if column.contains("ISLAND_FreqL2_Main") || column == "grid_frequency_l2" {
        Some(("site", Some("2")))
    } else if column.contains("ISLAND_FreqL3_Main") || column == "grid_frequency_l3" {
        Some(("site", Some("3")))
    } else if column.contains("ISLAND_FreqL1_Load") || column == "load_frequency_l1" {
        Some(("load", Some("1")))
    } else if column.contains("ISLAND_FreqL2_Load") || column == "load_frequency_l2" {
        Some(("load", Some("2")))
    } else if column.contains("ISLAND_FreqL3_Load") || column == "load_frequency_l3" {
        Some(("load", Some("3")))
    } else if column.contains("ISLAND_Freq_Main") || column == "grid_frequency" {
        Some(("site", None))
    } else if column.contains("ISLAND_Freq_Load") || column == "load_frequency" {
        Some(("load", None))
    } else {
        None
    }
}
