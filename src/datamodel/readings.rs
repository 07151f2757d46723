//! Intermediate reading families produced by the collectors and the
//! historical importer, before they become tagged samples.
//!
//! A `None` field means the channel was absent from the device response
//! and must produce no sample. A `Some(0.0)` is a real observation.

/// Power-meter readings for a logical site (`site`, `load`, `solar`,
/// `battery`, the `*_import`/`*_export` virtual sites, or a sub-meter).
#[derive(Debug, Clone, PartialEq)]
pub struct MeterReading {
    pub timestamp_ms: i64,
    pub site: String,
    pub phase: Option<String>,
    pub power: Option<f64>,
    pub reactive: Option<f64>,
    pub apparent: Option<f64>,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub frequency: Option<f64>,
    pub imported: Option<f64>,
    pub exported: Option<f64>,
}

impl MeterReading {
    /// An empty reading for a site; callers fill in the channels they saw.
    pub fn at(timestamp_ms: i64, site: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            site: site.into(),
            phase: None,
            power: None,
            reactive: None,
            apparent: None,
            voltage: None,
            current: None,
            frequency: None,
            imported: None,
            exported: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InverterKind {
    #[default]
    Battery,
    Solar,
}

impl InverterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InverterKind::Battery => "battery",
            InverterKind::Solar => "solar",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InverterReading {
    pub timestamp_ms: i64,
    /// Dense index among non-MIA inverters of the same kind.
    pub index: usize,
    pub kind: InverterKind,
    pub power: Option<f64>,
    pub frequency: Option<f64>,
    pub voltage1: Option<f64>,
    pub voltage2: Option<f64>,
    pub voltage3: Option<f64>,
}

impl InverterReading {
    pub fn at(timestamp_ms: i64, index: usize, kind: InverterKind) -> Self {
        Self {
            timestamp_ms,
            index,
            kind,
            power: None,
            frequency: None,
            voltage1: None,
            voltage2: None,
            voltage3: None,
        }
    }
}

/// One photovoltaic string (A..D) of one inverter.
#[derive(Debug, Clone, PartialEq)]
pub struct SolarReading {
    pub timestamp_ms: i64,
    pub index: usize,
    pub string_id: String,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
}

impl SolarReading {
    pub fn at(timestamp_ms: i64, index: usize, string_id: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            index,
            string_id: string_id.into(),
            voltage: None,
            current: None,
            power: None,
        }
    }
}

/// Battery pod energy state. `pod_index == -1` is the system aggregate,
/// the only row that carries a state-of-energy percentage.
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryReading {
    pub timestamp_ms: i64,
    pub pod_index: i32,
    pub soe: Option<f64>,
    pub energy_remaining: Option<f64>,
    pub energy_capacity: Option<f64>,
}

impl BatteryReading {
    pub fn at(timestamp_ms: i64, pod_index: i32) -> Self {
        Self {
            timestamp_ms,
            pod_index,
            soe: None,
            energy_remaining: None,
            energy_capacity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemStatus {
    pub timestamp_ms: i64,
    pub grid_status: Option<f64>,
    pub services_active: Option<bool>,
}

/// Temperature and fan telemetry of one support module.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentalReading {
    pub timestamp_ms: i64,
    pub index: usize,
    pub ambient_temp: Option<f64>,
    pub fan_speed_actual: Option<f64>,
    pub fan_speed_target: Option<f64>,
}

impl EnvironmentalReading {
    pub fn at(timestamp_ms: i64, index: usize) -> Self {
        Self {
            timestamp_ms,
            index,
            ambient_temp: None,
            fan_speed_actual: None,
            fan_speed_target: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub timestamp_ms: i64,
    pub source: String,
    pub name: String,
}
