//! Typed insertion of reading families. Each insert maps one reading
//! family to its metrics and labels and commits the whole slice as one
//! atomic batch.

use super::engine::{Appender, Store};
use super::error::StorageError;
use crate::datamodel::{
    Alert, BatteryReading, EnvironmentalReading, GridPulseLabels, GridPulseLabelsExt,
    InverterReading, MeterReading, SolarReading, SystemStatus,
};

/// Synthetic series written at the start of every successful collection
/// cycle; used on restart to align the first tick.
pub const COLLECTION_MARK_METRIC: &str = "collection_mark";

fn run_batch<F>(store: &Store, stage: F) -> Result<(), StorageError>
where
    F: FnOnce(&mut Appender) -> Result<(), StorageError>,
{
    let mut app = store.appender();
    if let Err(err) = stage(&mut app) {
        app.rollback();
        return Err(err);
    }
    app.commit()
}

impl Store {
    pub fn insert_collection_mark(&self, timestamp_ms: i64) -> Result<(), StorageError> {
        run_batch(self, |app| {
            app.append(COLLECTION_MARK_METRIC, GridPulseLabels::new(), timestamp_ms, 1.0)
        })
    }

    /// Generic single-sample insert; `timestamp` in seconds.
    pub fn insert(
        &self,
        metric: &str,
        labels: GridPulseLabels,
        value: f64,
        timestamp: i64,
    ) -> Result<(), StorageError> {
        run_batch(self, |app| app.append(metric, labels, timestamp * 1000, value))
    }

    pub fn insert_meter_readings(&self, readings: &[MeterReading]) -> Result<(), StorageError> {
        if readings.is_empty() {
            return Ok(());
        }
        run_batch(self, |app| {
            for r in readings {
                let t = r.timestamp_ms;
                let mut labels = GridPulseLabels::from_pairs([("site", r.site.as_str())]);
                if let Some(phase) = &r.phase {
                    labels.push(("phase".to_string(), phase.clone()));
                }
                app.append_if_set("power_watts", labels.clone(), t, r.power)?;
                app.append_if_set("power_reactive_var", labels.clone(), t, r.reactive)?;
                app.append_if_set("power_apparent_va", labels.clone(), t, r.apparent)?;
                app.append_if_set("voltage_volts", labels.clone(), t, r.voltage)?;
                app.append_if_set("current_amps", labels.clone(), t, r.current)?;
                app.append_if_set("frequency_hertz", labels, t, r.frequency)?;
                if let Some(imported) = r.imported {
                    app.append(
                        "energy_wh",
                        GridPulseLabels::from_pairs([
                            ("site", r.site.as_str()),
                            ("direction", "import"),
                        ]),
                        t,
                        imported,
                    )?;
                }
                if let Some(exported) = r.exported {
                    app.append(
                        "energy_wh",
                        GridPulseLabels::from_pairs([
                            ("site", r.site.as_str()),
                            ("direction", "export"),
                        ]),
                        t,
                        exported,
                    )?;
                }
            }
            Ok(())
        })
    }

    pub fn insert_inverter_readings(
        &self,
        readings: &[InverterReading],
    ) -> Result<(), StorageError> {
        if readings.is_empty() {
            return Ok(());
        }
        run_batch(self, |app| {
            for r in readings {
                let t = r.timestamp_ms;
                let idx = r.index.to_string();
                let kind = r.kind.as_str();
                let labels =
                    GridPulseLabels::from_pairs([("index", idx.as_str()), ("type", kind)]);
                app.append_if_set("inverter_power_watts", labels.clone(), t, r.power)?;
                app.append_if_set("inverter_frequency_hertz", labels, t, r.frequency)?;
                for (phase, voltage) in [("1", r.voltage1), ("2", r.voltage2), ("3", r.voltage3)] {
                    app.append_if_set(
                        "inverter_voltage_volts",
                        GridPulseLabels::from_pairs([
                            ("index", idx.as_str()),
                            ("type", kind),
                            ("phase", phase),
                        ]),
                        t,
                        voltage,
                    )?;
                }
            }
            Ok(())
        })
    }

    pub fn insert_solar_readings(&self, readings: &[SolarReading]) -> Result<(), StorageError> {
        if readings.is_empty() {
            return Ok(());
        }
        run_batch(self, |app| {
            for r in readings {
                let t = r.timestamp_ms;
                let idx = r.index.to_string();
                let labels = GridPulseLabels::from_pairs([
                    ("index", idx.as_str()),
                    ("string", r.string_id.as_str()),
                ]);
                app.append_if_set("solar_voltage_volts", labels.clone(), t, r.voltage)?;
                app.append_if_set("solar_current_amps", labels.clone(), t, r.current)?;
                app.append_if_set("solar_power_watts", labels, t, r.power)?;
            }
            Ok(())
        })
    }

    pub fn insert_battery_readings(&self, readings: &[BatteryReading]) -> Result<(), StorageError> {
        if readings.is_empty() {
            return Ok(());
        }
        run_batch(self, |app| {
            for r in readings {
                let t = r.timestamp_ms;
                if r.pod_index == -1 {
                    // System aggregate: only the SOE percentage, clipped
                    // to its valid range.
                    app.append_if_set(
                        "battery_soe_percent",
                        GridPulseLabels::new(),
                        t,
                        r.soe.map(|v| v.clamp(0.0, 100.0)),
                    )?;
                } else {
                    let idx = r.pod_index.to_string();
                    app.append_if_set(
                        "battery_energy_wh",
                        GridPulseLabels::from_pairs([
                            ("index", idx.as_str()),
                            ("type", "remaining"),
                        ]),
                        t,
                        r.energy_remaining,
                    )?;
                    app.append_if_set(
                        "battery_energy_wh",
                        GridPulseLabels::from_pairs([
                            ("index", idx.as_str()),
                            ("type", "capacity"),
                        ]),
                        t,
                        r.energy_capacity,
                    )?;
                }
            }
            Ok(())
        })
    }

    pub fn insert_system_status(&self, readings: &[SystemStatus]) -> Result<(), StorageError> {
        if readings.is_empty() {
            return Ok(());
        }
        run_batch(self, |app| {
            for r in readings {
                let t = r.timestamp_ms;
                app.append_if_set("grid_status_code", GridPulseLabels::new(), t, r.grid_status)?;
                if let Some(active) = r.services_active {
                    app.append(
                        "grid_services_active_bool",
                        GridPulseLabels::new(),
                        t,
                        if active { 1.0 } else { 0.0 },
                    )?;
                }
            }
            Ok(())
        })
    }

    pub fn insert_environmental_readings(
        &self,
        readings: &[EnvironmentalReading],
    ) -> Result<(), StorageError> {
        if readings.is_empty() {
            return Ok(());
        }
        run_batch(self, |app| {
            for r in readings {
                let t = r.timestamp_ms;
                let idx = r.index.to_string();
                app.append_if_set(
                    "temperature_celsius",
                    GridPulseLabels::from_pairs([("index", idx.as_str())]),
                    t,
                    r.ambient_temp,
                )?;
                app.append_if_set(
                    "fan_speed_rpm",
                    GridPulseLabels::from_pairs([("index", idx.as_str()), ("type", "actual")]),
                    t,
                    r.fan_speed_actual,
                )?;
                app.append_if_set(
                    "fan_speed_rpm",
                    GridPulseLabels::from_pairs([("index", idx.as_str()), ("type", "target")]),
                    t,
                    r.fan_speed_target,
                )?;
            }
            Ok(())
        })
    }

    pub fn insert_alerts(&self, alerts: &[Alert]) -> Result<(), StorageError> {
        if alerts.is_empty() {
            return Ok(());
        }
        run_batch(self, |app| {
            for a in alerts {
                app.append(
                    "active_alert",
                    GridPulseLabels::from_pairs([
                        ("source", a.source.as_str()),
                        ("name", a.name.as_str()),
                    ]),
                    a.timestamp_ms,
                    1.0,
                )?;
            }
            Ok(())
        })
    }
}
