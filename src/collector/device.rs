//! Normalizes the nested device-controller tree into flat reading
//! batches: solar strings, inverters, battery pods, environmental
//! telemetry, meters and alerts.

use super::Collector;
use crate::datamodel::{
    Alert, BatteryReading, EnvironmentalReading, InverterKind, InverterReading, MeterReading,
    SolarReading,
};
use crate::gateway::{DeviceControllerResponse, GatewayClient};
use crate::storage::Store;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

fn non_zero(v: f64) -> Option<f64> {
    if v == 0.0 {
        None
    } else {
        Some(v)
    }
}

/// Everything one controller fetch normalizes into. All readings share
/// the fetch's truncated-to-second timestamp.
#[derive(Debug, Default)]
pub struct ControllerReadings {
    pub solar: Vec<SolarReading>,
    pub solar_inverters: Vec<InverterReading>,
    pub battery_inverters: Vec<InverterReading>,
    pub environment: Vec<EnvironmentalReading>,
    pub battery: Vec<BatteryReading>,
    pub meters: Vec<MeterReading>,
    pub alerts: Vec<Alert>,
}

pub fn normalize_controller(
    ctrl: &DeviceControllerResponse,
    timestamp_ms: i64,
) -> ControllerReadings {
    let mut out = ControllerReadings::default();
    let now = timestamp_ms;

    // Solar strings. Indices are assigned densely over non-MIA
    // inverters, not by array position.
    let mut valid_idx = 0;
    for pvac in &ctrl.es_can.bus.pvac {
        if pvac.logging.is_mia {
            continue;
        }
        let mut add = |id: &str, current: f64, voltage: f64| {
            if current == 0.0 && voltage == 0.0 {
                return;
            }
            out.solar.push(SolarReading {
                current: Some(current),
                voltage: Some(voltage),
                power: Some(current * voltage),
                ..SolarReading::at(now, valid_idx, id)
            });
        };
        add("A", pvac.logging.pv_current_a, pvac.logging.pv_voltage_a);
        add("B", pvac.logging.pv_current_b, pvac.logging.pv_voltage_b);
        add("C", pvac.logging.pv_current_c, pvac.logging.pv_voltage_c);
        add("D", pvac.logging.pv_current_d, pvac.logging.pv_voltage_d);
        valid_idx += 1;
    }

    let mut valid_idx = 0;
    for pvac in &ctrl.es_can.bus.pvac {
        if pvac.logging.is_mia {
            continue;
        }
        out.solar_inverters.push(InverterReading {
            power: Some(pvac.status.pout),
            frequency: Some(pvac.status.fout),
            voltage1: non_zero(pvac.logging.vl1_ground),
            voltage2: non_zero(pvac.logging.vl2_ground),
            ..InverterReading::at(now, valid_idx, InverterKind::Solar)
        });
        valid_idx += 1;
    }

    // Ambient temperatures and fan speeds live in the component signal
    // lists; each kind keeps its own dense index.
    let mut valid_temp_idx = 0;
    for msa in &ctrl.components.msa {
        let mut reading = EnvironmentalReading::at(now, valid_temp_idx);
        let mut found = false;
        for signal in &msa.signals {
            if signal.name == "THC_AmbientTemp" {
                if let Some(value) = signal.value {
                    reading.ambient_temp = Some(value);
                    found = true;
                }
            }
        }
        if found {
            out.environment.push(reading);
            valid_temp_idx += 1;
        }
    }

    let mut valid_fan_idx = 0;
    for msa in &ctrl.components.msa {
        let mut reading = EnvironmentalReading::at(now, valid_fan_idx);
        let mut found = false;
        for signal in &msa.signals {
            let Some(value) = signal.value else {
                continue;
            };
            match signal.name.as_str() {
                "PVAC_Fan_Speed_Actual_RPM" => {
                    reading.fan_speed_actual = Some(value);
                    found = true;
                }
                "PVAC_Fan_Speed_Target_RPM" => {
                    reading.fan_speed_target = Some(value);
                    found = true;
                }
                _ => {}
            }
        }
        if found {
            out.environment.push(reading);
            valid_fan_idx += 1;
        }
    }

    // Battery inverters.
    let mut valid_idx = 0;
    for pinv in &ctrl.es_can.bus.pinv {
        if pinv.ac_measurements.is_mia {
            continue;
        }
        out.battery_inverters.push(InverterReading {
            power: Some(pinv.status.pout),
            frequency: Some(pinv.status.fout),
            voltage1: non_zero(pinv.ac_measurements.v_split1),
            voltage2: non_zero(pinv.ac_measurements.v_split2),
            voltage3: non_zero(pinv.ac_measurements.v_split3),
            ..InverterReading::at(now, valid_idx, InverterKind::Battery)
        });
        valid_idx += 1;
    }

    // Battery pods, then the system aggregate as pod -1.
    let mut valid_idx: i32 = 0;
    for pod in &ctrl.es_can.bus.pod {
        if pod.energy_status.is_mia {
            continue;
        }
        out.battery.push(BatteryReading {
            energy_remaining: Some(pod.energy_status.nom_energy_remaining),
            energy_capacity: Some(pod.energy_status.nom_full_pack_energy),
            ..BatteryReading::at(now, valid_idx)
        });
        valid_idx += 1;
    }
    let status = &ctrl.control.system_status;
    if status.nominal_full_pack_energy_wh != 0 {
        let soe = status.nominal_energy_remaining_wh as f64
            / status.nominal_full_pack_energy_wh as f64
            * 100.0;
        out.battery.push(BatteryReading {
            soe: Some(soe),
            energy_remaining: Some(status.nominal_energy_remaining_wh as f64),
            energy_capacity: Some(status.nominal_full_pack_energy_wh as f64),
            ..BatteryReading::at(now, -1)
        });
    }

    // Controller-level meter aggregates.
    for meter in &ctrl.control.meter_aggregates {
        out.meters.push(MeterReading {
            power: Some(meter.real_power_w),
            ..MeterReading::at(now, meter.location.to_lowercase())
        });
    }

    // Alerts, one sample per (source, name); sub-device sources carry
    // the dense index of the unit.
    for name in &ctrl.control.alerts.active {
        out.alerts.push(Alert {
            timestamp_ms: now,
            source: "control".to_string(),
            name: name.clone(),
        });
    }
    let mut valid_idx = 0;
    for pinv in &ctrl.es_can.bus.pinv {
        if pinv.ac_measurements.is_mia {
            continue;
        }
        for name in &pinv.alerts.active {
            out.alerts.push(Alert {
                timestamp_ms: now,
                source: format!("pinv_{}", valid_idx),
                name: name.clone(),
            });
        }
        valid_idx += 1;
    }
    let mut valid_idx = 0;
    for pvac in &ctrl.es_can.bus.pvac {
        if pvac.logging.is_mia {
            continue;
        }
        for name in &pvac.alerts.active {
            out.alerts.push(Alert {
                timestamp_ms: now,
                source: format!("pvac_{}", valid_idx),
                name: name.clone(),
            });
        }
        valid_idx += 1;
    }
    let mut valid_idx = 0;
    for pvs in &ctrl.es_can.bus.pvs {
        if pvs.status.is_mia {
            continue;
        }
        for name in &pvs.alerts.active {
            out.alerts.push(Alert {
                timestamp_ms: now,
                source: format!("pvs_{}", valid_idx),
                name: name.clone(),
            });
        }
        valid_idx += 1;
    }
    for (idx, msa) in ctrl.components.msa.iter().enumerate() {
        for alert in &msa.active_alerts {
            out.alerts.push(Alert {
                timestamp_ms: now,
                source: format!("msa_{}", idx),
                name: alert.name.clone(),
            });
        }
    }

    // Neurio sub-meters, one reading per channel; current falls back to
    // P/V when the channel does not report amps.
    for reading in &ctrl.neurio.readings {
        if reading.serial.is_empty() {
            continue;
        }
        for (i, channel) in reading.data_read.iter().enumerate() {
            if channel.voltage_v == 0.0 && channel.real_power_w == 0.0 {
                continue;
            }
            let current = if channel.current_a != 0.0 {
                Some(channel.current_a)
            } else if channel.voltage_v != 0.0 {
                Some(channel.real_power_w / channel.voltage_v)
            } else {
                None
            };
            out.meters.push(MeterReading {
                phase: Some((i + 1).to_string()),
                voltage: Some(channel.voltage_v),
                power: Some(channel.real_power_w),
                current,
                reactive: Some(channel.reactive_power_var),
                ..MeterReading::at(now, format!("neurio_{}", reading.serial.to_lowercase()))
            });
        }
    }

    // Islander measurements: per-phase voltage and frequency for the
    // grid side and the load side.
    let isl = &ctrl.es_can.bus.islander.ac_measurements;
    if !isl.is_mia {
        let mut add = |site: &str, phase: &str, voltage: Option<f64>, frequency: Option<f64>| {
            out.meters.push(MeterReading {
                phase: Some(phase.to_string()),
                voltage,
                frequency,
                ..MeterReading::at(now, site)
            });
        };
        if isl.vl1n_main != 0.0 {
            add("site", "1", Some(isl.vl1n_main), None);
        }
        if isl.vl2n_main != 0.0 {
            add("site", "2", Some(isl.vl2n_main), None);
        }
        if isl.freq_l1_main != 0.0 {
            add("site", "1", None, Some(isl.freq_l1_main));
        }
        if isl.freq_l2_main != 0.0 {
            add("site", "2", None, Some(isl.freq_l2_main));
        }
        if isl.vl1n_load != 0.0 {
            add("load", "1", Some(isl.vl1n_load), None);
        }
        if isl.vl2n_load != 0.0 {
            add("load", "2", Some(isl.vl2n_load), None);
        }
        if isl.freq_l1_load != 0.0 {
            add("load", "1", None, Some(isl.freq_l1_load));
        }
        if isl.freq_l2_load != 0.0 {
            add("load", "2", None, Some(isl.freq_l2_load));
        }
    }

    // Synchrometer two-phase readings.
    let msa = &ctrl.es_can.bus.msa.meter_z;
    if !msa.is_mia {
        out.meters.push(MeterReading {
            phase: Some("1".to_string()),
            voltage: Some(msa.vl1g),
            power: Some(msa.cta_inst_real_power as f64),
            ..MeterReading::at(now, "grid_msa")
        });
        out.meters.push(MeterReading {
            phase: Some("2".to_string()),
            voltage: Some(msa.vl2g),
            power: Some(msa.ctb_inst_real_power as f64),
            ..MeterReading::at(now, "grid_msa")
        });
    }

    out
}

pub struct DeviceCollector {
    gateway: Arc<GatewayClient>,
}

impl DeviceCollector {
    pub fn new(gateway: Arc<GatewayClient>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Collector for DeviceCollector {
    fn name(&self) -> &'static str {
        "DeviceCollector"
    }

    async fn collect(&self, store: &Store) -> Result<String> {
        let ctrl = self
            .gateway
            .fetch_controller()
            .await
            .context("failed to fetch controller")?;

        let now_ms = (chrono::Utc::now().timestamp_millis() / 1000) * 1000;
        let readings = normalize_controller(&ctrl, now_ms);

        store.insert_solar_readings(&readings.solar)?;
        store.insert_inverter_readings(&readings.solar_inverters)?;
        store.insert_environmental_readings(&readings.environment)?;
        store.insert_inverter_readings(&readings.battery_inverters)?;
        store.insert_battery_readings(&readings.battery)?;
        store.insert_meter_readings(&readings.meters)?;
        store.insert_alerts(&readings.alerts)?;

        Ok(format!(
            "Processed {} solar strings, {} inverters, {} batteries, {} meter readings",
            readings.solar.len(),
            readings.solar_inverters.len() + readings.battery_inverters.len(),
            readings.battery.len(),
            readings.meters.len(),
        ))
    }
}
