//! Typed view of the DeviceControllerQuery response.
//!
//! Only the subtrees the normalizer reads are modeled. Numeric channels
//! the device reports as zero-when-missing stay plain `f64`; channels
//! with a real null/absent distinction are `Option`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceControllerResponse {
    pub components: Components,
    pub control: Control,
    #[serde(rename = "esCan")]
    pub es_can: EsCan,
    pub neurio: Neurio,
    pub system: SystemInfo,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemInfo {
    pub time: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Components {
    pub msa: Vec<MsaComponent>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MsaComponent {
    #[serde(rename = "partNumber")]
    pub part_number: String,
    #[serde(rename = "serialNumber")]
    pub serial_number: String,
    pub signals: Vec<ComponentSignal>,
    #[serde(rename = "activeAlerts")]
    pub active_alerts: Vec<NamedAlert>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentSignal {
    pub name: String,
    pub value: Option<f64>,
    #[serde(rename = "textValue")]
    pub text_value: Option<String>,
    #[serde(rename = "boolValue")]
    pub bool_value: Option<bool>,
    pub timestamp: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamedAlert {
    pub name: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Control {
    pub alerts: ActiveAlerts,
    #[serde(rename = "meterAggregates")]
    pub meter_aggregates: Vec<MeterAggregate>,
    #[serde(rename = "systemStatus")]
    pub system_status: ControlSystemStatus,
    pub islanding: Islanding,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveAlerts {
    pub active: Vec<String>,
    #[serde(rename = "isMIA")]
    pub is_mia: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterAggregate {
    pub location: String,
    #[serde(rename = "realPowerW")]
    pub real_power_w: f64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSystemStatus {
    #[serde(rename = "nominalEnergyRemainingWh")]
    pub nominal_energy_remaining_wh: i64,
    #[serde(rename = "nominalFullPackEnergyWh")]
    pub nominal_full_pack_energy_wh: i64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Islanding {
    #[serde(rename = "customerIslandMode")]
    pub customer_island_mode: String,
    #[serde(rename = "contactorClosed")]
    pub contactor_closed: bool,
    #[serde(rename = "gridOK")]
    pub grid_ok: bool,
    #[serde(rename = "microGridOK")]
    pub micro_grid_ok: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EsCan {
    pub bus: EsCanBus,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EsCanBus {
    #[serde(rename = "ISLANDER")]
    pub islander: Islander,
    #[serde(rename = "MSA")]
    pub msa: MsaBus,
    #[serde(rename = "PINV")]
    pub pinv: Vec<Pinv>,
    #[serde(rename = "POD")]
    pub pod: Vec<Pod>,
    #[serde(rename = "PVAC")]
    pub pvac: Vec<Pvac>,
    #[serde(rename = "PVS")]
    pub pvs: Vec<Pvs>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Islander {
    #[serde(rename = "ISLAND_AcMeasurements")]
    pub ac_measurements: IslandAcMeasurements,
    #[serde(rename = "ISLAND_GridConnection")]
    pub grid_connection: IslandGridConnection,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IslandAcMeasurements {
    #[serde(rename = "ISLAND_VL1N_Main")]
    pub vl1n_main: f64,
    #[serde(rename = "ISLAND_VL2N_Main")]
    pub vl2n_main: f64,
    #[serde(rename = "ISLAND_VL3N_Main")]
    pub vl3n_main: f64,
    #[serde(rename = "ISLAND_FreqL1_Main")]
    pub freq_l1_main: f64,
    #[serde(rename = "ISLAND_FreqL2_Main")]
    pub freq_l2_main: f64,
    #[serde(rename = "ISLAND_FreqL3_Main")]
    pub freq_l3_main: f64,
    #[serde(rename = "ISLAND_VL1N_Load")]
    pub vl1n_load: f64,
    #[serde(rename = "ISLAND_VL2N_Load")]
    pub vl2n_load: f64,
    #[serde(rename = "ISLAND_VL3N_Load")]
    pub vl3n_load: f64,
    #[serde(rename = "ISLAND_FreqL1_Load")]
    pub freq_l1_load: f64,
    #[serde(rename = "ISLAND_FreqL2_Load")]
    pub freq_l2_load: f64,
    #[serde(rename = "ISLAND_FreqL3_Load")]
    pub freq_l3_load: f64,
    #[serde(rename = "ISLAND_GridState")]
    pub grid_state: String,
    #[serde(rename = "isComplete")]
    pub is_complete: bool,
    #[serde(rename = "isMIA")]
    pub is_mia: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IslandGridConnection {
    #[serde(rename = "ISLAND_GridConnected")]
    pub grid_connected: String,
    #[serde(rename = "isComplete")]
    pub is_complete: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MsaBus {
    #[serde(rename = "METER_Z_AcMeasurements")]
    pub meter_z: MeterZAcMeasurements,
    #[serde(rename = "packagePartNumber")]
    pub package_part_number: String,
    #[serde(rename = "packageSerialNumber")]
    pub package_serial_number: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterZAcMeasurements {
    #[serde(rename = "METER_Z_CTA_InstRealPower")]
    pub cta_inst_real_power: i64,
    #[serde(rename = "METER_Z_CTA_InstReactivePower")]
    pub cta_inst_reactive_power: i64,
    #[serde(rename = "METER_Z_CTA_I")]
    pub cta_current: f64,
    #[serde(rename = "METER_Z_VL1G")]
    pub vl1g: f64,
    #[serde(rename = "METER_Z_CTB_InstRealPower")]
    pub ctb_inst_real_power: i64,
    #[serde(rename = "METER_Z_CTB_InstReactivePower")]
    pub ctb_inst_reactive_power: i64,
    #[serde(rename = "METER_Z_CTB_I")]
    pub ctb_current: f64,
    #[serde(rename = "METER_Z_VL2G")]
    pub vl2g: f64,
    #[serde(rename = "isMIA")]
    pub is_mia: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pinv {
    #[serde(rename = "PINV_Status")]
    pub status: PinvStatus,
    #[serde(rename = "PINV_AcMeasurements")]
    pub ac_measurements: PinvAcMeasurements,
    pub alerts: ActiveAlerts,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PinvStatus {
    #[serde(rename = "PINV_Fout")]
    pub fout: f64,
    #[serde(rename = "PINV_Pout")]
    pub pout: f64,
    #[serde(rename = "PINV_Vout")]
    pub vout: f64,
    #[serde(rename = "PINV_State")]
    pub state: String,
    #[serde(rename = "isMIA")]
    pub is_mia: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PinvAcMeasurements {
    #[serde(rename = "PINV_VSplit1")]
    pub v_split1: f64,
    #[serde(rename = "PINV_VSplit2")]
    pub v_split2: f64,
    #[serde(rename = "PINV_VSplit3")]
    pub v_split3: f64,
    #[serde(rename = "isMIA")]
    pub is_mia: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pod {
    #[serde(rename = "POD_EnergyStatus")]
    pub energy_status: PodEnergyStatus,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PodEnergyStatus {
    #[serde(rename = "POD_nom_energy_remaining")]
    pub nom_energy_remaining: f64,
    #[serde(rename = "POD_nom_full_pack_energy")]
    pub nom_full_pack_energy: f64,
    #[serde(rename = "isMIA")]
    pub is_mia: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pvac {
    #[serde(rename = "PVAC_Status")]
    pub status: PvacStatus,
    #[serde(rename = "PVAC_Logging")]
    pub logging: PvacLogging,
    pub alerts: ActiveAlerts,
    #[serde(rename = "packagePartNumber")]
    pub package_part_number: String,
    #[serde(rename = "packageSerialNumber")]
    pub package_serial_number: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PvacStatus {
    #[serde(rename = "PVAC_Fout")]
    pub fout: f64,
    #[serde(rename = "PVAC_Pout")]
    pub pout: f64,
    #[serde(rename = "PVAC_Vout")]
    pub vout: f64,
    #[serde(rename = "PVAC_State")]
    pub state: String,
    #[serde(rename = "isMIA")]
    pub is_mia: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PvacLogging {
    #[serde(rename = "PVAC_Fan_Speed_Actual_RPM")]
    pub fan_speed_actual_rpm: f64,
    #[serde(rename = "PVAC_Fan_Speed_Target_RPM")]
    pub fan_speed_target_rpm: f64,
    #[serde(rename = "PVAC_PVCurrent_A")]
    pub pv_current_a: f64,
    #[serde(rename = "PVAC_PVCurrent_B")]
    pub pv_current_b: f64,
    #[serde(rename = "PVAC_PVCurrent_C")]
    pub pv_current_c: f64,
    #[serde(rename = "PVAC_PVCurrent_D")]
    pub pv_current_d: f64,
    #[serde(rename = "PVAC_PVMeasuredVoltage_A")]
    pub pv_voltage_a: f64,
    #[serde(rename = "PVAC_PVMeasuredVoltage_B")]
    pub pv_voltage_b: f64,
    #[serde(rename = "PVAC_PVMeasuredVoltage_C")]
    pub pv_voltage_c: f64,
    #[serde(rename = "PVAC_PVMeasuredVoltage_D")]
    pub pv_voltage_d: f64,
    #[serde(rename = "PVAC_VL1Ground")]
    pub vl1_ground: f64,
    #[serde(rename = "PVAC_VL2Ground")]
    pub vl2_ground: f64,
    #[serde(rename = "isMIA")]
    pub is_mia: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pvs {
    #[serde(rename = "PVS_Status")]
    pub status: PvsStatus,
    pub alerts: ActiveAlerts,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PvsStatus {
    #[serde(rename = "PVS_State")]
    pub state: String,
    #[serde(rename = "PVS_vLL")]
    pub v_ll: f64,
    #[serde(rename = "PVS_StringA_Connected")]
    pub string_a_connected: bool,
    #[serde(rename = "PVS_StringB_Connected")]
    pub string_b_connected: bool,
    #[serde(rename = "PVS_StringC_Connected")]
    pub string_c_connected: bool,
    #[serde(rename = "PVS_StringD_Connected")]
    pub string_d_connected: bool,
    #[serde(rename = "PVS_SelfTestState")]
    pub self_test_state: String,
    #[serde(rename = "isMIA")]
    pub is_mia: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Neurio {
    pub readings: Vec<NeurioReading>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NeurioReading {
    pub serial: String,
    #[serde(rename = "firmwareVersion")]
    pub firmware_version: String,
    #[serde(rename = "dataRead")]
    pub data_read: Vec<NeurioChannel>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NeurioChannel {
    #[serde(rename = "currentA")]
    pub current_a: f64,
    #[serde(rename = "reactivePowerVAR")]
    pub reactive_power_var: f64,
    #[serde(rename = "realPowerW")]
    pub real_power_w: f64,
    #[serde(rename = "voltageV")]
    pub voltage_v: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_tree() {
        let raw = r#"{
            "control": {
                "systemStatus": {"nominalEnergyRemainingWh": 10500, "nominalFullPackEnergyWh": 27000},
                "meterAggregates": [{"location": "LOAD", "realPowerW": 1234.5}],
                "alerts": {"active": ["SystemConnectedToGrid"]}
            },
            "esCan": {
                "bus": {
                    "PVAC": [{"PVAC_Logging": {"isMIA": false, "PVAC_PVCurrent_A": 1.5, "PVAC_PVMeasuredVoltage_A": 400.0}}],
                    "ISLANDER": {"ISLAND_AcMeasurements": {"ISLAND_VL1N_Main": 121.3, "isMIA": false}}
                }
            },
            "neurio": {"readings": [{"serial": "N123", "dataRead": [{"voltageV": 120.0, "realPowerW": 240.0}]}]}
        }"#;
        let tree: DeviceControllerResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(tree.control.system_status.nominal_full_pack_energy_wh, 27000);
        assert_eq!(tree.control.meter_aggregates[0].location, "LOAD");
        assert_eq!(tree.es_can.bus.pvac.len(), 1);
        assert_eq!(tree.es_can.bus.pvac[0].logging.pv_current_a, 1.5);
        assert!(tree.es_can.bus.pod.is_empty());
        assert_eq!(tree.neurio.readings[0].data_read[0].voltage_v, 120.0);
        assert_eq!(tree.es_can.bus.islander.ac_measurements.vl1n_main, 121.3);
    }
}
