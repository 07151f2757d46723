//! Static catalog of the named queries the gateway understands.
//!
//! Each entry carries the payload key, the pre-computed request
//! signature the device expects, the query text and optional default
//! parameters. Unknown names are rejected before anything goes on the
//! wire.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct GatewayQuery {
    /// Payload discriminator sent as `payload.value`.
    pub key: i32,
    /// Base64 request signature, decoded lazily when the envelope is built.
    signature_b64: &'static str,
    pub text: &'static str,
    pub default_params: Option<&'static str>,
}

impl GatewayQuery {
    pub fn signature(&self) -> Vec<u8> {
        BASE64.decode(self.signature_b64).unwrap_or_default()
    }
}

static QUERIES: Lazy<HashMap<&'static str, GatewayQuery>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        "DeviceControllerQuery",
        GatewayQuery {
            key: 2,
            signature_b64: "J9cqiNR5f2YIdYvhDbyq3NDAsUzLhgTxwewtUI5ZzGY=",
            text: "query DeviceControllerQuery {\n  control {\n    systemStatus { nominalFullPackEnergyWh nominalEnergyRemainingWh }\n    islanding { customerIslandMode contactorClosed microGridOK gridOK }\n    meterAggregates { location realPowerW }\n    alerts { active }\n  }\n  system { time }\n  neurio { readings { serial dataRead { voltageV realPowerW reactivePowerVAR currentA } } }\n  esCan {\n    bus {\n      PVAC { packagePartNumber packageSerialNumber PVAC_Status { isMIA PVAC_Pout PVAC_State PVAC_Vout PVAC_Fout } PVAC_Logging { isMIA PVAC_PVCurrent_A PVAC_PVCurrent_B PVAC_PVCurrent_C PVAC_PVCurrent_D PVAC_PVMeasuredVoltage_A PVAC_PVMeasuredVoltage_B PVAC_PVMeasuredVoltage_C PVAC_PVMeasuredVoltage_D PVAC_VL1Ground PVAC_VL2Ground PVAC_Fan_Speed_Actual_RPM PVAC_Fan_Speed_Target_RPM } alerts { isComplete isMIA active } }\n      PINV { PINV_Status { isMIA PINV_Fout PINV_Pout PINV_Vout PINV_State } PINV_AcMeasurements { isMIA PINV_VSplit1 PINV_VSplit2 PINV_VSplit3 } alerts { isComplete isMIA active } }\n      PVS { PVS_Status { isMIA PVS_State PVS_vLL PVS_StringA_Connected PVS_StringB_Connected PVS_StringC_Connected PVS_StringD_Connected PVS_SelfTestState } alerts { isComplete isMIA active } }\n      POD { POD_EnergyStatus { isMIA POD_nom_energy_remaining POD_nom_full_pack_energy } POD_InfoMsg { POD_appGitHash } }\n      ISLANDER { ISLAND_GridConnection { ISLAND_GridConnected isComplete } ISLAND_AcMeasurements { isMIA ISLAND_VL1N_Main ISLAND_VL2N_Main ISLAND_VL3N_Main ISLAND_FreqL1_Main ISLAND_FreqL2_Main ISLAND_FreqL3_Main ISLAND_VL1N_Load ISLAND_VL2N_Load ISLAND_VL3N_Load ISLAND_FreqL1_Load ISLAND_FreqL2_Load ISLAND_FreqL3_Load ISLAND_GridState } }\n      MSA { packagePartNumber packageSerialNumber MSA_InfoMsg { isMIA MSA_appGitHash } METER_Z_AcMeasurements { isMIA METER_Z_CTA_InstRealPower METER_Z_CTA_InstReactivePower METER_Z_CTA_I METER_Z_VL1G METER_Z_CTB_InstRealPower METER_Z_CTB_InstReactivePower METER_Z_CTB_I METER_Z_VL2G } }\n    }\n  }\n  components { msa { partNumber serialNumber signals { name value textValue boolValue timestamp } activeAlerts { name } } }\n}",
            default_params: None,
        },
    );
    m.insert(
        "ComponentsQuery",
        GatewayQuery {
            key: 38,
            signature_b64: "uFC2bUdGBZH1Yb7JZCq4dcCIXHW+VwAMY9NhXAvXmVQ=",
            text: "query ComponentsQuery($pchComponentsFilter: ComponentFilter) {\n  pch: components(filter: $pchComponentsFilter) {\n    partNumber serialNumber\n    signals { name value textValue boolValue timestamp }\n    activeAlerts { name }\n  }\n}",
            default_params: Some(
                "{\"pchComponentsFilter\":{\"types\":[\"PCH\"]}}",
            ),
        },
    );
    m
});

pub fn get_query(name: &str) -> Option<&'static GatewayQuery> {
    QUERIES.get(name)
}

pub fn query_list() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = QUERIES.keys().copied().collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lookup() {
        let q = get_query("DeviceControllerQuery").unwrap();
        assert!(q.text.contains("DeviceControllerQuery"));
        assert!(!q.signature().is_empty());
        assert!(get_query("NoSuchQuery").is_none());
    }

    #[test]
    fn test_query_list_sorted() {
        let names = query_list();
        assert!(names.contains(&"DeviceControllerQuery"));
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
