use gridpulse::datamodel::InverterKind;
use gridpulse::importer::mapping::{is_status_field, map_series, parse_number, ReadingBatch};
use gridpulse::storage::{Store, StoreOptions};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

const TS_NS: i64 = 1_700_000_000_000_000_000;
const TS_MS: i64 = 1_700_000_000_000;

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn map_one(measurement: &str, cols: &[&str], row: Vec<serde_json::Value>) -> ReadingBatch {
    let mut batch = ReadingBatch::default();
    map_series(
        &mut batch,
        measurement,
        &HashMap::new(),
        &columns(cols),
        &[row],
    );
    batch
}

#[test]
fn test_parse_number_accepts_numeric_and_string_forms() {
    assert_eq!(parse_number(&json!(1.5)), Some(1.5));
    assert_eq!(parse_number(&json!(42)), Some(42.0));
    assert_eq!(parse_number(&json!("3.25")), Some(3.25));
    assert_eq!(parse_number(&json!("not a number")), None);
    assert_eq!(parse_number(&json!(null)), None);
    assert_eq!(parse_number(&json!(true)), None);
}

#[test]
fn test_is_status_field() {
    assert!(is_status_field("grid_status"));
    assert!(is_status_field("ISLAND_GridConnected"));
    assert!(is_status_field("services_active"));
    assert!(is_status_field("max_alert_count"));
    assert!(!is_status_field("home"));
    assert!(!is_status_field("PW1_temp"));
}

#[test]
fn test_soe_rescale_on_import() {
    let batch = map_one("soe", &["time", "percentage"], vec![json!(TS_NS), json!(0.83)]);
    assert_eq!(batch.batteries.len(), 1);
    let soe = &batch.batteries[0];
    assert_eq!(soe.timestamp_ms, TS_MS);
    assert_eq!(soe.pod_index, -1);
    assert_eq!(soe.soe, Some(83.0));

    // Values already in percent pass through.
    let batch = map_one("soe", &["time", "percentage"], vec![json!(TS_NS), json!(83.0)]);
    assert_eq!(batch.batteries[0].soe, Some(83.0));

    // The rescale cutoff is strict: exactly 1.01 is not fractional.
    let batch = map_one("soe", &["time", "percentage"], vec![json!(TS_NS), json!(1.01)]);
    assert_eq!(batch.batteries[0].soe, Some(1.01));
    let batch = map_one("soe", &["time", "percentage"], vec![json!(TS_NS), json!(1.0)]);
    assert_eq!(batch.batteries[0].soe, Some(100.0));

    // `value` only routes to SOE under the soe measurement.
    let batch = map_one("soe", &["time", "value"], vec![json!(TS_NS), json!(0.5)]);
    assert_eq!(batch.batteries[0].soe, Some(50.0));
    let batch = map_one("http", &["time", "value"], vec![json!(TS_NS), json!(0.5)]);
    assert!(batch.batteries.is_empty());
}

#[test]
fn test_grid_flow_dual_emission() {
    let batch = map_one("http", &["time", "from_grid"], vec![json!(TS_NS), json!(800.0)]);
    assert_eq!(batch.meters.len(), 2);
    assert!(batch
        .meters
        .iter()
        .any(|m| m.site == "site_import" && m.power == Some(800.0)));
    assert!(batch.meters.iter().any(|m| m.site == "site" && m.power == Some(800.0)));

    let batch = map_one("http", &["time", "to_grid"], vec![json!(TS_NS), json!(300.0)]);
    assert!(batch
        .meters
        .iter()
        .any(|m| m.site == "site_export" && m.power == Some(300.0)));
    assert!(batch.meters.iter().any(|m| m.site == "site" && m.power == Some(-300.0)));

    let batch = map_one("http", &["time", "to_pw"], vec![json!(TS_NS), json!(450.0)]);
    assert!(batch
        .meters
        .iter()
        .any(|m| m.site == "battery_import" && m.power == Some(450.0)));
    assert!(batch
        .meters
        .iter()
        .any(|m| m.site == "battery" && m.power == Some(-450.0)));
}

#[test]
fn test_home_and_solar_columns() {
    let batch = map_one(
        "http",
        &["time", "home", "solar"],
        vec![json!(TS_NS), json!(1100.0), json!(2500.0)],
    );
    assert!(batch.meters.iter().any(|m| m.site == "load" && m.power == Some(1100.0)));
    assert!(batch.meters.iter().any(|m| m.site == "solar" && m.power == Some(2500.0)));
}

#[test]
fn test_zero_is_dropped_except_for_status_fields() {
    let batch = map_one("http", &["time", "home"], vec![json!(TS_NS), json!(0.0)]);
    assert!(batch.is_empty());

    // A numeric zero grid status is a real observation.
    let batch = map_one("http", &["time", "grid_status"], vec![json!(TS_NS), json!(0)]);
    assert_eq!(batch.system.len(), 1);
    assert_eq!(batch.system[0].grid_status, Some(0.0));
}

#[test]
fn test_grid_connected_string_mapping() {
    let batch = map_one(
        "http",
        &["time", "ISLAND_GridConnected"],
        vec![json!(TS_NS), json!("Connected")],
    );
    assert_eq!(batch.system.len(), 1);
    assert_eq!(batch.system[0].grid_status, Some(1.0));

    let batch = map_one(
        "http",
        &["time", "ISLAND_GridConnected"],
        vec![json!(TS_NS), json!("Islanded")],
    );
    assert_eq!(batch.system[0].grid_status, Some(0.0));
}

#[test]
fn test_islander_columns() {
    let batch = map_one(
        "http",
        &["time", "ISLAND_VL1N_Main", "load_frequency_l2"],
        vec![json!(TS_NS), json!(121.4), json!(59.97)],
    );
    assert!(batch
        .meters
        .iter()
        .any(|m| m.site == "site" && m.phase.as_deref() == Some("1") && m.voltage == Some(121.4)));
    assert!(batch
        .meters
        .iter()
        .any(|m| m.site == "load" && m.phase.as_deref() == Some("2") && m.frequency == Some(59.97)));

    // Unphased frequency columns carry no phase label.
    let batch = map_one(
        "http",
        &["time", "grid_frequency"],
        vec![json!(TS_NS), json!(60.02)],
    );
    assert!(batch
        .meters
        .iter()
        .any(|m| m.site == "site" && m.phase.is_none() && m.frequency == Some(60.02)));
}

#[test]
fn test_pw_prefixed_columns() {
    let batch = map_one(
        "vitals",
        &[
            "time",
            "PW1_temp",
            "PW2_PINV_Fout",
            "PW2_p_out",
            "PW1_PINV_VSplit1",
            "PW3_POD_nom_energy_remaining",
        ],
        vec![
            json!(TS_NS),
            json!(31.5),
            json!(60.0),
            json!(1800.0),
            json!(121.0),
            json!(13000.0),
        ],
    );

    // PW<n> is one-based; indices come out zero-based.
    assert!(batch
        .environment
        .iter()
        .any(|e| e.index == 0 && e.ambient_temp == Some(31.5)));
    assert!(batch
        .inverters
        .iter()
        .any(|i| i.index == 1 && i.frequency == Some(60.0) && i.kind == InverterKind::Battery));
    assert!(batch.inverters.iter().any(|i| i.index == 1 && i.power == Some(1800.0)));
    assert!(batch.inverters.iter().any(|i| i.index == 0 && i.voltage1 == Some(121.0)));
    assert!(batch
        .batteries
        .iter()
        .any(|b| b.pod_index == 2 && b.energy_remaining == Some(13000.0)));
}

#[test]
fn test_solar_string_regex_columns() {
    let batch = map_one(
        "strings",
        &["time", "A_Voltage", "A1_Current", "B_Power"],
        vec![json!(TS_NS), json!(395.5), json!(2.1), json!(820.0)],
    );
    assert!(batch
        .solar
        .iter()
        .any(|s| s.string_id == "A" && s.index == 0 && s.voltage == Some(395.5)));
    assert!(batch
        .solar
        .iter()
        .any(|s| s.string_id == "A" && s.index == 1 && s.current == Some(2.1)));
    assert!(batch
        .solar
        .iter()
        .any(|s| s.string_id == "B" && s.index == 0 && s.power == Some(820.0)));
}

#[test]
fn test_fan_columns() {
    // Letter-indexed forms: A -> 0, B -> 1, optional digit added.
    let batch = map_one(
        "pwfans",
        &["time", "A_actual_rpm", "B_target_rpm", "A1_actual_rpm"],
        vec![json!(TS_NS), json!(900.0), json!(1100.0), json!(950.0)],
    );
    assert!(batch
        .environment
        .iter()
        .any(|e| e.index == 0 && e.fan_speed_actual == Some(900.0)));
    assert!(batch
        .environment
        .iter()
        .any(|e| e.index == 1 && e.fan_speed_target == Some(1100.0)));
    assert!(batch
        .environment
        .iter()
        .any(|e| e.index == 1 && e.fan_speed_actual == Some(950.0)));

    // Exact-name forms take the index from the series tags.
    let mut batch = ReadingBatch::default();
    let mut tags = HashMap::new();
    tags.insert("pvac".to_string(), "2".to_string());
    map_series(
        &mut batch,
        "pwfans",
        &tags,
        &columns(&["time", "PVAC_Fan_Speed_Actual_RPM"]),
        &[vec![json!(TS_NS), json!(875.0)]],
    );
    assert!(batch
        .environment
        .iter()
        .any(|e| e.index == 2 && e.fan_speed_actual == Some(875.0)));
}

#[test]
fn test_alert_columns() {
    let batch = map_one(
        "alerts",
        &["time", "max_GridCodesWrite", "PodCommissionTime", "value", "alerts"],
        vec![json!(TS_NS), json!(1.0), json!(0.0), json!(3.0), json!(2.0)],
    );
    // `max_` is stripped, sub-1 values and bookkeeping columns skipped.
    assert_eq!(batch.alerts.len(), 1);
    assert_eq!(batch.alerts[0].name, "GridCodesWrite");
    assert_eq!(batch.alerts[0].source, "control");
}

#[test]
fn test_rows_with_zero_time_are_skipped() {
    let batch = map_one("http", &["time", "home"], vec![json!(0), json!(500.0)]);
    assert!(batch.is_empty());
}

#[test]
fn test_import_idempotence() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(StoreOptions {
        path: dir.path().to_path_buf(),
        retention: Duration::ZERO,
        partition_duration: Duration::from_secs(2 * 3600),
    })
    .unwrap();

    // Recent timestamps so series discovery windows apply.
    let base_ns = chrono::Utc::now().timestamp_millis() * 1_000_000 - 3_600_000_000_000i64;
    let base_sec = base_ns / 1_000_000_000;

    let ingest = |store: &Store| {
        let mut batch = ReadingBatch::default();
        map_series(
            &mut batch,
            "http",
            &HashMap::new(),
            &columns(&["time", "home", "from_grid"]),
            &[
                vec![json!(base_ns), json!(1100.0), json!(800.0)],
                vec![json!(base_ns + 30_000_000_000i64), json!(1150.0), json!(820.0)],
            ],
        );
        store.insert_meter_readings(&batch.meters).unwrap();
        store.checkpoint().unwrap();
    };

    ingest(&store);
    let series_before = store.all_series().unwrap();
    assert!(series_before.contains_key("power_watts"));
    let points_before = store
        .select(
            "power_watts",
            &HashMap::new(),
            base_sec - 60,
            base_sec + 60,
            0,
            "",
        )
        .unwrap();
    assert_eq!(points_before.len(), 6);
    let last_before = store
        .last_point("power_watts", &HashMap::new())
        .unwrap()
        .unwrap();

    // The same chunk again: no new series, no changed points.
    ingest(&store);
    let series_after = store.all_series().unwrap();
    let points_after = store
        .select(
            "power_watts",
            &HashMap::new(),
            base_sec - 60,
            base_sec + 60,
            0,
            "",
        )
        .unwrap();
    let last_after = store
        .last_point("power_watts", &HashMap::new())
        .unwrap()
        .unwrap();

    assert_eq!(series_before.len(), series_after.len());
    for (metric, labels) in &series_before {
        assert_eq!(labels.len(), series_after[metric].len());
    }
    assert_eq!(points_before, points_after);
    assert_eq!(last_before, last_after);
}
