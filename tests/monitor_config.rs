use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use ppeye::config::{DetectorKind, MonitorConfig, StoreBackend};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PPEYE_CONFIG",
        "PPEYE_STORE_PATH",
        "PPEYE_STORE_BACKEND",
        "PPEYE_CAMERA_DEVICE",
        "PPEYE_MODEL_PATH",
        "PPEYE_DETECTOR_BACKEND",
        "PPEYE_FRAME_DELAY_MS",
        "PPEYE_DEDUP_WINDOW_SECS",
        "PPEYE_API_ADDR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = MonitorConfig::load().expect("load defaults");

    assert_eq!(cfg.store.path, PathBuf::from("violations.csv"));
    assert_eq!(cfg.store.backend, StoreBackend::Csv);
    assert_eq!(cfg.camera.device, "stub://camera0");
    assert_eq!(cfg.detector.backend, DetectorKind::Stub);
    assert_eq!(cfg.frame_delay, Duration::from_millis(30));
    assert_eq!(cfg.dedup_window, None);
    assert_eq!(cfg.api_addr, "127.0.0.1:8800");
    assert_eq!(cfg.policy.label_for(7), Some("No Helmet"));
    assert_eq!(cfg.policy.label_for(5), Some("No Vest"));
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "store": { "path": "site_a.csv", "backend": "csv", "sync": true },
        "camera": { "device": "stub://gate", "width": 320, "height": 240, "target_fps": 15 },
        "detector": { "backend": "stub", "confidence_threshold": 0.4, "script": [[7], [5, 7]] },
        "loop": { "frame_delay_ms": 10 },
        "policy": { "7": "No Helmet", "5": "No Vest", "9": "No Gloves" },
        "api": { "addr": "127.0.0.1:9100" }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("PPEYE_CONFIG", file.path());
    std::env::set_var("PPEYE_STORE_BACKEND", "sqlite");
    std::env::set_var("PPEYE_STORE_PATH", "site_a.db");
    std::env::set_var("PPEYE_DEDUP_WINDOW_SECS", "5");

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.store.path, PathBuf::from("site_a.db"));
    assert_eq!(cfg.store.backend, StoreBackend::Sqlite);
    assert!(cfg.store.sync);
    assert_eq!(cfg.camera.device, "stub://gate");
    assert_eq!((cfg.camera.width, cfg.camera.height), (320, 240));
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!(cfg.detector.confidence_threshold, 0.4);
    assert_eq!(cfg.detector.script, vec![vec![7], vec![5, 7]]);
    assert_eq!(cfg.frame_delay, Duration::from_millis(10));
    assert_eq!(cfg.policy.label_for(9), Some("No Gloves"));
    assert_eq!(cfg.dedup_window, Some(Duration::from_secs(5)));
    assert_eq!(cfg.api_addr, "127.0.0.1:9100");

    clear_env();
}

#[test]
fn loads_toml_config_with_policy_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("temp dir");
    let policy_path = dir.path().join("policy.toml");
    std::fs::write(&policy_path, "[labels]\n3 = \"No Goggles\"\n").expect("write policy");

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = format!(
        "policy_path = \"{}\"\n\n[store]\npath = \"v.csv\"\n\n[dedup]\nwindow_secs = 30\n",
        policy_path.display()
    );
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = MonitorConfig::load_from(Some(file.path())).expect("load config");

    assert_eq!(cfg.policy.labels().collect::<Vec<_>>(), vec!["No Goggles"]);
    assert_eq!(cfg.store.path, PathBuf::from("v.csv"));
    assert_eq!(cfg.dedup_window, Some(Duration::from_secs(30)));
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut both = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(
        &mut both,
        br#"{ "policy": { "7": "No Helmet" }, "policy_path": "p.toml" }"#,
    )
    .expect("write config");
    assert!(MonitorConfig::load_from(Some(both.path())).is_err());

    std::env::set_var("PPEYE_STORE_BACKEND", "parquet");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("PPEYE_FRAME_DELAY_MS", "fast");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("PPEYE_DEDUP_WINDOW_SECS", "0");
    assert!(MonitorConfig::load().is_err());
    clear_env();
}
