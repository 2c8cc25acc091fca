//! Integration tests for configuration loading

use gate_fusion::domain::types::LinkSchema;
use gate_fusion::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[link]
port = "/dev/ttyUSB1"
baud = 115200
schema = "legacy"

[camera]
index = 2
backend = "v4l2"

[oracle]
model_path = "/var/lib/gate/face_model.yml"
owner_label = 7
confidence_threshold = 55.5

[debounce]
on_frames = 4
off_frames = 8

[session]
duration_secs = 30

[gate]
threshold_cm = 15

[mqtt]
host = "test-host"
port = 1884
topic_root = "site/gate"
interval_ms = 250

[log_store]
url = "https://db.example.app"
path = "lab/gate_logs"
auth_token = "token"
interval_ms = 2000

[metrics]
interval_secs = 15
prometheus_port = 9091
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.link_port(), "/dev/ttyUSB1");
    assert_eq!(config.link_baud(), 115200);
    assert_eq!(config.link_schema(), LinkSchema::Legacy);
    assert_eq!(config.camera_index(), 2);
    assert_eq!(config.camera_backend(), "v4l2");
    assert_eq!(config.owner_label(), 7);
    assert_eq!(config.confidence_threshold(), 55.5);
    assert_eq!(config.debounce_on_frames(), 4);
    assert_eq!(config.debounce_off_frames(), 8);
    assert_eq!(config.session_duration_secs(), 30);
    assert_eq!(config.gate_threshold_cm(), 15);
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_topic_root(), "site/gate");
    assert_eq!(config.mqtt_interval_ms(), 250);
    assert_eq!(config.log_store_path(), "lab/gate_logs");
    assert_eq!(config.log_store_auth_token(), Some("token"));
    assert_eq!(config.log_store_interval_ms(), 2000);
    assert_eq!(config.prometheus_port(), 9091);
    // untouched sections keep defaults
    assert_eq!(config.tick_ms(), 50);
    assert_eq!(config.max_camera_failures(), 3);
}

#[test]
fn test_invalid_file_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[debounce]\non_frames = 0\n").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());

    let config = Config::load_from_path(&temp_file.path().display().to_string());
    assert_eq!(config.debounce_on_frames(), 3);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.link_schema(), LinkSchema::Session);
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.session_duration_secs(), 20);
}
