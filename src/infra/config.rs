//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section is optional; missing keys take the defaults below.

use crate::domain::types::LinkSchema;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub port: String,
    pub baud: u32,
    /// Wait after opening the port (the board resets on connect)
    pub settle_ms: u64,
    pub schema: LinkSchema,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud: 9600,
            settle_ms: 2000,
            schema: LinkSchema::Session,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub index: u32,
    pub backend: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { index: 0, backend: "any".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Recognizer helper executable
    pub program: String,
    pub args: Vec<String>,
    pub model_path: String,
    pub owner_label: i32,
    /// Distance-like score; lower is a better match
    pub confidence_threshold: f64,
    pub startup_timeout_ms: u64,
    pub frame_timeout_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            program: "face-oracle".to_string(),
            args: Vec::new(),
            model_path: "face_model.yml".to_string(),
            owner_label: 1,
            confidence_threshold: 70.0,
            startup_timeout_ms: 10_000,
            frame_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub on_frames: u32,
    pub off_frames: u32,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { on_frames: 3, off_frames: 6 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub duration_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { duration_secs: 20 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Advisory open distance for legacy firmware
    pub threshold_cm: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { threshold_cm: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub tick_ms: u64,
    /// Consecutive frame grab failures before the loop stops
    pub max_camera_failures: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { tick_ms: 50, max_camera_failures: 3 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub topic_root: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub interval_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            topic_root: "aiu/gate/aria".to_string(),
            username: None,
            password: None,
            interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogStoreConfig {
    pub enabled: bool,
    /// Database root URL
    pub url: String,
    /// Collection the events are pushed to
    pub path: String,
    pub auth_token: Option<String>,
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://localhost:9000".to_string(),
            path: "gate_logs".to_string(),
            auth_token: None,
            interval_ms: 1500,
            timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 10, prometheus_port: 0 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub link: LinkConfig,
    pub camera: CameraConfig,
    pub oracle: OracleConfig,
    pub debounce: DebounceConfig,
    pub session: SessionConfig,
    pub gate: GateConfig,
    pub control: ControlConfig,
    pub mqtt: MqttConfig,
    pub log_store: LogStoreConfig,
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    link_port: String,
    link_baud: u32,
    link_settle_ms: u64,
    link_schema: LinkSchema,
    camera_index: u32,
    camera_backend: String,
    oracle_program: String,
    oracle_args: Vec<String>,
    model_path: String,
    owner_label: i32,
    confidence_threshold: f64,
    oracle_startup_timeout_ms: u64,
    oracle_frame_timeout_ms: u64,
    debounce_on_frames: u32,
    debounce_off_frames: u32,
    session_duration_secs: u64,
    gate_threshold_cm: u32,
    tick_ms: u64,
    max_camera_failures: u32,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic_root: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_interval_ms: u64,
    log_store_enabled: bool,
    log_store_url: String,
    log_store_path: String,
    log_store_auth_token: Option<String>,
    log_store_interval_ms: u64,
    log_store_timeout_ms: u64,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let TomlConfig { link, camera, oracle, debounce, session, gate, control, mqtt, log_store, metrics } =
            toml_config;
        Self {
            link_port: link.port,
            link_baud: link.baud,
            link_settle_ms: link.settle_ms,
            link_schema: link.schema,
            camera_index: camera.index,
            camera_backend: camera.backend,
            oracle_program: oracle.program,
            oracle_args: oracle.args,
            model_path: oracle.model_path,
            owner_label: oracle.owner_label,
            confidence_threshold: oracle.confidence_threshold,
            oracle_startup_timeout_ms: oracle.startup_timeout_ms,
            oracle_frame_timeout_ms: oracle.frame_timeout_ms,
            debounce_on_frames: debounce.on_frames,
            debounce_off_frames: debounce.off_frames,
            session_duration_secs: session.duration_secs,
            gate_threshold_cm: gate.threshold_cm,
            tick_ms: control.tick_ms,
            max_camera_failures: control.max_camera_failures,
            mqtt_enabled: mqtt.enabled,
            mqtt_host: mqtt.host,
            mqtt_port: mqtt.port,
            mqtt_topic_root: mqtt.topic_root,
            mqtt_username: mqtt.username,
            mqtt_password: mqtt.password,
            mqtt_interval_ms: mqtt.interval_ms,
            log_store_enabled: log_store.enabled,
            log_store_url: log_store.url,
            log_store_path: log_store.path,
            log_store_auth_token: log_store.auth_token,
            log_store_interval_ms: log_store.interval_ms,
            log_store_timeout_ms: log_store.timeout_ms,
            metrics_interval_secs: metrics.interval_secs,
            prometheus_port: metrics.prometheus_port,
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, path.display().to_string());
        config.validate().with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.tick_ms > 0, "control.tick_ms must be positive");
        anyhow::ensure!(self.max_camera_failures > 0, "control.max_camera_failures must be positive");
        anyhow::ensure!(
            self.debounce_on_frames > 0 && self.debounce_off_frames > 0,
            "debounce frame counts must be positive"
        );
        anyhow::ensure!(
            self.confidence_threshold.is_finite() && self.confidence_threshold > 0.0,
            "oracle.confidence_threshold must be a positive number"
        );
        Ok(())
    }

    pub fn link_port(&self) -> &str {
        &self.link_port
    }

    pub fn link_baud(&self) -> u32 {
        self.link_baud
    }

    pub fn link_settle_ms(&self) -> u64 {
        self.link_settle_ms
    }

    pub fn link_schema(&self) -> LinkSchema {
        self.link_schema
    }

    pub fn camera_index(&self) -> u32 {
        self.camera_index
    }

    pub fn camera_backend(&self) -> &str {
        &self.camera_backend
    }

    pub fn oracle_program(&self) -> &str {
        &self.oracle_program
    }

    pub fn oracle_args(&self) -> &[String] {
        &self.oracle_args
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    pub fn owner_label(&self) -> i32 {
        self.owner_label
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    pub fn oracle_startup_timeout_ms(&self) -> u64 {
        self.oracle_startup_timeout_ms
    }

    pub fn oracle_frame_timeout_ms(&self) -> u64 {
        self.oracle_frame_timeout_ms
    }

    pub fn debounce_on_frames(&self) -> u32 {
        self.debounce_on_frames
    }

    pub fn debounce_off_frames(&self) -> u32 {
        self.debounce_off_frames
    }

    pub fn session_duration_secs(&self) -> u64 {
        self.session_duration_secs
    }

    pub fn gate_threshold_cm(&self) -> u32 {
        self.gate_threshold_cm
    }

    pub fn tick_ms(&self) -> u64 {
        self.tick_ms
    }

    pub fn max_camera_failures(&self) -> u32 {
        self.max_camera_failures
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic_root(&self) -> &str {
        &self.mqtt_topic_root
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_interval_ms(&self) -> u64 {
        self.mqtt_interval_ms
    }

    pub fn log_store_enabled(&self) -> bool {
        self.log_store_enabled
    }

    pub fn log_store_url(&self) -> &str {
        &self.log_store_url
    }

    pub fn log_store_path(&self) -> &str {
        &self.log_store_path
    }

    pub fn log_store_auth_token(&self) -> Option<&str> {
        self.log_store_auth_token.as_deref()
    }

    pub fn log_store_interval_ms(&self) -> u64 {
        self.log_store_interval_ms
    }

    pub fn log_store_timeout_ms(&self) -> u64 {
        self.log_store_timeout_ms
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to switch firmware schema
    pub fn with_link_schema(mut self, schema: LinkSchema) -> Self {
        self.link_schema = schema;
        self
    }

    /// Builder method to set debounce thresholds
    pub fn with_debounce(mut self, on_frames: u32, off_frames: u32) -> Self {
        self.debounce_on_frames = on_frames;
        self.debounce_off_frames = off_frames;
        self
    }

    /// Builder method to set session duration
    pub fn with_session_duration_secs(mut self, secs: u64) -> Self {
        self.session_duration_secs = secs;
        self
    }

    /// Builder method to point at a different model file
    pub fn with_model_path(mut self, path: &str) -> Self {
        self.model_path = path.to_string();
        self
    }
}
