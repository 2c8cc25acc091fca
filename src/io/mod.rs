//! IO modules - external system interfaces
//!
//! - `link_frame` - Status line parser for both firmware schemas
//! - `serial` - Serial link open, line reader task, latest-frame cell
//! - `command_link` - Deduplicated owner/session commands to the microcontroller
//! - `oracle` - Identity oracle boundary (camera + recognizer helper process)
//! - `telemetry` - Rate-limited fan-out to the telemetry sinks
//! - `mqtt_sink` - MQTT topic-per-field publisher
//! - `log_store` - Remote append-only log (HTTP push)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod command_link;
pub mod link_frame;
pub mod log_store;
pub mod mqtt_sink;
pub mod oracle;
pub mod prometheus;
pub mod serial;
pub mod telemetry;

// Re-export commonly used types
pub use command_link::CommandLink;
pub use log_store::LogStoreSink;
pub use mqtt_sink::MqttSink;
pub use oracle::{Classification, IdentityOracle, SidecarOracle};
pub use serial::{open_link, LatestFrame, LinkMonitor};
pub use telemetry::{RateLimiter, TelemetryFanout, TelemetrySink};
