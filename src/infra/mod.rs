//! Infrastructure - configuration, errors and metrics
//!
//! - `config` - Application configuration (TOML loading, defaults)
//! - `error` - Error taxonomy
//! - `metrics` - Lock-free metrics collection

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::Config;
pub use error::GatewayError;
pub use metrics::Metrics;
