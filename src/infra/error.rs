//! Gateway error taxonomy
//!
//! Startup errors (link, model) abort before the control loop runs; a bad
//! config file falls back to defaults with a warning.
//! Steady-state errors are isolated per tick, except camera reads, which
//! become fatal after a bounded number of consecutive failures.

use thiserror::Error;

/// Why a link status line was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameDecodeError {
    #[error("expected {expected} fields, found {found}")]
    Arity { expected: usize, found: usize },
    #[error("field {index}: expected tag {expected}, found {found:?}")]
    Tag { index: usize, expected: &'static str, found: String },
    #[error("field {index}: invalid number {value:?}")]
    Number { index: usize, value: String },
    #[error("field {index}: invalid flag {value:?}")]
    Flag { index: usize, value: String },
}

/// Failure of one telemetry sink publish
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("mqtt publish failed: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("log store rejected push with status {0}")]
    Status(u16),
    #[error("serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Serial port could not be opened or written
    #[error("link error on {port}: {source}")]
    Link {
        port: String,
        #[source]
        source: std::io::Error,
    },
    /// Camera frame grab failed (or the helper process went away)
    #[error("camera read failed: {0}")]
    CameraRead(String),
    #[error("sink {sink} publish failed: {source}")]
    SinkPublish {
        sink: &'static str,
        #[source]
        source: SinkError,
    },
    /// Identity model missing or helper failed to load it
    #[error("identity model load failed: {0}")]
    ModelLoad(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_decode_display() {
        let err = FrameDecodeError::Arity { expected: 10, found: 3 };
        assert_eq!(err.to_string(), "expected 10 fields, found 3");

        let err = FrameDecodeError::Tag { index: 2, expected: "PIR", found: "OWNER".into() };
        assert_eq!(err.to_string(), "field 2: expected tag PIR, found \"OWNER\"");
    }
}
