//! Remote append-only log store
//!
//! Each accepted snapshot is pushed with one HTTP POST to
//! `<url>/<path>.json`, the REST push form of a realtime database: the
//! server assigns the child key, so entries are never overwritten.

use crate::domain::types::GateEvent;
use crate::infra::config::Config;
use crate::infra::error::SinkError;
use crate::io::telemetry::TelemetrySink;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

pub struct LogStoreSink {
    client: reqwest::Client,
    push_url: String,
    auth_token: Option<String>,
}

/// Push endpoint for a collection path
pub fn push_url(base: &str, path: &str) -> String {
    format!("{}/{}.json", base.trim_end_matches('/'), path.trim_matches('/'))
}

impl LogStoreSink {
    pub fn new(config: &Config) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.log_store_timeout_ms()))
            .build()?;
        let push_url = push_url(config.log_store_url(), config.log_store_path());

        info!(url = %push_url, "log_store_sink_created");

        Ok(Self {
            client,
            push_url,
            auth_token: config.log_store_auth_token().map(str::to_string),
        })
    }
}

#[async_trait]
impl TelemetrySink for LogStoreSink {
    async fn publish(&mut self, event: &GateEvent) -> Result<(), SinkError> {
        let mut request = self.client.post(&self.push_url).json(event);
        if let Some(ref token) = self.auth_token {
            request = request.query(&[("auth", token.as_str())]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }

        debug!(status = %status.as_u16(), ts = %event.timestamp, "log_store_pushed");
        Ok(())
    }
}
