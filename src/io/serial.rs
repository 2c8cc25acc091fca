//! Serial link to the microcontroller
//!
//! The port is split once at startup: the read half goes to a reader task
//! that keeps the receive buffer drained and drops every parsed frame into
//! a single-slot cell (last write wins); the write half goes to the
//! command link owned by the control loop.

use crate::domain::types::{LinkSchema, SensorFrame};
use crate::infra::config::Config;
use crate::infra::error::GatewayError;
use crate::infra::metrics::Metrics;
use crate::io::link_frame;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Longest status line accepted before the buffer is treated as noise
const MAX_LINE_LEN: usize = 256;

/// Single-slot "latest value" hand-off between the reader and the control loop
#[derive(Debug, Default)]
pub struct LatestFrame {
    slot: Mutex<Option<SensorFrame>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a frame, replacing any frame the loop has not consumed yet
    pub fn put(&self, frame: SensorFrame) {
        *self.slot.lock() = Some(frame);
    }

    /// Consume the newest frame, if one arrived since the last call
    pub fn take(&self) -> Option<SensorFrame> {
        self.slot.lock().take()
    }
}

pub type LinkReader = ReadHalf<SerialStream>;
pub type LinkWriter = WriteHalf<SerialStream>;

/// Open the serial port and wait for the board to come out of reset
pub async fn open_link(config: &Config) -> Result<(LinkReader, LinkWriter), GatewayError> {
    let port = tokio_serial::new(config.link_port(), config.link_baud())
        .timeout(Duration::from_millis(100))
        .open_native_async()
        .map_err(|e| GatewayError::Link {
            port: config.link_port().to_string(),
            source: e.into(),
        })?;

    info!(port = %config.link_port(), baud = %config.link_baud(), "link_opened");

    if config.link_settle_ms() > 0 {
        tokio::time::sleep(Duration::from_millis(config.link_settle_ms())).await;
    }

    Ok(tokio::io::split(port))
}

/// Drains status lines from the link and publishes parsed frames
pub struct LinkMonitor<R> {
    reader: BufReader<R>,
    schema: LinkSchema,
    latest: Arc<LatestFrame>,
    metrics: Arc<Metrics>,
}

impl<R: AsyncRead + Unpin> LinkMonitor<R> {
    pub fn new(reader: R, schema: LinkSchema, latest: Arc<LatestFrame>, metrics: Arc<Metrics>) -> Self {
        Self { reader: BufReader::new(reader), schema, latest, metrics }
    }

    /// Handle one raw line; rejected lines leave the cell untouched
    fn handle_line(&self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            return;
        }
        tracing::trace!(line = %line, "link_line");

        match link_frame::parse(line, self.schema) {
            Ok(frame) => {
                self.metrics.record_frame_parsed();
                self.latest.put(frame);
            }
            Err(e) => {
                self.metrics.record_frame_rejected();
                debug!(error = %e, raw = %hex::encode(raw), "link_frame_rejected");
            }
        }
    }

    /// Read until EOF, read error or shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(schema = %self.schema.as_str(), "link_reader_started");
        let mut buf = Vec::with_capacity(MAX_LINE_LEN);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("link_reader_shutdown");
                        return;
                    }
                }
                result = self.reader.read_until(b'\n', &mut buf) => {
                    match result {
                        Ok(0) => {
                            warn!("link_reader_eof");
                            return;
                        }
                        Ok(_) => {
                            if buf.len() > MAX_LINE_LEN {
                                self.metrics.record_frame_rejected();
                                debug!(len = buf.len(), "link_line_too_long");
                            } else {
                                self.handle_line(&buf);
                            }
                            buf.clear();
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(e) => {
                            warn!(error = %e, "link_read_error");
                            return;
                        }
                    }
                }
            }
        }
    }
}
