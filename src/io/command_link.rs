//! Command dedup layer for the microcontroller link
//!
//! Commands are raw bytes with no framing and no acknowledgement:
//! - session firmware: `O1`/`O0` (owner), `S1`/`S0` (session)
//! - legacy firmware: bare `1`/`0` for owner only
//!
//! A command is written only when it differs from the last one written on
//! its channel. Delivery is at-most-once; a byte lost on the wire is not
//! recovered here.

use crate::domain::types::{Channel, LinkSchema};
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

/// Byte sequence for a channel value, `None` if the firmware lacks the channel
pub fn encode(schema: LinkSchema, channel: Channel, value: bool) -> Option<&'static [u8]> {
    match (schema, channel, value) {
        (LinkSchema::Session, Channel::Owner, true) => Some(b"O1"),
        (LinkSchema::Session, Channel::Owner, false) => Some(b"O0"),
        (LinkSchema::Session, Channel::Session, true) => Some(b"S1"),
        (LinkSchema::Session, Channel::Session, false) => Some(b"S0"),
        (LinkSchema::Legacy, Channel::Owner, true) => Some(b"1"),
        (LinkSchema::Legacy, Channel::Owner, false) => Some(b"0"),
        (LinkSchema::Legacy, Channel::Session, _) => None,
    }
}

/// Single writer over the link's outbound half
pub struct CommandLink<W> {
    writer: W,
    schema: LinkSchema,
    last_sent: [Option<&'static [u8]>; 2],
    metrics: Option<Arc<Metrics>>,
}

impl<W: AsyncWrite + Unpin> CommandLink<W> {
    pub fn new(writer: W, schema: LinkSchema) -> Self {
        Self { writer, schema, last_sent: [None, None], metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Write the command for `(channel, value)` unless it repeats the last one.
    ///
    /// Returns whether bytes were written. The command is recorded as sent
    /// before the write: a failed or partial write is not retried, so the
    /// wire never carries a duplicate or a spliced command.
    pub async fn send(&mut self, channel: Channel, value: bool) -> std::io::Result<bool> {
        let Some(cmd) = encode(self.schema, channel, value) else {
            return Ok(false);
        };
        let slot = &mut self.last_sent[channel.index()];
        if *slot == Some(cmd) {
            return Ok(false);
        }
        *slot = Some(cmd);

        if let Err(e) = write_command(&mut self.writer, cmd).await {
            warn!(channel = %channel.as_str(), error = %e, "command_write_failed");
            return Err(e);
        }

        if let Some(ref metrics) = self.metrics {
            metrics.record_command(channel);
        }
        info!(
            channel = %channel.as_str(),
            cmd = %String::from_utf8_lossy(cmd),
            "command_sent"
        );
        Ok(true)
    }

    /// Last command written on a channel
    pub fn last_sent(&self, channel: Channel) -> Option<&'static [u8]> {
        self.last_sent[channel.index()]
    }

    pub fn schema(&self) -> LinkSchema {
        self.schema
    }

    /// Flush and shut down the outbound half
    pub async fn close(&mut self) -> std::io::Result<()> {
        self.writer.flush().await?;
        self.writer.shutdown().await
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

async fn write_command<W: AsyncWrite + Unpin>(writer: &mut W, cmd: &[u8]) -> std::io::Result<()> {
    writer.write_all(cmd).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    #[tokio::test]
    async fn test_repeat_send_is_suppressed() {
        let mut link = CommandLink::new(Vec::new(), LinkSchema::Session);
        assert!(link.send(Channel::Owner, true).await.unwrap());
        assert!(!link.send(Channel::Owner, true).await.unwrap());
        assert_eq!(link.into_inner(), b"O1".to_vec());
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let mut link = CommandLink::new(Vec::new(), LinkSchema::Session);
        link.send(Channel::Session, true).await.unwrap();
        link.send(Channel::Owner, false).await.unwrap();
        link.send(Channel::Session, true).await.unwrap();
        link.send(Channel::Owner, true).await.unwrap();
        link.send(Channel::Session, false).await.unwrap();
        assert_eq!(link.last_sent(Channel::Session), Some(&b"S0"[..]));
        assert_eq!(link.into_inner(), b"S1O0O1S0".to_vec());
    }

    #[tokio::test]
    async fn test_legacy_owner_only() {
        let mut link = CommandLink::new(Vec::new(), LinkSchema::Legacy);
        assert!(!link.send(Channel::Session, true).await.unwrap());
        assert!(link.send(Channel::Owner, true).await.unwrap());
        assert!(link.send(Channel::Owner, false).await.unwrap());
        assert!(!link.send(Channel::Owner, false).await.unwrap());
        assert_eq!(link.into_inner(), b"10".to_vec());
    }

    #[tokio::test]
    async fn test_records_metrics() {
        let metrics = Arc::new(Metrics::new());
        let mut link =
            CommandLink::new(Vec::new(), LinkSchema::Session).with_metrics(metrics.clone());
        link.send(Channel::Owner, true).await.unwrap();
        link.send(Channel::Owner, true).await.unwrap();
        link.send(Channel::Session, true).await.unwrap();
        let summary = metrics.report();
        assert_eq!(summary.owner_commands, 1);
        assert_eq!(summary.session_commands, 1);
    }

    /// Accepts `budget` bytes, fails the next write, then accepts everything
    struct FlakyWriter {
        wire: Vec<u8>,
        budget: usize,
        failed: bool,
    }

    impl AsyncWrite for FlakyWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            if self.budget == 0 && !self.failed {
                self.failed = true;
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "unplugged",
                )));
            }
            let n = if self.failed { buf.len() } else { buf.len().min(self.budget) };
            self.budget -= n.min(self.budget);
            self.wire.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_partial_write_is_not_retried() {
        let metrics = Arc::new(Metrics::new());
        let writer = FlakyWriter { wire: Vec::new(), budget: 1, failed: false };
        let mut link = CommandLink::new(writer, LinkSchema::Session).with_metrics(metrics.clone());

        assert!(link.send(Channel::Owner, true).await.is_err());
        assert_eq!(link.last_sent(Channel::Owner), Some(&b"O1"[..]));
        assert!(!link.send(Channel::Owner, true).await.unwrap());
        assert_eq!(link.get_ref().wire, b"O".to_vec());

        // the next real change goes out whole
        assert!(link.send(Channel::Owner, false).await.unwrap());
        assert_eq!(link.into_inner().wire, b"OO0".to_vec());
        assert_eq!(metrics.report().owner_commands, 1);
    }
}
