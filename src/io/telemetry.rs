//! Telemetry fan-out to the message bus and the remote log store
//!
//! Each sink has its own rate limiter, bounded queue and worker task. The
//! control loop only ever does a `try_send`, so a slow or failing sink can
//! neither stall the loop nor hold back the other sink.
//!
//! Snapshots combine the current decision with the last sensor frame seen,
//! which may be one or more link lines old: the feed is eventually
//! consistent, not a point-in-time record.

use crate::domain::types::GateEvent;
use crate::infra::error::{GatewayError, SinkError};
use crate::infra::metrics::{Metrics, SinkKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Queue depth per sink; events beyond this are dropped
pub const SINK_QUEUE_DEPTH: usize = 16;

/// Destination for full telemetry snapshots
#[async_trait]
pub trait TelemetrySink: Send {
    async fn publish(&mut self, event: &GateEvent) -> Result<(), SinkError>;

    /// Release connections on shutdown
    async fn close(&mut self) {}
}

/// Passes at most one publish per interval
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_sent: None }
    }

    /// Returns true (and records `now`) if the interval has elapsed
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.last_sent {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_sent = Some(now);
                true
            }
        }
    }
}

struct Lane {
    kind: SinkKind,
    limiter: RateLimiter,
    tx: mpsc::Sender<GateEvent>,
}

/// Rate-limited, non-blocking fan-out
pub struct TelemetryFanout {
    lanes: Vec<Lane>,
    metrics: Arc<Metrics>,
}

impl TelemetryFanout {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { lanes: Vec::with_capacity(2), metrics }
    }

    /// Register a sink lane and return the receiving end for its worker
    pub fn add_lane(&mut self, kind: SinkKind, interval: Duration) -> mpsc::Receiver<GateEvent> {
        let (tx, rx) = mpsc::channel(SINK_QUEUE_DEPTH);
        self.lanes.push(Lane { kind, limiter: RateLimiter::new(interval), tx });
        rx
    }

    /// Register a sink and spawn its worker
    pub fn attach<S: TelemetrySink + 'static>(
        &mut self,
        kind: SinkKind,
        interval: Duration,
        sink: S,
    ) -> tokio::task::JoinHandle<()> {
        let rx = self.add_lane(kind, interval);
        let worker = SinkWorker::new(kind, sink, rx, self.metrics.clone());
        tokio::spawn(worker.run())
    }

    /// Offer a snapshot to every sink whose interval has elapsed.
    /// Returns how many sinks accepted it.
    pub fn publish(&mut self, event: &GateEvent, now: Instant) -> usize {
        let mut accepted = 0;
        for lane in &mut self.lanes {
            if !lane.limiter.allow(now) {
                continue;
            }
            match lane.tx.try_send(event.clone()) {
                Ok(()) => accepted += 1,
                Err(TrySendError::Full(_)) => {
                    self.metrics.record_sink_dropped(lane.kind);
                    debug!(sink = %lane.kind.as_str(), "telemetry_queue_full");
                }
                Err(TrySendError::Closed(_)) => {
                    self.metrics.record_sink_dropped(lane.kind);
                    debug!(sink = %lane.kind.as_str(), "telemetry_sink_closed");
                }
            }
        }
        accepted
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Close every lane; workers drain what is queued and exit
    pub fn close(&mut self) {
        self.lanes.clear();
    }
}

/// Drives one sink from its queue until the fan-out side is dropped
pub struct SinkWorker<S> {
    kind: SinkKind,
    sink: S,
    rx: mpsc::Receiver<GateEvent>,
    metrics: Arc<Metrics>,
}

impl<S: TelemetrySink> SinkWorker<S> {
    pub fn new(kind: SinkKind, sink: S, rx: mpsc::Receiver<GateEvent>, metrics: Arc<Metrics>) -> Self {
        Self { kind, sink, rx, metrics }
    }

    pub async fn run(mut self) {
        info!(sink = %self.kind.as_str(), "sink_worker_started");

        while let Some(event) = self.rx.recv().await {
            match self.sink.publish(&event).await {
                Ok(()) => {
                    self.metrics.record_sink_published(self.kind);
                    tracing::trace!(sink = %self.kind.as_str(), ts = %event.timestamp, "sink_published");
                }
                Err(source) => {
                    self.metrics.record_sink_failed(self.kind);
                    let err = GatewayError::SinkPublish { sink: self.kind.as_str(), source };
                    warn!(error = %err, "sink_publish_failed");
                }
            }
        }

        self.sink.close().await;
        info!(sink = %self.kind.as_str(), "sink_worker_stopped");
    }
}
