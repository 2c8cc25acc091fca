//! Gateway control loop
//!
//! One tick takes the freshest sensor frame, evaluates the session, asks the
//! identity oracle to classify a frame while a session is active, writes the
//! changed commands and offers a telemetry snapshot to the fan-out. All
//! controller state is owned here and only mutated inside `tick`.
//!
//! Camera failures skip the tick and leave the previous decision in place;
//! `max_camera_failures` consecutive failures end the loop.

use crate::domain::types::{epoch_secs, Channel, FusionOutput, GateEvent};
use crate::infra::config::Config;
use crate::infra::error::GatewayError;
use crate::infra::metrics::{Metrics, SinkKind};
use crate::io::command_link::CommandLink;
use crate::io::oracle::IdentityOracle;
use crate::io::serial::LatestFrame;
use crate::io::telemetry::{TelemetryFanout, TelemetrySink};
use crate::services::fusion::{FusionController, SessionTransition};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Whether the loop keeps running after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// Operator asked the oracle to stop
    Stop,
}

pub struct Gateway<W> {
    fusion: FusionController,
    link: CommandLink<W>,
    oracle: Box<dyn IdentityOracle>,
    latest: Arc<LatestFrame>,
    fanout: TelemetryFanout,
    sink_tasks: Vec<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    metrics: Arc<Metrics>,
    tick_period: Duration,
    max_camera_failures: u32,
    camera_failures: u32,
    output: FusionOutput,
    status: Option<String>,
}

impl<W: AsyncWrite + Unpin + Send> Gateway<W> {
    pub fn new(
        config: &Config,
        writer: W,
        oracle: Box<dyn IdentityOracle>,
        latest: Arc<LatestFrame>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            fusion: FusionController::from_config(config),
            link: CommandLink::new(writer, config.link_schema()).with_metrics(metrics.clone()),
            oracle,
            latest,
            fanout: TelemetryFanout::new(metrics.clone()),
            sink_tasks: Vec::new(),
            reader_task: None,
            metrics,
            tick_period: Duration::from_millis(config.tick_ms().max(1)),
            max_camera_failures: config.max_camera_failures().max(1),
            camera_failures: 0,
            output: FusionOutput::default(),
            status: None,
        }
    }

    /// Link reader task, aborted on teardown
    pub fn with_reader_task(mut self, handle: JoinHandle<()>) -> Self {
        self.reader_task = Some(handle);
        self
    }

    /// Spawn a worker for `sink`, fed at most once per `interval`
    pub fn attach_sink<S: TelemetrySink + 'static>(&mut self, kind: SinkKind, interval: Duration, sink: S) {
        let handle = self.fanout.attach(kind, interval, sink);
        self.sink_tasks.push(handle);
    }

    /// Raw telemetry lane; the caller drives the receiving end
    pub fn add_telemetry_lane(&mut self, kind: SinkKind, interval: Duration) -> mpsc::Receiver<GateEvent> {
        self.fanout.add_lane(kind, interval)
    }

    /// Decision in effect after the last completed tick
    pub fn output(&self) -> FusionOutput {
        self.output
    }

    pub fn command_link(&self) -> &CommandLink<W> {
        &self.link
    }

    pub fn fusion(&self) -> &FusionController {
        &self.fusion
    }

    pub async fn tick(&mut self, now: Instant) -> Result<TickOutcome, GatewayError> {
        let started = Instant::now();

        if let Some(frame) = self.latest.take() {
            self.fusion.observe_link(frame, now);
        }

        let plan = self.fusion.advance(now);
        if plan.transition == SessionTransition::Expired {
            self.oracle.idle().await;
        }

        let mut outcome = TickOutcome::Continue;
        if plan.recognize {
            match self.oracle.classify().await {
                Ok(classification) => {
                    self.camera_failures = 0;
                    self.metrics.record_recognition();
                    self.fusion.fold_recognition(&classification.observations);
                    if classification.stop_requested {
                        outcome = TickOutcome::Stop;
                    }
                }
                Err(e) => {
                    self.camera_failures += 1;
                    self.metrics.record_camera_failure();
                    if self.camera_failures >= self.max_camera_failures {
                        error!(
                            error = %e,
                            consecutive = self.camera_failures,
                            "camera_read_fatal"
                        );
                        return Err(e);
                    }
                    warn!(
                        error = %e,
                        consecutive = self.camera_failures,
                        max = self.max_camera_failures,
                        "camera_read_failed"
                    );
                    return Ok(TickOutcome::Continue);
                }
            }
        }

        self.output = self.fusion.output();
        self.send_commands().await;
        self.publish_telemetry(now);
        self.log_status();

        self.metrics.record_tick(started.elapsed().as_micros() as u64, &self.output);
        Ok(outcome)
    }

    /// Session before owner, so a session opening on this tick reaches the
    /// firmware ahead of the owner grant
    async fn send_commands(&mut self) {
        if self.fusion.has_session() {
            if let Err(e) = self.link.send(Channel::Session, self.output.session_active).await {
                debug!(error = %e, "session_command_lost");
            }
        }
        if let Err(e) = self.link.send(Channel::Owner, self.output.owner_authorized).await {
            debug!(error = %e, "owner_command_lost");
        }
    }

    fn publish_telemetry(&mut self, now: Instant) {
        let Some(frame) = self.fusion.last_frame() else {
            return;
        };
        let event = GateEvent::snapshot(epoch_secs(), frame, &self.output);
        self.fanout.publish(&event, now);
    }

    /// Log a status line only when what it shows changes
    fn log_status(&mut self) {
        let distance = self
            .fusion
            .last_frame()
            .map(|f| f.distance_cm.to_string())
            .unwrap_or_else(|| "-".to_string());
        let gate = self.fusion.last_frame().is_some_and(|f| f.gate_open);
        let status = format!(
            "dist={distance} owner={} session={} gate={}",
            self.output.owner_authorized, self.output.session_active, gate
        );
        if self.status.as_deref() != Some(status.as_str()) {
            info!(
                distance_cm = %distance,
                owner = %self.output.owner_authorized,
                session = %self.output.session_active,
                gate_open = %gate,
                advise_open = %self.output.gate_should_open,
                "gate_status"
            );
            self.status = Some(status);
        }
    }

    /// Tick until shutdown, an oracle stop request or a fatal camera error
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), GatewayError> {
        let mut interval = tokio::time::interval(self.tick_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            tick_ms = %self.tick_period.as_millis(),
            schema = %self.link.schema().as_str(),
            sinks = self.fanout.lane_count(),
            "gateway_loop_started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("gateway_shutdown_requested");
                        return Ok(());
                    }
                }
                _ = interval.tick() => {
                    if self.tick(Instant::now()).await? == TickOutcome::Stop {
                        info!("gateway_stop_requested");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Release camera, close the link, then drain and disconnect the sinks.
    /// Runs after every exit from `run`, including errors.
    pub async fn teardown(&mut self) {
        self.oracle.shutdown().await;

        if let Err(e) = self.link.close().await {
            warn!(error = %e, "link_close_failed");
        }
        if let Some(handle) = self.reader_task.take() {
            handle.abort();
        }

        self.fanout.close();
        for handle in self.sink_tasks.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "sink_worker_join_failed");
            }
        }

        info!(ticks = self.metrics.ticks_total(), "gateway_teardown_complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{IdentityObservation, LinkSchema, Region, SensorFrame};
    use crate::io::oracle::Classification;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Step {
        Empty,
        Owner,
        Fail,
        Stop,
    }

    /// Replays one step per classify call; empty frames once the script runs out
    struct ScriptedOracle {
        script: HashMap<usize, Step>,
        calls: usize,
        idles: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
    }

    impl ScriptedOracle {
        fn new(steps: &[(usize, Step)]) -> Self {
            Self {
                script: steps.iter().copied().collect(),
                calls: 0,
                idles: Arc::new(AtomicUsize::new(0)),
                shutdowns: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl IdentityOracle for ScriptedOracle {
        async fn classify(&mut self) -> Result<Classification, GatewayError> {
            let step = self.script.get(&self.calls).copied().unwrap_or(Step::Empty);
            self.calls += 1;
            let owner = IdentityObservation {
                region: Region { x: 0, y: 0, w: 64, h: 64 },
                label: Some(1),
                confidence: 42.0,
            };
            match step {
                Step::Empty => Ok(Classification::default()),
                Step::Owner => Ok(Classification {
                    observations: [owner].into_iter().collect(),
                    stop_requested: false,
                }),
                Step::Fail => Err(GatewayError::CameraRead("no frame".to_string())),
                Step::Stop => Ok(Classification { observations: Default::default(), stop_requested: true }),
            }
        }

        async fn idle(&mut self) {
            self.idles.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame(distance_cm: u32, motion: bool) -> SensorFrame {
        SensorFrame {
            distance_cm,
            motion_detected: motion,
            gate_open: false,
            session_echo: Some(false),
            owner_echo: Some(false),
        }
    }

    fn gateway(config: &Config, oracle: ScriptedOracle) -> (Gateway<Vec<u8>>, Arc<LatestFrame>, Arc<Metrics>) {
        let latest = Arc::new(LatestFrame::new());
        let metrics = Arc::new(Metrics::new());
        let gw = Gateway::new(config, Vec::new(), Box::new(oracle), latest.clone(), metrics.clone());
        (gw, latest, metrics)
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[tokio::test]
    async fn test_idle_gateway_sends_off_commands_once() {
        let (mut gw, latest, metrics) = gateway(&Config::default(), ScriptedOracle::new(&[]));
        let t0 = Instant::now();
        latest.put(frame(80, false));

        for i in 0..5 {
            assert_eq!(gw.tick(t0 + secs(i)).await.unwrap(), TickOutcome::Continue);
        }

        assert_eq!(gw.command_link().get_ref().as_slice(), b"S0O0");
        assert_eq!(metrics.report().recognitions, 0);
        assert_eq!(gw.output(), FusionOutput::default());
    }

    #[tokio::test]
    async fn test_session_expiry_overrides_owner_and_idles_oracle() {
        let oracle = ScriptedOracle::new(&[(0, Step::Owner), (1, Step::Owner), (2, Step::Owner)]);
        let idles = oracle.idles.clone();
        let config = Config::default().with_session_duration_secs(5);
        let (mut gw, latest, _) = gateway(&config, oracle);
        let t0 = Instant::now();

        latest.put(frame(30, true));
        for i in 0..3 {
            gw.tick(t0 + secs(i)).await.unwrap();
        }
        assert!(gw.output().owner_authorized);
        assert!(gw.output().gate_should_open);

        gw.tick(t0 + secs(6)).await.unwrap();
        assert!(!gw.output().session_active);
        assert!(!gw.output().owner_authorized);
        assert_eq!(idles.load(Ordering::SeqCst), 1);
        assert_eq!(gw.command_link().get_ref().as_slice(), b"S1O0O1S0O0");
    }

    #[tokio::test]
    async fn test_camera_failure_skips_tick() {
        let oracle = ScriptedOracle::new(&[(0, Step::Fail)]);
        let (mut gw, latest, metrics) = gateway(&Config::default(), oracle);
        let t0 = Instant::now();
        latest.put(frame(30, true));

        assert_eq!(gw.tick(t0).await.unwrap(), TickOutcome::Continue);
        assert!(gw.command_link().get_ref().is_empty());
        assert_eq!(gw.output(), FusionOutput::default());

        gw.tick(t0 + secs(1)).await.unwrap();
        assert_eq!(gw.command_link().get_ref().as_slice(), b"S1O0");
        let summary = metrics.report();
        assert_eq!(summary.camera_failures, 1);
        assert_eq!(summary.recognitions, 1);
        assert_eq!(summary.ticks_total, 1);
    }

    #[tokio::test]
    async fn test_consecutive_camera_failures_are_fatal() {
        let oracle = ScriptedOracle::new(&[
            (0, Step::Fail),
            (1, Step::Fail),
            (2, Step::Empty),
            (3, Step::Fail),
            (4, Step::Fail),
            (5, Step::Fail),
        ]);
        let (mut gw, latest, _) = gateway(&Config::default(), oracle);
        let t0 = Instant::now();
        latest.put(frame(30, true));

        for i in 0..5 {
            assert!(gw.tick(t0 + secs(i)).await.is_ok(), "tick {i}");
        }
        let err = gw.tick(t0 + secs(5)).await.unwrap_err();
        assert!(matches!(err, GatewayError::CameraRead(_)));
    }

    #[tokio::test]
    async fn test_stop_request_ends_loop() {
        let oracle = ScriptedOracle::new(&[(1, Step::Stop)]);
        let (mut gw, latest, _) = gateway(&Config::default(), oracle);
        let t0 = Instant::now();
        latest.put(frame(30, true));

        assert_eq!(gw.tick(t0).await.unwrap(), TickOutcome::Continue);
        assert_eq!(gw.tick(t0 + secs(1)).await.unwrap(), TickOutcome::Stop);
    }

    #[tokio::test]
    async fn test_legacy_recognizes_every_tick() {
        let oracle = ScriptedOracle::new(&[(0, Step::Owner), (1, Step::Owner), (2, Step::Owner)]);
        let config = Config::default().with_link_schema(LinkSchema::Legacy);
        let (mut gw, latest, metrics) = gateway(&config, oracle);
        let t0 = Instant::now();
        latest.put(SensorFrame { session_echo: None, ..frame(8, false) });

        for i in 0..3 {
            gw.tick(t0 + secs(i)).await.unwrap();
        }

        let out = gw.output();
        assert!(!out.session_active);
        assert!(out.owner_authorized);
        assert!(out.gate_should_open);
        assert_eq!(gw.command_link().get_ref().as_slice(), b"01");
        assert_eq!(metrics.report().recognitions, 3);
    }

    #[tokio::test]
    async fn test_telemetry_waits_for_first_frame() {
        let (mut gw, latest, _) = gateway(&Config::default(), ScriptedOracle::new(&[]));
        let mut bus = gw.add_telemetry_lane(SinkKind::Bus, Duration::ZERO);
        let t0 = Instant::now();

        gw.tick(t0).await.unwrap();
        assert!(bus.try_recv().is_err());

        latest.put(frame(44, false));
        gw.tick(t0 + secs(1)).await.unwrap();
        gw.tick(t0 + secs(2)).await.unwrap();

        let first = bus.try_recv().unwrap();
        assert_eq!(first.distance_cm, 44);
        assert!(!first.session_active);
        // stale frame still reported on the next tick
        assert_eq!(bus.try_recv().unwrap().distance_cm, 44);
    }

    #[tokio::test]
    async fn test_teardown_releases_oracle() {
        let oracle = ScriptedOracle::new(&[]);
        let shutdowns = oracle.shutdowns.clone();
        let (mut gw, _, _) = gateway(&Config::default(), oracle);

        gw.teardown().await;
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
