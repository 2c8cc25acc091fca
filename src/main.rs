//! Gate fusion gateway
//!
//! Fuses the microcontroller's proximity/motion feed with a camera identity
//! signal and drives the gate's owner/session command lines.
//!
//! Module structure:
//! - `domain/` - Shared types (SensorFrame, FusionOutput, GateEvent)
//! - `io/` - External interfaces (serial link, identity oracle, MQTT, log store)
//! - `services/` - Control logic (stabilizer, session, fusion, gateway loop)
//! - `infra/` - Infrastructure (Config, Metrics, errors)

use anyhow::Context;
use clap::Parser;
use gate_fusion::infra::metrics::SinkKind;
use gate_fusion::infra::{Config, Metrics};
use gate_fusion::io::{open_link, LatestFrame, LinkMonitor, LogStoreSink, MqttSink, SidecarOracle};
use gate_fusion::services::Gateway;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Gate fusion gateway - owner recognition and session control
#[derive(Parser, Debug)]
#[command(name = "gate-fusion", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides; default INFO, RUST_LOG=debug shows rejected link lines
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git = %env!("GIT_HASH"), "gate-fusion starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        link_port = %config.link_port(),
        link_baud = %config.link_baud(),
        schema = %config.link_schema().as_str(),
        camera_index = %config.camera_index(),
        confidence_threshold = %config.confidence_threshold(),
        debounce_on = %config.debounce_on_frames(),
        debounce_off = %config.debounce_off_frames(),
        session_secs = %config.session_duration_secs(),
        mqtt_enabled = %config.mqtt_enabled(),
        log_store_enabled = %config.log_store_enabled(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Startup failures abort before the loop runs
    let (reader, writer) = open_link(&config).await.context("opening microcontroller link")?;
    let oracle = SidecarOracle::spawn(&config).await.context("starting identity oracle")?;

    let latest = Arc::new(LatestFrame::new());
    let monitor = LinkMonitor::new(reader, config.link_schema(), latest.clone(), metrics.clone());
    let reader_shutdown = shutdown_rx.clone();
    let reader_task = tokio::spawn(async move {
        monitor.run(reader_shutdown).await;
    });

    let mut gateway = Gateway::new(&config, writer, Box::new(oracle), latest, metrics.clone())
        .with_reader_task(reader_task);

    if config.mqtt_enabled() {
        gateway.attach_sink(
            SinkKind::Bus,
            Duration::from_millis(config.mqtt_interval_ms()),
            MqttSink::new(&config),
        );
    }

    if config.log_store_enabled() {
        match LogStoreSink::new(&config) {
            Ok(sink) => gateway.attach_sink(
                SinkKind::LogStore,
                Duration::from_millis(config.log_store_interval_ms()),
                sink,
            ),
            Err(e) => error!(error = %e, "log_store_disabled"),
        }
    }

    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                gate_fusion::io::prometheus::start_metrics_server(prometheus_port, prom_metrics, prom_shutdown)
                    .await
            {
                error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    let result = gateway.run(shutdown_rx).await;

    // Stop the reader and the metrics server whichever way the loop ended
    let _ = shutdown_tx.send(true);
    gateway.teardown().await;

    match result {
        Ok(()) => {
            info!("gate-fusion shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "gateway_stopped_on_error");
            Err(e.into())
        }
    }
}
