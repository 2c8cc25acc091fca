//! Prometheus metrics HTTP endpoint
//!
//! Exposes gateway metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{
    Metrics, MetricsSummary, SinkSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS,
};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");

    let _ = writeln!(output, "{name}_sum {sum}");
    let _ = writeln!(output, "{name}_count {cumulative}");
}

fn write_sink(output: &mut String, sink: &str, summary: &SinkSummary) {
    for (suffix, help, val) in [
        ("published", "Snapshots delivered", summary.published),
        ("failed", "Snapshots the sink rejected", summary.failed),
        ("dropped", "Snapshots dropped on a full queue", summary.dropped),
    ] {
        let name = format!("gate_{sink}_{suffix}_total");
        write_metric(output, &name, help, MetricType::Counter, val);
    }
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(summary: &MetricsSummary) -> String {
    let mut output = String::with_capacity(4096);

    write_metric(&mut output, "gate_ticks_total", "Control loop ticks", MetricType::Counter, summary.ticks_total);
    write_histogram(
        &mut output,
        "gate_tick_latency_us",
        "Control loop tick latency in microseconds",
        &summary.tick_lat_total_buckets,
        summary.tick_lat_total_sum_us,
    );
    write_metric(&mut output, "gate_link_frames_total", "Link frames parsed", MetricType::Counter, summary.frames_parsed);
    write_metric(
        &mut output,
        "gate_link_frames_rejected_total",
        "Link lines rejected as malformed",
        MetricType::Counter,
        summary.frames_rejected,
    );
    write_metric(&mut output, "gate_recognitions_total", "Frames classified", MetricType::Counter, summary.recognitions);
    write_metric(
        &mut output,
        "gate_camera_failures_total",
        "Failed camera frame reads",
        MetricType::Counter,
        summary.camera_failures,
    );
    write_metric(&mut output, "gate_owner_commands_total", "Owner commands written", MetricType::Counter, summary.owner_commands);
    write_metric(
        &mut output,
        "gate_session_commands_total",
        "Session commands written",
        MetricType::Counter,
        summary.session_commands,
    );
    write_sink(&mut output, "bus", &summary.bus);
    write_sink(&mut output, "log_store", &summary.log_store);
    write_metric(&mut output, "gate_session_active", "Session active (0/1)", MetricType::Gauge, summary.session_active as u64);
    write_metric(
        &mut output,
        "gate_owner_authorized",
        "Owner authorized (0/1)",
        MetricType::Gauge,
        summary.owner_authorized as u64,
    );

    output
}

fn text_response(status: StatusCode, content_type: &str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics.snapshot()),
        ),
        (&Method::GET, "/health") => text_response(StatusCode::OK, "text/plain", "ok".to_string()),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "not found".to_string()),
    };
    Ok(response)
}

/// Serve /metrics and /health until shutdown
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
