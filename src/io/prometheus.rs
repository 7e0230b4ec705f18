//! Prometheus metrics HTTP endpoint
//!
//! Exposes scanner metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::domain::outcome::OutcomeKind;
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
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

/// Write a simple metric (counter or gauge) with site label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {}", avg * count);
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_capture_metrics(&mut output, site_id, &summary);
    write_validation_metrics(&mut output, site_id, &summary);
    write_outcome_metrics(&mut output, site_id, &summary);

    output
}

fn write_capture_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "scanner_captures_accepted_total",
        "Captured codes accepted by the gate",
        MetricType::Counter,
        site,
        summary.captures_accepted,
    );
    write_metric(
        output,
        "scanner_captures_dropped_total",
        "Captured codes dropped because the gate was busy",
        MetricType::Counter,
        site,
        summary.captures_dropped,
    );
    write_metric(
        output,
        "scanner_gate_phase",
        "Gate phase (0=idle, 1=scanning, 2=validating, 3=result)",
        MetricType::Gauge,
        site,
        summary.gate_phase,
    );
}

fn write_validation_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "scanner_validations_total",
        "Validate requests sent to the authority",
        MetricType::Counter,
        site,
        summary.validations_sent,
    );
    write_metric(
        output,
        "scanner_validations_in_flight",
        "Validate requests awaiting a response",
        MetricType::Gauge,
        site,
        summary.validations_in_flight,
    );
    write_metric(
        output,
        "scanner_late_responses_total",
        "Responses discarded because their attempt was no longer pending",
        MetricType::Counter,
        site,
        summary.late_responses_discarded,
    );
    write_metric(
        output,
        "scanner_lookups_total",
        "Read-only lookup requests",
        MetricType::Counter,
        site,
        summary.lookups_sent,
    );
    write_histogram(
        output,
        "scanner_validation_latency_ms",
        "Validate round-trip latency in milliseconds",
        site,
        &summary.latency_buckets,
        summary.latency_avg_ms,
    );
}

fn write_outcome_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let name = "scanner_outcomes_total";
    let _ = writeln!(output, "# HELP {name} Classified scan outcomes");
    let _ = writeln!(output, "# TYPE {name} counter");
    for kind in OutcomeKind::ALL {
        let _ = writeln!(
            output,
            "{name}{{site=\"{site}\",outcome=\"{}\"}} {}",
            kind.as_str(),
            summary.outcome(kind)
        );
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
