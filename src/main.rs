//! Gate scanner - ticket admission validation at the venue entrance
//!
//! Captures ticket codes, validates each one exactly once against the remote
//! authority and shows an unambiguous admit/deny result until the operator
//! moves on.
//!
//! Module structure:
//! - `domain/` - Core types (TicketCode, DeviceId, ScanAttempt, ValidationOutcome)
//! - `io/` - External interfaces (authority HTTP client, store, console, listener, journal)
//! - `services/` - Workflow logic (device identity, capture, classifier, gate)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use gate_scanner::domain::ValidationOutcome;
use gate_scanner::infra::{Config, Metrics};
use gate_scanner::io::console::run_console;
use gate_scanner::io::{start_scan_listener, FileStore, HttpAuthority, OutcomeJournal, ScanListenerConfig};
use gate_scanner::services::{
    create_capture_channel, get_or_create_device_id, GatePhase, GateSession, GateView,
};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Gate scanner - validates tickets against the admission authority
#[derive(Parser, Debug)]
#[command(name = "gate-scanner", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the authority base URL
    #[arg(long)]
    authority_url: Option<String>,

    /// Enter scanning mode immediately
    #[arg(long)]
    autostart: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default INFO level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "gate-scanner starting");

    let args = Args::parse();

    let config_path = Config::resolve_config_path(args.config.as_deref());
    let mut config = Config::load_from_path(&config_path);
    if let Some(url) = args.authority_url.as_deref() {
        config = config.with_authority_url(url);
    }

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        authority_url = %config.authority_url(),
        authority_timeout_ms = %config.authority_timeout_ms(),
        capture_buffer = %config.capture_buffer(),
        listener_enabled = %config.capture_listener_enabled(),
        journal_file = %config.journal_file(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let store = FileStore::open(config.device_store_file());
    let device_id = get_or_create_device_id(&store);
    info!(device_id = %device_id, "device_identity_ready");

    let authority = Arc::new(HttpAuthority::new(&config)?);
    let metrics = Arc::new(Metrics::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let session = GateSession::new(device_id, authority, metrics.clone())
        .with_journal(OutcomeJournal::new(config.journal_file(), config.site_id()));
    let gate_view = session.subscribe();

    let (capture, capture_rx) =
        create_capture_channel(config.capture_buffer(), gate_view.clone(), metrics.clone());
    let (cmd_tx, cmd_rx) = mpsc::channel(16);

    // Start TCP scan listener
    let listener_config = ScanListenerConfig {
        port: config.capture_listener_port(),
        enabled: config.capture_listener_enabled(),
    };
    let listener_capture = capture.clone();
    let listener_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_scan_listener(listener_config, listener_capture, listener_shutdown).await {
            tracing::error!(error = %e, "scan listener error");
        }
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = gate_scanner::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Periodic metrics summary
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Operator display
    tokio::spawn(render(gate_view));

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    if args.autostart {
        let _ = cmd_tx.send(gate_scanner::services::OperatorCommand::Start).await;
    }

    // Console owns the command sender; the session ends when it closes
    let console_shutdown = shutdown_rx.clone();
    tokio::spawn(run_console(
        BufReader::new(tokio::io::stdin()),
        cmd_tx,
        capture,
        console_shutdown,
    ));

    session.run(cmd_rx, capture_rx, shutdown_rx).await;

    info!("gate-scanner shutdown complete");
    Ok(())
}

/// Print one operator-facing line per gate change
async fn render(mut view: watch::Receiver<GateView>) {
    while view.changed().await.is_ok() {
        let snapshot = (*view.borrow_and_update()).clone();
        match (snapshot.phase, snapshot.outcome) {
            (GatePhase::Idle, _) => println!("[idle] type 'start' to begin scanning"),
            (GatePhase::Scanning, _) => println!("[scanning] present a ticket"),
            (GatePhase::Validating, _) => {
                let code = snapshot.attempt.as_ref().map(|a| a.code.as_str()).unwrap_or("");
                println!("[validating] {code} ...");
            }
            (GatePhase::Result, Some(outcome)) => {
                println!("{}", describe(&outcome));
                println!("type 'next' to scan again");
            }
            (GatePhase::Result, None) => {}
        }
    }
}

fn describe(outcome: &ValidationOutcome) -> String {
    match outcome {
        ValidationOutcome::Authorized { entry_id, previous_state, new_state, .. } => {
            format!("[ADMIT] entry {entry_id} ({previous_state} -> {new_state})")
        }
        ValidationOutcome::DeniedAlreadyUsed { message } => format!("[DENY] already used: {message}"),
        ValidationOutcome::DeniedVoided { message } => format!("[DENY] voided: {message}"),
        ValidationOutcome::DeniedNotFound { message } => format!("[DENY] not found: {message}"),
        ValidationOutcome::ConnectionError { reason } => {
            format!("[ERROR] could not validate ({reason}); scan again")
        }
    }
}
