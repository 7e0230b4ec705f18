//! Mock ticket authority
//!
//! Serves the validate/lookup contract from an in-memory ticket table so a
//! scanner can be exercised locally. Several scanners may point at the same
//! instance; VALID -> USED happens at most once per ticket.
//!
//! Usage:
//!   cargo run --bin mock-authority -- --port 8080 --valid TICKET-VALID-1 --void TICKET-VOID-1
//!   cargo run --bin gate-scanner -- --authority-url http://localhost:8080/api/tickets

use clap::Parser;
use gate_scanner::io::authority_server::serve_authority;
use gate_scanner::io::{InMemoryAuthority, TicketState};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mock-authority")]
#[command(about = "In-memory ticket authority for local simulation")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Path prefix of the API
    #[arg(long, default_value = "/api/tickets")]
    base_path: String,

    /// Ticket codes seeded as VALID (repeatable)
    #[arg(long = "valid")]
    valid: Vec<String>,

    /// Ticket codes seeded as VOID (repeatable)
    #[arg(long = "void")]
    void: Vec<String>,

    /// Ticket codes seeded as already USED (repeatable)
    #[arg(long = "used")]
    used: Vec<String>,

    /// First entry id handed out on admission
    #[arg(long, default_value = "1")]
    first_entry_id: u64,

    /// Delay every response (ms)
    #[arg(long, default_value = "0")]
    delay_ms: u64,

    /// Answer every request with 503
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();

    let authority = Arc::new(InMemoryAuthority::new().with_first_entry_id(args.first_entry_id));
    let seeds = [
        (&args.valid, TicketState::Valid),
        (&args.void, TicketState::Void),
        (&args.used, TicketState::Used),
    ];
    for (codes, state) in seeds {
        for code in codes {
            authority.insert(code.trim(), state);
        }
    }
    if args.delay_ms > 0 {
        authority.set_delay(Some(Duration::from_millis(args.delay_ms)));
    }
    authority.set_offline(args.offline);

    info!(
        port = %args.port,
        valid = %args.valid.len(),
        void = %args.void.len(),
        used = %args.used.len(),
        "mock_authority_seeded"
    );

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    serve_authority(listener, authority, &args.base_path, shutdown_rx).await;
    Ok(())
}
