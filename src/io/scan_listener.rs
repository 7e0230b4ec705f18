//! TCP listener for networked scanners
//!
//! Protocol: one detection frame per line. A frame may carry several
//! payloads separated by tabs (multi-barcode readers); the capture pipeline
//! takes the first non-blank one.

use crate::services::capture::{CaptureResult, CaptureSender};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ScanListenerConfig {
    pub port: u16,
    pub enabled: bool,
}

impl Default for ScanListenerConfig {
    fn default() -> Self {
        Self { port: 25900, enabled: false }
    }
}

/// Split a received line into detection payloads
pub fn split_frame(line: &str) -> Vec<&str> {
    line.split('\t').collect()
}

/// Start the scan listener
///
/// Every connection feeds the shared capture sender; nothing blocks on the
/// gate, busy-gate drops are counted by the sender.
pub async fn start_scan_listener(
    config: ScanListenerConfig,
    capture: CaptureSender,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !config.enabled {
        info!("scan_listener_disabled");
        return Ok(());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(port = %config.port, "scan_listener_started");
    serve(listener, capture, &mut shutdown).await;
    Ok(())
}

async fn serve(listener: TcpListener, capture: CaptureSender, shutdown: &mut watch::Receiver<bool>) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("scan_listener_shutdown");
                    return;
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let capture = capture.clone();
                        tokio::spawn(async move {
                            handle_connection(socket, addr, capture).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "scan_listener_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_connection(socket: tokio::net::TcpStream, addr: SocketAddr, capture: CaptureSender) {
    let peer = addr.to_string();
    debug!(peer = %peer, "scanner_connected");

    let mut lines = BufReader::new(socket).lines();

    // Rate-limit drop logging to 1 per second
    let mut last_drop_log = Instant::now() - Duration::from_secs(2);

    while let Ok(Some(line)) = lines.next_line().await {
        match capture.detect(&split_frame(&line)) {
            CaptureResult::Forwarded => debug!(peer = %peer, "scan_received"),
            CaptureResult::Empty => {}
            CaptureResult::NotScanning | CaptureResult::MailboxFull => {
                if last_drop_log.elapsed() > Duration::from_secs(1) {
                    debug!(peer = %peer, "scan_dropped_gate_busy");
                    last_drop_log = Instant::now();
                }
            }
            CaptureResult::Closed => {
                warn!(peer = %peer, "scan_channel_closed");
                break;
            }
        }
    }

    debug!(peer = %peer, "scanner_disconnected");
}
