//! Operator console on stdin
//!
//! Line protocol:
//! - `start`, `next`, `stop` drive the gate
//! - `lookup <code>` queries a ticket without consuming it
//! - `quit` ends the session
//! - anything else is a scanned payload (keyboard-wedge scanners type the
//!   code followed by Enter)

use crate::domain::types::TicketCode;
use crate::services::capture::{CaptureResult, CaptureSender};
use crate::services::gate_session::OperatorCommand;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    Command(OperatorCommand),
    Scan(String),
    Quit,
}

/// Parse one console line. Blank lines yield `None`
pub fn parse_console_line(line: &str) -> Option<ConsoleInput> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let input = match (word.to_ascii_lowercase().as_str(), rest.is_empty()) {
        ("start", true) => ConsoleInput::Command(OperatorCommand::Start),
        ("next", true) => ConsoleInput::Command(OperatorCommand::ScanNext),
        ("stop", true) => ConsoleInput::Command(OperatorCommand::Stop),
        ("quit" | "exit", true) => ConsoleInput::Quit,
        ("lookup", false) => match TicketCode::parse(rest) {
            Some(code) => ConsoleInput::Command(OperatorCommand::Lookup(code)),
            None => ConsoleInput::Scan(line.to_string()),
        },
        _ => ConsoleInput::Scan(line.to_string()),
    };
    Some(input)
}

/// Read operator input until EOF, `quit`, or shutdown
///
/// Returning drops `commands`, which ends the gate session.
pub async fn run_console<R: AsyncBufRead + Unpin>(
    reader: R,
    commands: mpsc::Sender<OperatorCommand>,
    capture: CaptureSender,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut lines = reader.lines();
    info!("console_ready");

    loop {
        let line = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "console_read_failed");
                break;
            }
        };

        match parse_console_line(&line) {
            Some(ConsoleInput::Command(cmd)) => {
                if commands.send(cmd).await.is_err() {
                    break;
                }
            }
            Some(ConsoleInput::Scan(payload)) => {
                let result = capture.detect(&[payload]);
                if result != CaptureResult::Forwarded {
                    debug!(result = ?result, "console_scan_not_forwarded");
                }
            }
            Some(ConsoleInput::Quit) => break,
            None => {}
        }
    }

    info!("console_closed");
}
