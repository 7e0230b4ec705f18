//! Capture pipeline - reduces raw detections to one candidate code
//!
//! Codes go through a bounded mailbox into the gate session. The sender
//! checks the published gate phase and never blocks: anything detected
//! while the gate is not scanning, or while the mailbox is full, is dropped
//! and counted.

use crate::domain::types::TicketCode;
use crate::infra::metrics::Metrics;
use crate::services::gate::{GatePhase, GateView};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// First non-blank payload of a detection frame, trimmed
pub fn candidate_code<S: AsRef<str>>(payloads: &[S]) -> Option<TicketCode> {
    payloads.iter().find_map(|p| TicketCode::parse(p.as_ref()))
}

/// What happened to a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureResult {
    Forwarded,
    /// Frame had no usable payload
    Empty,
    /// Gate was not scanning
    NotScanning,
    /// Session has not taken the previous code yet
    MailboxFull,
    Closed,
}

/// Producer side of the capture mailbox; cheap to clone per input source
#[derive(Clone)]
pub struct CaptureSender {
    tx: mpsc::Sender<TicketCode>,
    gate: watch::Receiver<GateView>,
    metrics: Arc<Metrics>,
}

impl CaptureSender {
    pub fn new(
        tx: mpsc::Sender<TicketCode>,
        gate: watch::Receiver<GateView>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { tx, gate, metrics }
    }

    /// Feed one detection frame
    pub fn detect<S: AsRef<str>>(&self, payloads: &[S]) -> CaptureResult {
        let Some(code) = candidate_code(payloads) else {
            return CaptureResult::Empty;
        };

        if self.gate.borrow().phase != GatePhase::Scanning {
            self.metrics.record_capture_dropped();
            debug!(code = %code, "capture_dropped_not_scanning");
            return CaptureResult::NotScanning;
        }

        match self.tx.try_send(code) {
            Ok(()) => CaptureResult::Forwarded,
            Err(TrySendError::Full(code)) => {
                self.metrics.record_capture_dropped();
                debug!(code = %code, "capture_dropped_mailbox_full");
                CaptureResult::MailboxFull
            }
            Err(TrySendError::Closed(_)) => {
                warn!("capture_channel_closed");
                CaptureResult::Closed
            }
        }
    }
}

/// Create the capture mailbox
///
/// Returns the sender for input sources and the receiver for the session.
pub fn create_capture_channel(
    capacity: usize,
    gate: watch::Receiver<GateView>,
    metrics: Arc<Metrics>,
) -> (CaptureSender, mpsc::Receiver<TicketCode>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CaptureSender::new(tx, gate, metrics), rx)
}
