//! Gate session - drives the gate state machine for one device
//!
//! A single `select!` loop serializes operator commands, captured codes and
//! validation results onto `gate::transition`. The validate call runs in a
//! spawned task and posts its outcome back tagged with the attempt id, so the
//! loop never blocks on the network and a stopped attempt can be aborted.
//! Results for any attempt other than the outstanding one are discarded.
//!
//! At most one authority call is outstanding per device. A lookup is refused
//! while a validate is in flight, and a submit first waits out any running
//! lookup or aborted validate.

use crate::domain::outcome::ValidationOutcome;
use crate::domain::types::{AttemptId, DeviceId, ScanAttempt, TicketCode};
use crate::infra::metrics::Metrics;
use crate::io::authority::Authority;
use crate::io::journal::OutcomeJournal;
use crate::services::classifier::classify;
use crate::services::gate::{transition, GateCommand, GateEvent, GateState, GateView};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Operator actions
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Start,
    ScanNext,
    Stop,
    /// Read-only ticket query; never changes gate state
    Lookup(TicketCode),
}

/// Result posted back by a validate task
#[derive(Debug)]
struct Completed {
    attempt_id: AttemptId,
    outcome: ValidationOutcome,
    latency_ms: u64,
}

struct InFlight {
    attempt_id: AttemptId,
    handle: JoinHandle<()>,
}

pub struct GateSession {
    state: GateState,
    device_id: DeviceId,
    authority: Arc<dyn Authority>,
    metrics: Arc<Metrics>,
    journal: Option<OutcomeJournal>,
    view_tx: watch::Sender<GateView>,
    completed_tx: mpsc::Sender<Completed>,
    completed_rx: Option<mpsc::Receiver<Completed>>,
    next_attempt: u64,
    in_flight: Option<InFlight>,
    /// Aborted task not yet reaped
    cancelled: Option<JoinHandle<()>>,
    lookup: Option<JoinHandle<()>>,
}

impl GateSession {
    pub fn new(device_id: DeviceId, authority: Arc<dyn Authority>, metrics: Arc<Metrics>) -> Self {
        let (view_tx, _) = watch::channel(GateView::default());
        let (completed_tx, completed_rx) = mpsc::channel(8);
        Self {
            state: GateState::Idle,
            device_id,
            authority,
            metrics,
            journal: None,
            view_tx,
            completed_tx,
            completed_rx: Some(completed_rx),
            next_attempt: 0,
            in_flight: None,
            cancelled: None,
            lookup: None,
        }
    }

    pub fn with_journal(mut self, journal: OutcomeJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Subscribe to gate snapshots (rendering, capture gating)
    pub fn subscribe(&self) -> watch::Receiver<GateView> {
        self.view_tx.subscribe()
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    /// Run until the operator channel closes or shutdown is signalled
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<OperatorCommand>,
        mut captures: mpsc::Receiver<TicketCode>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let Some(mut completed_rx) = self.completed_rx.take() else {
            warn!("gate_session_already_run");
            return;
        };

        info!(device_id = %self.device_id, "gate_session_started");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                cmd = commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                Some(done) = completed_rx.recv() => {
                    self.handle_completed(done);
                }
                Some(code) = captures.recv() => {
                    self.handle_capture(code).await;
                }
            }
        }

        self.apply(GateEvent::Stop).await;
        info!(device_id = %self.device_id, "gate_session_stopped");
    }

    async fn handle_command(&mut self, cmd: OperatorCommand) {
        debug!(command = ?cmd, "operator_command");
        match cmd {
            OperatorCommand::Start => self.apply(GateEvent::Start).await,
            OperatorCommand::ScanNext => self.apply(GateEvent::ScanNext).await,
            OperatorCommand::Stop => self.apply(GateEvent::Stop).await,
            OperatorCommand::Lookup(code) => self.spawn_lookup(code),
        }
    }

    async fn handle_capture(&mut self, code: TicketCode) {
        if !self.state.accepts_captures() {
            // Sent before the phase change was visible to the capture side
            self.metrics.record_capture_dropped();
            debug!(code = %code, phase = %self.state.phase().as_str(), "capture_ignored");
            return;
        }

        self.metrics.record_capture_accepted();
        self.next_attempt += 1;
        let attempt = ScanAttempt::new(AttemptId(self.next_attempt), code, self.device_id.clone());
        self.apply(GateEvent::CodeCaptured(attempt)).await;
    }

    fn handle_completed(&mut self, done: Completed) {
        if self.in_flight.as_ref().map(|f| f.attempt_id) == Some(done.attempt_id) {
            self.in_flight = None;
            self.metrics.record_validation_finished();
        }

        let attempt = match &self.state {
            GateState::Validating { attempt } if attempt.id == done.attempt_id => attempt.clone(),
            _ => {
                self.metrics.record_late_response();
                debug!(attempt_id = %done.attempt_id, "late_response_discarded");
                return;
            }
        };

        self.metrics.record_outcome(done.outcome.kind(), done.latency_ms);
        log_outcome(&attempt, &done.outcome, done.latency_ms);
        if let Some(journal) = &self.journal {
            journal.record(&attempt, &done.outcome, done.latency_ms);
        }

        self.step(GateEvent::OutcomeReceived { attempt_id: done.attempt_id, outcome: done.outcome });
    }

    /// Apply an event and execute the resulting command
    async fn apply(&mut self, event: GateEvent) {
        if let Some(command) = self.step(event) {
            self.execute(command).await;
        }
    }

    fn step(&mut self, event: GateEvent) -> Option<GateCommand> {
        let state = std::mem::replace(&mut self.state, GateState::Idle);
        let t = transition(state, event);
        self.state = t.state;

        if t.handled {
            let phase = self.state.phase();
            self.metrics.set_gate_phase(phase.as_gauge());
            self.view_tx.send_replace(GateView::from(&self.state));
            debug!(phase = %phase.as_str(), "gate_state_changed");
        }
        t.command
    }

    async fn execute(&mut self, command: GateCommand) {
        match command {
            GateCommand::Submit(attempt) => {
                // An aborted task may still be unwinding; let it finish first
                if let Some(handle) = self.cancelled.take() {
                    let _ = handle.await;
                }
                if let Some(handle) = self.lookup.take() {
                    let _ = handle.await;
                }
                self.submit(attempt);
            }
            GateCommand::Cancel(attempt_id) => {
                if let Some(in_flight) = self.in_flight.take() {
                    if in_flight.attempt_id == attempt_id {
                        in_flight.handle.abort();
                        self.metrics.record_validation_finished();
                        self.cancelled = Some(in_flight.handle);
                        info!(attempt_id = %attempt_id, "scan_cancelled");
                    } else {
                        self.in_flight = Some(in_flight);
                    }
                }
            }
        }
    }

    fn submit(&mut self, attempt: ScanAttempt) {
        info!(
            attempt_id = %attempt.id,
            code = %attempt.code,
            device_id = %attempt.device_id,
            "scan_submitted"
        );

        let authority = self.authority.clone();
        let tx = self.completed_tx.clone();
        let attempt_id = attempt.id;
        self.metrics.record_validation_sent();

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let result = authority.validate(&attempt.code, &attempt.device_id).await;
            let outcome = classify(result);
            let latency_ms = started.elapsed().as_millis() as u64;
            let _ = tx.send(Completed { attempt_id, outcome, latency_ms }).await;
        });

        self.in_flight = Some(InFlight { attempt_id, handle });
    }

    fn spawn_lookup(&mut self, code: TicketCode) {
        let busy = self.in_flight.is_some()
            || self.lookup.as_ref().is_some_and(|handle| !handle.is_finished());
        if busy {
            warn!(code = %code, "lookup_skipped_busy");
            return;
        }

        let authority = self.authority.clone();
        self.metrics.record_lookup();

        self.lookup = Some(tokio::spawn(async move {
            match authority.lookup(&code).await {
                Ok(resp) => info!(
                    code = %code,
                    status = %resp.status,
                    message = %resp.message.as_deref().unwrap_or(""),
                    state = %resp.new_state.as_deref().unwrap_or("-"),
                    "lookup_result"
                ),
                Err(e) => warn!(code = %code, error = %e, "lookup_failed"),
            }
        }));
    }
}

fn log_outcome(attempt: &ScanAttempt, outcome: &ValidationOutcome, latency_ms: u64) {
    match outcome {
        ValidationOutcome::Authorized { entry_id, previous_state, new_state, .. } => info!(
            attempt_id = %attempt.id,
            code = %attempt.code,
            entry_id = %entry_id,
            previous_state = %previous_state,
            new_state = %new_state,
            latency_ms = %latency_ms,
            "scan_authorized"
        ),
        ValidationOutcome::ConnectionError { reason } => warn!(
            attempt_id = %attempt.id,
            code = %attempt.code,
            reason = %reason,
            latency_ms = %latency_ms,
            "scan_connection_error"
        ),
        denied => info!(
            attempt_id = %attempt.id,
            code = %attempt.code,
            outcome = %denied.kind().as_str(),
            message = %denied.message(),
            latency_ms = %latency_ms,
            "scan_denied"
        ),
    }
}
