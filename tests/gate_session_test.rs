//! End-to-end scan scenarios
//!
//! Runs a full gate session (capture mailbox, session loop, classifier)
//! against the in-memory authority, and over HTTP through the authority
//! server for the wire path.

use gate_scanner::domain::{DeviceId, EntryId, OutcomeKind, ValidationOutcome};
use gate_scanner::infra::Metrics;
use gate_scanner::io::authority_server::serve_authority;
use gate_scanner::io::{Authority, HttpAuthority, InMemoryAuthority, OutcomeJournal, TicketState};
use gate_scanner::services::capture::CaptureResult;
use gate_scanner::services::{
    create_capture_channel, CaptureSender, GatePhase, GateSession, GateView, OperatorCommand,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

struct Gate {
    commands: mpsc::Sender<OperatorCommand>,
    capture: CaptureSender,
    view: watch::Receiver<GateView>,
    metrics: Arc<Metrics>,
    task: JoinHandle<()>,
    _shutdown: watch::Sender<bool>,
}

fn spawn_gate(authority: Arc<dyn Authority>, journal: Option<OutcomeJournal>) -> Gate {
    let metrics = Arc::new(Metrics::new());
    let mut session = GateSession::new(DeviceId::new("SCANNER-e2e000000001"), authority, metrics.clone());
    if let Some(journal) = journal {
        session = session.with_journal(journal);
    }
    let view = session.subscribe();
    let (capture, capture_rx) = create_capture_channel(1, view.clone(), metrics.clone());
    let (commands, cmd_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(session.run(cmd_rx, capture_rx, shutdown_rx));

    Gate { commands, capture, view, metrics, task, _shutdown: shutdown_tx }
}

impl Gate {
    async fn send(&self, cmd: OperatorCommand) {
        self.commands.send(cmd).await.expect("session running");
    }

    async fn wait_for(&mut self, pred: impl Fn(&GateView) -> bool) -> GateView {
        let view = &mut self.view;
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let current = view.borrow_and_update();
                    if pred(&current) {
                        return (*current).clone();
                    }
                }
                view.changed().await.expect("session alive");
            }
        })
        .await
        .expect("gate did not reach expected state")
    }

    async fn start(&mut self) {
        self.send(OperatorCommand::Start).await;
        self.wait_for(|v| v.phase == GatePhase::Scanning).await;
    }

    async fn scan(&mut self, code: &str) -> ValidationOutcome {
        assert_eq!(self.capture.detect(&[code]), CaptureResult::Forwarded);
        let view = self.wait_for(|v| v.phase == GatePhase::Result).await;
        view.outcome.expect("result carries an outcome")
    }

    async fn next(&mut self) {
        self.send(OperatorCommand::ScanNext).await;
        let view = self.wait_for(|v| v.phase == GatePhase::Scanning).await;
        assert!(view.outcome.is_none());
    }
}

#[tokio::test]
async fn valid_ticket_then_rescan_is_denied() {
    let authority = Arc::new(InMemoryAuthority::new().with_first_entry_id(123));
    authority.insert("TICKET-VALID-1", TicketState::Valid);
    let mut gate = spawn_gate(authority.clone(), None);

    gate.start().await;
    let first = gate.scan("TICKET-VALID-1").await;
    assert_eq!(
        first,
        ValidationOutcome::Authorized {
            entry_id: EntryId::from(123),
            previous_state: "VALID".to_string(),
            new_state: "USED".to_string(),
            message: "Entry authorized".to_string(),
        }
    );

    gate.next().await;
    let second = gate.scan("TICKET-VALID-1").await;
    assert_eq!(second.kind(), OutcomeKind::DeniedAlreadyUsed);
    assert!(!second.message().is_empty());

    assert_eq!(authority.state_of("TICKET-VALID-1"), Some(TicketState::Used));
    assert_eq!(authority.validate_calls(), 2);
    assert_eq!(gate.metrics.outcome_total(OutcomeKind::Authorized), 1);
}

#[tokio::test]
async fn capture_burst_sends_one_request() {
    let authority = Arc::new(InMemoryAuthority::new());
    authority.insert("BURST", TicketState::Valid);
    authority.set_delay(Some(Duration::from_millis(100)));
    let mut gate = spawn_gate(authority.clone(), None);

    gate.start().await;
    for _ in 0..50 {
        gate.capture.detect(&["BURST"]);
        tokio::task::yield_now().await;
    }
    let view = gate.wait_for(|v| v.phase == GatePhase::Result).await;
    assert!(view.outcome.unwrap().is_admitted());

    // Stragglers arriving while showing the result are dropped too
    for _ in 0..10 {
        assert_eq!(gate.capture.detect(&["BURST"]), CaptureResult::NotScanning);
    }

    assert_eq!(authority.validate_calls(), 1);
    assert_eq!(authority.max_in_flight(), 1);
    assert!(gate.metrics.captures_dropped() >= 10);
}

#[tokio::test]
async fn offline_then_retry_after_scan_next() {
    let authority = Arc::new(InMemoryAuthority::new());
    authority.insert("T-OFF", TicketState::Valid);
    authority.set_offline(true);
    let mut gate = spawn_gate(authority.clone(), None);

    gate.start().await;
    let outcome = gate.scan("T-OFF").await;
    assert_eq!(outcome.kind(), OutcomeKind::ConnectionError);
    assert!(outcome.is_retryable());
    assert_eq!(authority.state_of("T-OFF"), Some(TicketState::Valid));

    gate.next().await;
    authority.set_offline(false);
    assert!(gate.scan("T-OFF").await.is_admitted());
}

#[tokio::test]
async fn stop_while_validating_discards_result() {
    let authority = Arc::new(InMemoryAuthority::new());
    authority.insert("SLOW", TicketState::Valid);
    authority.set_delay(Some(Duration::from_millis(300)));
    let mut gate = spawn_gate(authority.clone(), None);

    gate.start().await;
    assert_eq!(gate.capture.detect(&["SLOW"]), CaptureResult::Forwarded);
    gate.wait_for(|v| v.phase == GatePhase::Validating).await;

    gate.send(OperatorCommand::Stop).await;
    gate.wait_for(|v| v.phase == GatePhase::Idle).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    let view = (*gate.view.borrow()).clone();
    assert_eq!(view.phase, GatePhase::Idle);
    assert!(view.outcome.is_none());
    // The aborted request never reached the ticket table
    assert_eq!(authority.state_of("SLOW"), Some(TicketState::Valid));
    assert_eq!(gate.metrics.validations_in_flight(), 0);
}

#[tokio::test]
async fn restart_after_stop_never_overlaps_requests() {
    let authority = Arc::new(InMemoryAuthority::new());
    authority.insert("SLOW", TicketState::Valid);
    authority.set_delay(Some(Duration::from_millis(200)));
    let mut gate = spawn_gate(authority.clone(), None);

    gate.start().await;
    assert_eq!(gate.capture.detect(&["SLOW"]), CaptureResult::Forwarded);
    gate.wait_for(|v| v.phase == GatePhase::Validating).await;
    gate.send(OperatorCommand::Stop).await;
    gate.wait_for(|v| v.phase == GatePhase::Idle).await;

    // Scan again straight away while the first request may still be unwinding
    gate.start().await;
    let outcome = gate.scan("SLOW").await;

    assert!(outcome.is_admitted(), "got {outcome:?}");
    assert_eq!(authority.max_in_flight(), 1);
    assert_eq!(authority.state_of("SLOW"), Some(TicketState::Used));
    assert_eq!(gate.metrics.validations_in_flight(), 0);
}

#[tokio::test]
async fn lookup_leaves_gate_and_ticket_untouched() {
    let authority = Arc::new(InMemoryAuthority::new());
    authority.insert("PEEK", TicketState::Valid);
    let mut gate = spawn_gate(authority.clone(), None);

    gate.start().await;
    gate.send(OperatorCommand::Lookup(gate_scanner::domain::TicketCode::parse("PEEK").unwrap()))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(gate.view.borrow().phase, GatePhase::Scanning);
    assert_eq!(authority.state_of("PEEK"), Some(TicketState::Valid));
    assert_eq!(authority.validate_calls(), 0);
}

#[tokio::test]
async fn session_ends_when_operator_channel_closes() {
    let gate = spawn_gate(Arc::new(InMemoryAuthority::new()), None);
    let Gate { commands, task, .. } = gate;
    drop(commands);
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("session stopped")
        .expect("session task");
}

#[tokio::test]
async fn outcomes_are_journaled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scans.jsonl");
    let journal = OutcomeJournal::new(path.to_str().unwrap(), "e2e");

    let authority = Arc::new(InMemoryAuthority::new());
    authority.insert("J-1", TicketState::Void);
    let mut gate = spawn_gate(authority, Some(journal));

    gate.start().await;
    assert_eq!(gate.scan("J-1").await.kind(), OutcomeKind::DeniedVoided);
    gate.next().await;
    assert_eq!(gate.scan("J-2").await.kind(), OutcomeKind::DeniedNotFound);

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> =
        content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["outcome"], "denied_voided");
    assert_eq!(lines[0]["code"], "J-1");
    assert_eq!(lines[1]["outcome"], "denied_not_found");
    assert_eq!(lines[1]["device_id"], "SCANNER-e2e000000001");
}

#[tokio::test]
async fn two_scanners_over_http_admit_once() {
    let authority = Arc::new(InMemoryAuthority::new());
    authority.insert("SHARED-1", TicketState::Valid);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (_server_shutdown, server_rx) = watch::channel(false);
    tokio::spawn(serve_authority(listener, authority.clone(), "/api/tickets", server_rx));

    let base = format!("http://{addr}/api/tickets");
    let http = || {
        Arc::new(HttpAuthority::with_options(&base, Duration::from_secs(2), None).unwrap())
            as Arc<dyn Authority>
    };
    let mut north = spawn_gate(http(), None);
    let mut south = spawn_gate(http(), None);

    north.start().await;
    south.start().await;
    let (a, b) = tokio::join!(north.scan("SHARED-1"), south.scan("SHARED-1"));

    let admitted = [&a, &b].iter().filter(|o| o.is_admitted()).count();
    assert_eq!(admitted, 1);
    assert!([a.kind(), b.kind()].contains(&OutcomeKind::DeniedAlreadyUsed));
    assert_eq!(authority.state_of("SHARED-1"), Some(TicketState::Used));
}

#[tokio::test]
async fn http_lookup_round_trip() {
    let authority = Arc::new(InMemoryAuthority::new());
    authority.insert("A/B C", TicketState::Void);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (_server_shutdown, server_rx) = watch::channel(false);
    tokio::spawn(serve_authority(listener, authority, "/api/tickets", server_rx));

    let client =
        HttpAuthority::with_options(&format!("http://{addr}/api/tickets"), Duration::from_secs(2), None)
            .unwrap();
    let code = gate_scanner::domain::TicketCode::parse("A/B C").unwrap();
    let resp = client.lookup(&code).await.unwrap();
    assert_eq!(resp.status, "VOIDED");
    assert_eq!(resp.new_state.as_deref(), Some("VOID"));
}
