//! Gate state machine
//!
//! Idle -> Scanning -> Validating -> Result -> Scanning ..., with Stop
//! returning to Idle from anywhere. The transition function is pure; the
//! session driver executes the returned command.
//!
//! The only way into `Validating` is a capture while `Scanning`, so at most
//! one scan attempt is ever outstanding.

use crate::domain::outcome::ValidationOutcome;
use crate::domain::types::{AttemptId, ScanAttempt};
use crate::infra::metrics::{
    GATE_PHASE_IDLE, GATE_PHASE_RESULT, GATE_PHASE_SCANNING, GATE_PHASE_VALIDATING,
};

#[derive(Debug, Clone, PartialEq)]
pub enum GateState {
    Idle,
    Scanning,
    Validating { attempt: ScanAttempt },
    Result { attempt: ScanAttempt, outcome: ValidationOutcome },
}

/// Discriminant of `GateState`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    Idle,
    Scanning,
    Validating,
    Result,
}

impl GatePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatePhase::Idle => "idle",
            GatePhase::Scanning => "scanning",
            GatePhase::Validating => "validating",
            GatePhase::Result => "result",
        }
    }

    /// Gauge value for metrics
    pub fn as_gauge(&self) -> u64 {
        match self {
            GatePhase::Idle => GATE_PHASE_IDLE,
            GatePhase::Scanning => GATE_PHASE_SCANNING,
            GatePhase::Validating => GATE_PHASE_VALIDATING,
            GatePhase::Result => GATE_PHASE_RESULT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateEvent {
    /// Operator starts the session
    Start,
    /// Capture pipeline produced a code
    CodeCaptured(ScanAttempt),
    /// Validation finished for an attempt
    OutcomeReceived { attempt_id: AttemptId, outcome: ValidationOutcome },
    /// Operator acknowledges the result
    ScanNext,
    /// Operator stops the session
    Stop,
}

/// Side effect requested by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum GateCommand {
    Submit(ScanAttempt),
    Cancel(AttemptId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: GateState,
    pub command: Option<GateCommand>,
    /// False when the event was ignored in the current state
    pub handled: bool,
}

impl Transition {
    fn to(state: GateState) -> Self {
        Self { state, command: None, handled: true }
    }

    fn with(state: GateState, command: GateCommand) -> Self {
        Self { state, command: Some(command), handled: true }
    }

    fn ignored(state: GateState) -> Self {
        Self { state, command: None, handled: false }
    }
}

impl GateState {
    pub fn phase(&self) -> GatePhase {
        match self {
            GateState::Idle => GatePhase::Idle,
            GateState::Scanning => GatePhase::Scanning,
            GateState::Validating { .. } => GatePhase::Validating,
            GateState::Result { .. } => GatePhase::Result,
        }
    }

    #[inline]
    pub fn accepts_captures(&self) -> bool {
        matches!(self, GateState::Scanning)
    }

    /// Id of the outstanding attempt, if any
    pub fn pending_attempt(&self) -> Option<AttemptId> {
        match self {
            GateState::Validating { attempt } => Some(attempt.id),
            _ => None,
        }
    }

    pub fn outcome(&self) -> Option<&ValidationOutcome> {
        match self {
            GateState::Result { outcome, .. } => Some(outcome),
            _ => None,
        }
    }
}

/// Snapshot of the gate published to the console and the capture pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct GateView {
    pub phase: GatePhase,
    pub attempt: Option<ScanAttempt>,
    pub outcome: Option<ValidationOutcome>,
}

impl Default for GateView {
    fn default() -> Self {
        Self { phase: GatePhase::Idle, attempt: None, outcome: None }
    }
}

impl From<&GateState> for GateView {
    fn from(state: &GateState) -> Self {
        match state {
            GateState::Idle | GateState::Scanning => {
                Self { phase: state.phase(), attempt: None, outcome: None }
            }
            GateState::Validating { attempt } => {
                Self { phase: GatePhase::Validating, attempt: Some(attempt.clone()), outcome: None }
            }
            GateState::Result { attempt, outcome } => Self {
                phase: GatePhase::Result,
                attempt: Some(attempt.clone()),
                outcome: Some(outcome.clone()),
            },
        }
    }
}

/// Apply `event` to `state`
pub fn transition(state: GateState, event: GateEvent) -> Transition {
    match (state, event) {
        (GateState::Idle, GateEvent::Start) => Transition::to(GateState::Scanning),

        (GateState::Scanning, GateEvent::CodeCaptured(attempt)) => Transition::with(
            GateState::Validating { attempt: attempt.clone() },
            GateCommand::Submit(attempt),
        ),

        (GateState::Validating { attempt }, GateEvent::OutcomeReceived { attempt_id, outcome })
            if attempt.id == attempt_id =>
        {
            Transition::to(GateState::Result { attempt, outcome })
        }

        (GateState::Result { .. }, GateEvent::ScanNext) => Transition::to(GateState::Scanning),

        (GateState::Validating { attempt }, GateEvent::Stop) => {
            Transition::with(GateState::Idle, GateCommand::Cancel(attempt.id))
        }
        (GateState::Idle, GateEvent::Stop) => Transition::ignored(GateState::Idle),
        (_, GateEvent::Stop) => Transition::to(GateState::Idle),

        (state, _) => Transition::ignored(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{DeviceId, EntryId, TicketCode};

    fn attempt(id: u64, code: &str) -> ScanAttempt {
        ScanAttempt::new(
            AttemptId(id),
            TicketCode::parse(code).unwrap(),
            DeviceId::new("SCANNER-test"),
        )
    }

    fn authorized() -> ValidationOutcome {
        ValidationOutcome::Authorized {
            entry_id: EntryId::from(123),
            previous_state: "VALIDA".to_string(),
            new_state: "USADA".to_string(),
            message: String::new(),
        }
    }

    fn offline() -> ValidationOutcome {
        ValidationOutcome::ConnectionError { reason: "offline".to_string() }
    }

    fn run(events: Vec<GateEvent>) -> (GateState, Vec<GateCommand>) {
        let mut state = GateState::Idle;
        let mut commands = Vec::new();
        for event in events {
            let t = transition(state, event);
            state = t.state;
            commands.extend(t.command);
        }
        (state, commands)
    }

    #[test]
    fn test_happy_path_cycle() {
        let (state, commands) = run(vec![
            GateEvent::Start,
            GateEvent::CodeCaptured(attempt(1, "TICKET-VALID-1")),
            GateEvent::OutcomeReceived { attempt_id: AttemptId(1), outcome: authorized() },
        ]);
        assert_eq!(state.phase(), GatePhase::Result);
        assert_eq!(state.outcome(), Some(&authorized()));
        assert_eq!(commands, vec![GateCommand::Submit(attempt(1, "TICKET-VALID-1"))]);

        let view = GateView::from(&state);
        assert_eq!(view.outcome, Some(authorized()));

        let t = transition(state, GateEvent::ScanNext);
        assert_eq!(t.state, GateState::Scanning);
        assert_eq!(t.state.outcome(), None);
        assert_eq!(GateView::from(&t.state), GateView { phase: GatePhase::Scanning, ..Default::default() });
    }

    #[test]
    fn test_captures_ignored_outside_scanning() {
        let t = transition(GateState::Idle, GateEvent::CodeCaptured(attempt(1, "A")));
        assert_eq!(t.state, GateState::Idle);
        assert!(!t.handled);
        assert!(t.command.is_none());

        let validating = GateState::Validating { attempt: attempt(1, "A") };
        let t = transition(validating.clone(), GateEvent::CodeCaptured(attempt(2, "A")));
        assert_eq!(t.state, validating);
        assert!(t.command.is_none());

        let result = GateState::Result { attempt: attempt(1, "A"), outcome: authorized() };
        let t = transition(result.clone(), GateEvent::CodeCaptured(attempt(2, "B")));
        assert_eq!(t.state, result);
        assert!(t.command.is_none());
    }

    #[test]
    fn test_burst_of_captures_submits_once() {
        let mut events = vec![GateEvent::Start];
        for i in 1..=50 {
            events.push(GateEvent::CodeCaptured(attempt(i, "SAME-CODE")));
        }
        let (state, commands) = run(events);
        assert_eq!(state.pending_attempt(), Some(AttemptId(1)));
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn test_connection_error_only_moves_to_result() {
        let validating = GateState::Validating { attempt: attempt(7, "A") };
        let t = transition(
            validating,
            GateEvent::OutcomeReceived { attempt_id: AttemptId(7), outcome: offline() },
        );
        assert_eq!(t.state.phase(), GatePhase::Result);

        // Outside Validating it changes nothing
        for state in [GateState::Idle, GateState::Scanning] {
            let t = transition(
                state.clone(),
                GateEvent::OutcomeReceived { attempt_id: AttemptId(7), outcome: offline() },
            );
            assert_eq!(t.state, state);
            assert!(!t.handled);
        }
    }

    #[test]
    fn test_mismatched_outcome_discarded() {
        let validating = GateState::Validating { attempt: attempt(2, "A") };
        let t = transition(
            validating.clone(),
            GateEvent::OutcomeReceived { attempt_id: AttemptId(1), outcome: authorized() },
        );
        assert_eq!(t.state, validating);
        assert!(!t.handled);
    }

    #[test]
    fn test_stop_from_every_state() {
        let states = [
            GateState::Idle,
            GateState::Scanning,
            GateState::Validating { attempt: attempt(3, "A") },
            GateState::Result { attempt: attempt(3, "A"), outcome: offline() },
        ];
        for state in states {
            let was_validating = state.pending_attempt();
            let t = transition(state, GateEvent::Stop);
            assert_eq!(t.state, GateState::Idle);
            match was_validating {
                Some(id) => assert_eq!(t.command, Some(GateCommand::Cancel(id))),
                None => assert!(t.command.is_none()),
            }
        }
    }

    #[test]
    fn test_scan_next_only_from_result() {
        for state in [GateState::Idle, GateState::Scanning, GateState::Validating { attempt: attempt(1, "A") }] {
            let t = transition(state.clone(), GateEvent::ScanNext);
            assert_eq!(t.state, state);
        }
    }

    #[test]
    fn test_start_only_from_idle() {
        let result = GateState::Result { attempt: attempt(1, "A"), outcome: authorized() };
        let t = transition(result.clone(), GateEvent::Start);
        assert_eq!(t.state, result);
        assert!(!t.handled);
    }

    #[test]
    fn test_runs_indefinitely() {
        let mut state = GateState::Scanning;
        for i in 1..=100 {
            state = transition(state, GateEvent::CodeCaptured(attempt(i, "X"))).state;
            state = transition(
                state,
                GateEvent::OutcomeReceived { attempt_id: AttemptId(i), outcome: offline() },
            )
            .state;
            assert_eq!(state.phase(), GatePhase::Result);
            state = transition(state, GateEvent::ScanNext).state;
        }
        assert_eq!(state, GateState::Scanning);
    }
}
