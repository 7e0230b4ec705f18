//! In-memory validating authority
//!
//! Holds a ticket table behind a single lock so VALID -> USED is a true
//! compare-and-swap per code, linearizable across any number of scanners.
//! Used by the `mock-authority` binary and by tests; it can be switched
//! offline and given an artificial delay to exercise failure handling.

use crate::domain::types::{DeviceId, EntryId, TicketCode};
use crate::io::authority::{status, Authority, TransportError, ValidationResponse};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// Authority-side ticket lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Valid,
    Used,
    Void,
}

impl TicketState {
    /// Wire name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketState::Valid => "VALID",
            TicketState::Used => "USED",
            TicketState::Void => "VOID",
        }
    }
}

#[derive(Debug, Clone)]
struct TicketRecord {
    state: TicketState,
    entry_id: Option<u64>,
    used_by: Option<DeviceId>,
}

#[derive(Default)]
pub struct InMemoryAuthority {
    tickets: Mutex<HashMap<String, TicketRecord>>,
    next_entry_id: AtomicU64,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
    validate_calls: AtomicU64,
    lookup_calls: AtomicU64,
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
}

impl InMemoryAuthority {
    pub fn new() -> Self {
        Self { next_entry_id: AtomicU64::new(1), ..Default::default() }
    }

    /// Start entry ids at `first` (ids are assigned on admission)
    pub fn with_first_entry_id(self, first: u64) -> Self {
        self.next_entry_id.store(first, Ordering::Relaxed);
        self
    }

    pub fn insert(&self, code: &str, state: TicketState) {
        self.tickets
            .lock()
            .insert(code.to_string(), TicketRecord { state, entry_id: None, used_by: None });
    }

    pub fn state_of(&self, code: &str) -> Option<TicketState> {
        self.tickets.lock().get(code).map(|t| t.state)
    }

    /// Simulate loss of connectivity
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Delay every answer by `delay`
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Total validate requests received, including failed ones
    pub fn validate_calls(&self) -> u64 {
        self.validate_calls.load(Ordering::SeqCst)
    }

    /// Total lookup requests received
    pub fn lookup_calls(&self) -> u64 {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    /// Highest number of requests (validate or lookup) observed in progress at once
    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(&self.in_flight)
    }

    /// Apply the configured delay, then fail if offline
    pub async fn simulate_network(&self) -> Result<(), TransportError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::Relaxed) {
            return Err(TransportError::Unreachable);
        }
        Ok(())
    }

    /// Apply the VALID -> USED transition atomically and describe the result
    pub fn apply_validate(&self, code: &str, device_id: &DeviceId) -> ValidationResponse {
        let mut tickets = self.tickets.lock();
        let Some(ticket) = tickets.get_mut(code) else {
            return stamped(ValidationResponse::with_status(status::NOT_FOUND, "Ticket not found"));
        };

        match ticket.state {
            TicketState::Valid => {
                let entry_id = self.next_entry_id.fetch_add(1, Ordering::Relaxed);
                ticket.state = TicketState::Used;
                ticket.entry_id = Some(entry_id);
                ticket.used_by = Some(device_id.clone());
                info!(code = %code, device_id = %device_id, entry_id = %entry_id, "ticket_admitted");
                stamped(ValidationResponse {
                    status: status::OK.to_string(),
                    message: Some("Entry authorized".to_string()),
                    entry_id: Some(EntryId::from(entry_id)),
                    previous_state: Some(TicketState::Valid.as_str().to_string()),
                    new_state: Some(TicketState::Used.as_str().to_string()),
                    timestamp: None,
                })
            }
            TicketState::Used => {
                let by = ticket.used_by.as_ref().map(|d| d.as_str()).unwrap_or("unknown device");
                stamped(ValidationResponse::with_status(
                    status::ALREADY_USED,
                    format!("Ticket already used (entry {} by {})", fmt_entry(ticket.entry_id), by),
                ))
            }
            TicketState::Void => {
                stamped(ValidationResponse::with_status(status::VOIDED, "Ticket has been voided"))
            }
        }
    }

    /// Describe a ticket without touching it
    pub fn apply_lookup(&self, code: &str) -> ValidationResponse {
        let tickets = self.tickets.lock();
        let Some(ticket) = tickets.get(code) else {
            return stamped(ValidationResponse::with_status(status::NOT_FOUND, "Ticket not found"));
        };

        let mut resp = match ticket.state {
            TicketState::Valid => ValidationResponse::with_status(status::OK, "Ticket is valid"),
            TicketState::Used => {
                ValidationResponse::with_status(status::ALREADY_USED, "Ticket already used")
            }
            TicketState::Void => {
                ValidationResponse::with_status(status::VOIDED, "Ticket has been voided")
            }
        };
        resp.entry_id = ticket.entry_id.map(EntryId::from);
        resp.new_state = Some(ticket.state.as_str().to_string());
        stamped(resp)
    }
}

fn fmt_entry(entry_id: Option<u64>) -> String {
    entry_id.map(|id| id.to_string()).unwrap_or_else(|| "?".to_string())
}

fn stamped(mut resp: ValidationResponse) -> ValidationResponse {
    resp.timestamp = Some(serde_json::Value::String(Utc::now().to_rfc3339()));
    resp
}

/// Decrements the in-flight counter when a request finishes or is dropped
struct InFlightGuard<'a>(&'a AtomicU64);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Authority for InMemoryAuthority {
    async fn validate(
        &self,
        code: &TicketCode,
        device_id: &DeviceId,
    ) -> Result<ValidationResponse, TransportError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter();

        self.simulate_network().await?;
        Ok(self.apply_validate(code.as_str(), device_id))
    }

    async fn lookup(&self, code: &TicketCode) -> Result<ValidationResponse, TransportError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter();
        self.simulate_network().await?;
        Ok(self.apply_lookup(code.as_str()))
    }
}
