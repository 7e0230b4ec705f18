//! Shared types for the gate scanner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque ticket code as decoded from a QR payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketCode(String);

impl TicketCode {
    /// Build a code from a raw payload. Leading and trailing whitespace
    /// (keyboard-wedge CR/LF, padding) is stripped; issued codes never start
    /// or end with whitespace. Inner characters are kept as-is.
    /// Returns None for blank payloads.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TicketCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable identifier of the physical scanning device (`SCANNER-<random>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub const PREFIX: &'static str = "SCANNER-";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-session sequence number of an accepted scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct AttemptId(pub u64);

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entry identifier assigned by the authority.
///
/// Kept in whatever JSON form the authority sent; never reinterpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryId {
    Number(serde_json::Number),
    Text(String),
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryId::Number(n) => write!(f, "{}", n),
            EntryId::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for EntryId {
    fn from(value: u64) -> Self {
        EntryId::Number(value.into())
    }
}

/// One accepted capture-to-validation request cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ScanAttempt {
    pub id: AttemptId,
    pub code: TicketCode,
    pub device_id: DeviceId,
    pub submitted_at: DateTime<Utc>,
}

impl ScanAttempt {
    pub fn new(id: AttemptId, code: TicketCode, device_id: DeviceId) -> Self {
        Self { id, code, device_id, submitted_at: Utc::now() }
    }
}
