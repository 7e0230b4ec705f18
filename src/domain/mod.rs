//! Domain models - core admission types
//!
//! This module contains the canonical data types used throughout the system:
//! - `TicketCode` - opaque code decoded from a QR payload
//! - `DeviceId` - durable scanner identity
//! - `ScanAttempt` - one accepted capture-to-validation cycle
//! - `ValidationOutcome` - classified result shown to the operator

pub mod outcome;
pub mod types;

pub use outcome::{OutcomeKind, ValidationOutcome};
pub use types::{AttemptId, DeviceId, EntryId, ScanAttempt, TicketCode};
