//! IO modules - external system interfaces
//!
//! - `authority` - HTTP client for the validating authority
//! - `memory_authority` - In-memory authority (mock server, tests)
//! - `authority_server` - HTTP front for the in-memory authority
//! - `store` - Key-value persistence for device state
//! - `journal` - Scan outcomes to file (JSONL format)
//! - `console` - Operator commands and keyboard-wedge scans on stdin
//! - `scan_listener` - TCP listener for networked scanners
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod authority;
pub mod authority_server;
pub mod console;
pub mod journal;
pub mod memory_authority;
pub mod prometheus;
pub mod scan_listener;
pub mod store;

// Re-export commonly used types
pub use authority::{Authority, HttpAuthority, TransportError, ValidationResponse};
pub use journal::OutcomeJournal;
pub use memory_authority::{InMemoryAuthority, TicketState};
pub use scan_listener::{start_scan_listener, ScanListenerConfig};
pub use store::{FileStore, KeyValueStore, MemoryStore};
