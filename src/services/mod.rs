//! Services - scanning workflow logic
//!
//! - `device_identity` - Durable scanner identifier
//! - `capture` - Detection frames to candidate codes, gated mailbox
//! - `classifier` - Authority answers to validation outcomes
//! - `gate` - Gate state machine (pure transitions)
//! - `gate_session` - Async driver for the gate state machine

pub mod capture;
pub mod classifier;
pub mod device_identity;
pub mod gate;
pub mod gate_session;

// Re-export commonly used types
pub use capture::{create_capture_channel, CaptureSender};
pub use classifier::classify;
pub use device_identity::get_or_create_device_id;
pub use gate::{GatePhase, GateState, GateView};
pub use gate_session::{GateSession, OperatorCommand};
