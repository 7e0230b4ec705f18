//! Validation outcome - the classified result of one scan attempt

use crate::domain::types::EntryId;
use serde::Serialize;

/// User-facing result of a scan attempt.
///
/// Denials carry the authority's message verbatim. `ConnectionError`
/// carries a local reason and is the only outcome worth re-scanning for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Authorized {
        entry_id: EntryId,
        previous_state: String,
        new_state: String,
        message: String,
    },
    DeniedAlreadyUsed {
        message: String,
    },
    DeniedVoided {
        message: String,
    },
    DeniedNotFound {
        message: String,
    },
    ConnectionError {
        reason: String,
    },
}

/// Outcome discriminant, used for metrics labels and journal records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Authorized,
    DeniedAlreadyUsed,
    DeniedVoided,
    DeniedNotFound,
    ConnectionError,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 5] = [
        OutcomeKind::Authorized,
        OutcomeKind::DeniedAlreadyUsed,
        OutcomeKind::DeniedVoided,
        OutcomeKind::DeniedNotFound,
        OutcomeKind::ConnectionError,
    ];

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Authorized => "authorized",
            OutcomeKind::DeniedAlreadyUsed => "denied_already_used",
            OutcomeKind::DeniedVoided => "denied_voided",
            OutcomeKind::DeniedNotFound => "denied_not_found",
            OutcomeKind::ConnectionError => "connection_error",
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        match self {
            OutcomeKind::Authorized => 0,
            OutcomeKind::DeniedAlreadyUsed => 1,
            OutcomeKind::DeniedVoided => 2,
            OutcomeKind::DeniedNotFound => 3,
            OutcomeKind::ConnectionError => 4,
        }
    }
}

impl ValidationOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            ValidationOutcome::Authorized { .. } => OutcomeKind::Authorized,
            ValidationOutcome::DeniedAlreadyUsed { .. } => OutcomeKind::DeniedAlreadyUsed,
            ValidationOutcome::DeniedVoided { .. } => OutcomeKind::DeniedVoided,
            ValidationOutcome::DeniedNotFound { .. } => OutcomeKind::DeniedNotFound,
            ValidationOutcome::ConnectionError { .. } => OutcomeKind::ConnectionError,
        }
    }

    /// Only an authorized outcome admits the ticket holder
    #[inline]
    pub fn is_admitted(&self) -> bool {
        matches!(self, ValidationOutcome::Authorized { .. })
    }

    /// Whether a re-scan may yield a different answer
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ValidationOutcome::ConnectionError { .. })
    }

    /// Text shown to the operator alongside the outcome
    pub fn message(&self) -> &str {
        match self {
            ValidationOutcome::Authorized { message, .. }
            | ValidationOutcome::DeniedAlreadyUsed { message }
            | ValidationOutcome::DeniedVoided { message }
            | ValidationOutcome::DeniedNotFound { message } => message,
            ValidationOutcome::ConnectionError { reason } => reason,
        }
    }

    pub fn entry_id(&self) -> Option<&EntryId> {
        match self {
            ValidationOutcome::Authorized { entry_id, .. } => Some(entry_id),
            _ => None,
        }
    }
}
