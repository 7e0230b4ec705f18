//! Result classifier - maps an authority answer onto a `ValidationOutcome`
//!
//! Fails closed: only an exact `OK` carrying all three admission fields can
//! produce `Authorized`. Unrecognized tokens and incomplete bodies are
//! unexpected responses and classify as `ConnectionError`.

use crate::domain::outcome::ValidationOutcome;
use crate::io::authority::{status, TransportError, ValidationResponse};

/// Classify the result of a validate call
pub fn classify(result: Result<ValidationResponse, TransportError>) -> ValidationOutcome {
    match result {
        Ok(response) => classify_response(response),
        Err(e) => ValidationOutcome::ConnectionError { reason: e.to_string() },
    }
}

fn classify_response(response: ValidationResponse) -> ValidationOutcome {
    let message = response.message.unwrap_or_default();

    match response.status.trim() {
        status::OK => match (response.entry_id, response.previous_state, response.new_state) {
            (Some(entry_id), Some(previous_state), Some(new_state)) => {
                ValidationOutcome::Authorized { entry_id, previous_state, new_state, message }
            }
            _ => ValidationOutcome::ConnectionError {
                reason: "authority answered OK without entryId/previousState/newState".to_string(),
            },
        },
        status::ALREADY_USED => ValidationOutcome::DeniedAlreadyUsed { message },
        status::VOIDED => ValidationOutcome::DeniedVoided { message },
        status::NOT_FOUND => ValidationOutcome::DeniedNotFound { message },
        other => ValidationOutcome::ConnectionError {
            reason: format!("unrecognized authority status {:?}", other),
        },
    }
}
