//! Outcome journal - writes completed scan attempts to file
//!
//! One JSON object per line, appended to the file named in config.

use crate::domain::outcome::ValidationOutcome;
use crate::domain::types::ScanAttempt;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// One journal line
#[derive(Debug, Serialize)]
pub struct ScanRecord<'a> {
    pub site: &'a str,
    pub attempt_id: u64,
    pub code: &'a str,
    pub device_id: &'a str,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub latency_ms: u64,
    #[serde(flatten)]
    pub outcome: &'a ValidationOutcome,
}

pub struct OutcomeJournal {
    file_path: String,
    site_id: String,
}

impl OutcomeJournal {
    pub fn new(file_path: &str, site_id: &str) -> Self {
        info!(file_path = %file_path, "journal_initialized");
        Self { file_path: file_path.to_string(), site_id: site_id.to_string() }
    }

    /// Record a finished attempt. Returns true if the line was written
    pub fn record(&self, attempt: &ScanAttempt, outcome: &ValidationOutcome, latency_ms: u64) -> bool {
        let record = ScanRecord {
            site: &self.site_id,
            attempt_id: attempt.id.0,
            code: attempt.code.as_str(),
            device_id: attempt.device_id.as_str(),
            submitted_at: attempt.submitted_at,
            completed_at: Utc::now(),
            latency_ms,
            outcome,
        };

        let result = serde_json::to_string(&record)
            .map_err(std::io::Error::from)
            .and_then(|json| self.append_line(&json));

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(attempt_id = %attempt.id, error = %e, "journal_write_failed");
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "journal_written");

        Ok(())
    }
}
