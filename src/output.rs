//! Per-poll records for operators.
//!
//! Supports pretty-printing, JSON serialization, and CSV append.

use anyhow::Result;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::{debug, info};

use crate::source::PollOutcome;

/// Summary of one poll of one feed.
#[derive(Debug, Serialize)]
pub struct PollRecord {
    pub timestamp: DateTime<Utc>,
    pub feed_id: String,
    pub outcome: &'static str,
    pub trip_updates: Option<usize>,
    pub stop_time_updates: Option<usize>,
    pub is_full_dataset: Option<bool>,
    pub error_message: Option<String>,
}

impl PollRecord {
    pub fn from_outcome(feed_id: &str, outcome: &PollOutcome) -> Self {
        let updates = outcome.updates();
        let error_message = match outcome {
            PollOutcome::DecodeFailed(e) => Some(e.to_string()),
            _ => None,
        };

        PollRecord {
            timestamp: Utc::now(),
            feed_id: feed_id.to_string(),
            outcome: outcome.kind(),
            trip_updates: updates.map(<[_]>::len),
            stop_time_updates: updates
                .map(|u| u.iter().map(|tu| tu.stop_time_update.len()).sum()),
            is_full_dataset: outcome.is_full_dataset(),
            error_message,
        }
    }
}

/// Logs a poll record using Rust's debug pretty-print format.
pub fn print_pretty(record: &PollRecord) {
    debug!("{:#?}", record);
}

/// Logs a poll record as pretty-printed JSON.
pub fn print_json(record: &PollRecord) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}

/// Appends a [`PollRecord`] as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record(path: &str, record: &PollRecord) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}
