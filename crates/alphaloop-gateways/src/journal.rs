use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use alphaloop_models::JournalRecord;

use crate::error::GatewayError;

/// Append-only NDJSON trade journal.
///
/// One JSON object per line; the `action` field discriminates the event
/// kind. Readers tolerate malformed lines so a partial write can never
/// take the whole journal down with it.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &JournalRecord) -> Result<(), GatewayError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Newest `limit` records, oldest first. Missing file reads as empty.
    pub fn recent(&self, limit: usize) -> Result<Vec<JournalRecord>, GatewayError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(&line) {
                Ok(record) => records.push(record),
                Err(err) => warn!(%err, "skipping malformed journal line"),
            }
        }
        if records.len() > limit {
            records.drain(..records.len() - limit);
        }
        Ok(records)
    }
}
