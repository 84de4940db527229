use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

/// Append-only NDJSON audit trail for every outbound LLM request/response.
///
/// Best-effort: audit failures are logged and swallowed so they can never
/// block a decision cycle. The bearer token is never part of the payload.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

#[derive(Serialize)]
struct AuditLine<'a> {
    timestamp: String,
    direction: &'a str,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempt: Option<u32>,
    payload: &'a serde_json::Value,
}

impl AuditLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn request(&self, model: &str, attempt: u32, payload: &serde_json::Value) {
        self.write(AuditLine {
            timestamp: Utc::now().to_rfc3339(),
            direction: "request",
            model,
            attempt: Some(attempt),
            payload,
        });
    }

    pub fn response(&self, model: &str, payload: &serde_json::Value) {
        self.write(AuditLine {
            timestamp: Utc::now().to_rfc3339(),
            direction: "response",
            model,
            attempt: None,
            payload,
        });
    }

    fn write(&self, line: AuditLine<'_>) {
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            let json = serde_json::to_string(&line)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writeln!(file, "{json}")
        })();

        if let Err(e) = result {
            warn!(error = %e, path = %self.path.display(), "audit log write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let audit = AuditLog::new(&path);

        audit.request("m1", 1, &serde_json::json!({"messages": []}));
        audit.response("m1", &serde_json::json!({"choices": []}));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["direction"], "request");
        assert_eq!(first["attempt"], 1);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["direction"], "response");
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/audit.jsonl");
        let audit = AuditLog::new(&path);
        audit.request("m", 1, &serde_json::json!({}));
        assert!(path.exists());
    }
}
