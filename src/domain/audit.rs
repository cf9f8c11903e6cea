//! Audit Log
//!
//! Append-only record of every authorization decision and state transition.
//! One JSON object per line; entries are never mutated or deleted.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit entry: {0}")]
    WriteError(String),
    #[error("Failed to read audit log: {0}")]
    ReadError(String),
}

/// A single audit record: who, what, when, result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    /// Caller id, or "system" for engine-initiated actions
    pub actor: String,
    pub success: bool,
    pub details: serde_json::Value,
}

/// Append-only JSONL audit log.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. Failures are surfaced but the log is never
    /// rewritten or truncated.
    pub fn append(
        &self,
        action: &str,
        actor: &str,
        success: bool,
        details: serde_json::Value,
    ) -> Result<(), AuditError> {
        let entry = AuditLogEntry {
            timestamp: Utc::now(),
            action: action.to_string(),
            actor: actor.to_string(),
            success,
            details,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AuditError::WriteError(e.to_string()))?;
        }

        let line = serde_json::to_string(&entry)
            .map_err(|e| AuditError::WriteError(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AuditError::WriteError(e.to_string()))?;

        writeln!(file, "{}", line).map_err(|e| AuditError::WriteError(e.to_string()))?;

        tracing::info!("AUDIT: {} | actor={} | success={}", action, actor, success);
        Ok(())
    }

    /// Read all entries, skipping unparseable lines.
    pub fn read_all(&self) -> Result<Vec<AuditLogEntry>, AuditError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)
            .map_err(|e| AuditError::ReadError(e.to_string()))?;
        let reader = BufReader::new(file);

        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| AuditError::ReadError(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditLogEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("Skipping malformed audit line: {}", e),
            }
        }
        Ok(entries)
    }

    /// Count entries for a given action name.
    pub fn count_action(&self, action: &str) -> Result<usize, AuditError> {
        Ok(self
            .read_all()?
            .iter()
            .filter(|e| e.action == action)
            .count())
    }
}
