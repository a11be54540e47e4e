//! Append-only JSONL event log
//!
//! A generic durable log of serializable records, one JSON value per line.
//! Used by the Status & Log Projection when it needs richer history than the
//! terminal-state-only status file provides. Grounded in the same chunked
//! append-only index idiom as a context-ingestion store: open-or-create a
//! base directory, append records as lines, replay them back in order.
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::error::StoreError;

/// An append-only log of JSON-serializable records backed by a single file.
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// Open (creating parent directories as needed) a log at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }
        debug!(?path, "EventLog::open: called");
        Ok(Self { path })
    }

    /// Append one record as a new line.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<(), StoreError> {
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| StoreError::Write {
                path: self.path.display().to_string(),
                source,
            })?;
        writeln!(file, "{line}").map_err(|source| StoreError::Write {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    /// Replay all records in append order.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).map_err(|source| StoreError::Read {
            path: self.path.display().to_string(),
            source,
        })?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|source| StoreError::Read {
                path: self.path.display().to_string(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Rec {
        id: u32,
        msg: String,
    }

    #[test]
    fn test_append_and_read_all_preserves_order() {
        let dir = tempdir().unwrap();
        let log = EventLog::open(dir.path().join("events.jsonl")).unwrap();

        log.append(&Rec { id: 1, msg: "first".into() }).unwrap();
        log.append(&Rec { id: 2, msg: "second".into() }).unwrap();

        let records: Vec<Rec> = log.read_all().unwrap();
        assert_eq!(records, vec![Rec { id: 1, msg: "first".into() }, Rec { id: 2, msg: "second".into() }]);
    }

    #[test]
    fn test_read_all_missing_file_returns_empty() {
        let dir = tempdir().unwrap();
        let log = EventLog::open(dir.path().join("events.jsonl")).unwrap();
        let records: Vec<Rec> = log.read_all().unwrap();
        assert!(records.is_empty());
    }
}
