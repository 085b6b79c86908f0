use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, ErrorReport, RunFailure};
use crate::schema::{ExecutionResult, StoredFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// What the metadata store keeps about one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub request_id: String,
    pub owner: String,
    pub command: String,
    pub status: RunStatus,
    #[serde(default)]
    pub files: Vec<StoredFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    pub recorded_at: DateTime<Utc>,
}

impl RunRecord {
    /// Record for a finished run. Failures without a request id (the run never
    /// started) produce no record.
    pub fn from_outcome(
        owner: &str,
        command: &str,
        outcome: &Result<ExecutionResult, RunFailure>,
        recorded_at: DateTime<Utc>,
    ) -> Option<RunRecord> {
        let (request_id, status, files, error) = match outcome {
            Ok(done) => (
                done.request_id.clone(),
                RunStatus::Completed,
                done.new_files.clone(),
                None,
            ),
            Err(failure) => (
                failure.request_id.clone()?,
                RunStatus::Failed,
                failure.partial_files.clone(),
                Some(failure.report()),
            ),
        };
        Some(RunRecord {
            request_id,
            owner: owner.to_string(),
            command: command.to_string(),
            status,
            files,
            error,
            recorded_at,
        })
    }
}

pub trait Ledger: Send + Sync {
    fn put(&self, rec: RunRecord) -> Result<(), EngineError>;
    fn get(&self, request_id: &str) -> Result<Option<RunRecord>, EngineError>;
    fn list_for_owner(&self, owner: &str) -> Result<Vec<RunRecord>, EngineError>;
}

#[derive(Default, Debug)]
pub struct InMemoryLedger {
    inner: Mutex<HashMap<String, RunRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ledger for InMemoryLedger {
    fn put(&self, rec: RunRecord) -> Result<(), EngineError> {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.insert(rec.request_id.clone(), rec);
        Ok(())
    }

    fn get(&self, request_id: &str) -> Result<Option<RunRecord>, EngineError> {
        let g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(g.get(request_id).cloned())
    }

    fn list_for_owner(&self, owner: &str) -> Result<Vec<RunRecord>, EngineError> {
        let g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<RunRecord> = g.values().filter(|r| r.owner == owner).cloned().collect();
        out.sort_by_key(|r| r.recorded_at);
        Ok(out)
    }
}

/// Append-only JSON lines file; the last record for an id wins.
#[derive(Debug)]
pub struct JsonlLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonlLedger {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<Vec<RunRecord>, EngineError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EngineError::io(format!("read {}", self.path.display()), e)),
        };
        let mut records = Vec::new();
        for (lineno, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunRecord>(line) {
                Ok(rec) => records.push(rec),
                Err(e) => warn!(line = lineno + 1, error = %e, "skipping malformed ledger line"),
            }
        }
        Ok(records)
    }
}

impl Ledger for JsonlLedger {
    fn put(&self, rec: RunRecord) -> Result<(), EngineError> {
        let _g = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let ctx = || format!("append {}", self.path.display());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(ctx(), e))?;
        }
        let mut line = serde_json::to_string(&rec)
            .map_err(|e| EngineError::io(ctx(), std::io::Error::other(e)))?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| EngineError::io(ctx(), e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| EngineError::io(ctx(), e))
    }

    fn get(&self, request_id: &str) -> Result<Option<RunRecord>, EngineError> {
        Ok(self
            .read_all()?
            .into_iter()
            .rev()
            .find(|r| r.request_id == request_id))
    }

    fn list_for_owner(&self, owner: &str) -> Result<Vec<RunRecord>, EngineError> {
        let mut latest: HashMap<String, RunRecord> = HashMap::new();
        for rec in self.read_all()? {
            if rec.owner == owner {
                latest.insert(rec.request_id.clone(), rec);
            }
        }
        let mut out: Vec<RunRecord> = latest.into_values().collect();
        out.sort_by_key(|r| r.recorded_at);
        Ok(out)
    }
}
