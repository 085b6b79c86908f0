use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::StoredFile;

/// Coarse classification used for exit codes and caller-facing reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Infrastructure,
    UserInput,
    Execution,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Infrastructure => "infrastructure",
            ErrorKind::UserInput => "user_input",
            ErrorKind::Execution => "execution",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("isolation backend unreachable: {0}")]
    BackendUnreachable(String),
    #[error("execution image '{0}' not found")]
    ImageMissing(String),
    #[error("isolation backend error: {0}")]
    Backend(String),
    #[error("command rejected: {reason}")]
    Rejected { command: String, reason: String },
    #[error("proposal contains no command to run")]
    NoCommand,
    #[error("command failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },
    #[error("command timed out after {limit_secs}s")]
    TimedOut { command: String, limit_secs: u64 },
    #[error("invalid user id '{0}'")]
    InvalidUser(String),
    #[error("invalid filename '{0}'")]
    InvalidFilename(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("malformed proposal: {0}")]
    MalformedProposal(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        EngineError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::BackendUnreachable(_) | EngineError::ImageMissing(_) => {
                ErrorKind::Infrastructure
            }
            EngineError::Rejected { .. }
            | EngineError::NoCommand
            | EngineError::InvalidUser(_)
            | EngineError::InvalidFilename(_)
            | EngineError::AccessDenied(_)
            | EngineError::NotFound(_)
            | EngineError::MalformedProposal(_) => ErrorKind::UserInput,
            EngineError::CommandFailed { .. } | EngineError::TimedOut { .. } => {
                ErrorKind::Execution
            }
            EngineError::Backend(_) | EngineError::Io { .. } => ErrorKind::Unexpected,
        }
    }

    /// The atomic command this error is attributed to, if any.
    pub fn command(&self) -> Option<&str> {
        match self {
            EngineError::Rejected { command, .. }
            | EngineError::CommandFailed { command, .. }
            | EngineError::TimedOut { command, .. } => Some(command),
            _ => None,
        }
    }

    pub fn report(&self) -> ErrorReport {
        let stderr = match self {
            EngineError::CommandFailed { stderr, .. } => Some(stderr.clone()),
            _ => None,
        };
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            command: self.command().map(str::to_string),
            stderr,
            request_id: None,
            partial_files: Vec::new(),
        }
    }
}

/// Structured error description handed back to callers instead of a raw error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partial_files: Vec<StoredFile>,
}

/// A failed run. Files produced by steps that finished before the failure are
/// already registered and listed in `partial_files`.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct RunFailure {
    #[source]
    pub error: EngineError,
    pub partial_files: Vec<StoredFile>,
    pub request_id: Option<String>,
}

impl RunFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn report(&self) -> ErrorReport {
        let mut report = self.error.report();
        report.partial_files = self.partial_files.clone();
        report.request_id = self.request_id.clone();
        report
    }
}

impl From<EngineError> for RunFailure {
    fn from(error: EngineError) -> Self {
        RunFailure {
            error,
            partial_files: Vec::new(),
            request_id: None,
        }
    }
}
