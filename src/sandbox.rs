use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::schema::StepReport;

pub mod docker;

pub use docker::DockerBackend;

/// The single host directory made visible to the disposable environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Absolute host path, read-write.
    pub host_dir: PathBuf,
    /// Fixed path inside the environment; also the working directory.
    pub target: String,
    /// `uid:gid` the process runs as, when the platform has the concept.
    pub user: Option<String>,
}

impl Mount {
    pub fn for_dir(dir: &Path, target: &str) -> Result<Self, EngineError> {
        let host_dir = dir
            .canonicalize()
            .map_err(|e| EngineError::io(format!("resolve {}", dir.display()), e))?;
        let user = owner_ids(&host_dir);
        Ok(Mount {
            host_dir,
            target: target.to_string(),
            user,
        })
    }
}

/// Raw outcome of one atomic command. A non-zero exit is not an error here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs one command string in a fresh, disposable environment with `mount`
/// as its only host-visible state.
///
/// Implementations tear the environment down after each call, including when
/// `limit` expires, in which case they return [`EngineError::TimedOut`].
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Verify the backend is reachable and the execution image exists.
    async fn preflight(&self) -> Result<(), EngineError>;

    async fn run(
        &self,
        mount: &Mount,
        command: &str,
        limit: Duration,
    ) -> Result<StepOutput, EngineError>;
}

/// Outcome of a sequence: reports for every step that ran, and the error
/// that stopped it early, if any.
#[derive(Debug)]
pub struct SequenceOutcome {
    pub steps: Vec<StepReport>,
    pub failure: Option<EngineError>,
}

/// Run `steps` strictly in order, stopping at the first non-zero exit or
/// backend error. Earlier steps' effects on the mount are kept.
pub async fn run_sequence<B: IsolationBackend + ?Sized>(
    backend: &B,
    mount: &Mount,
    steps: &[String],
    limit: Duration,
) -> SequenceOutcome {
    let mut reports = Vec::with_capacity(steps.len());

    for (index, command) in steps.iter().enumerate() {
        let started = Instant::now();
        let output = match backend.run(mount, command, limit).await {
            Ok(output) => output,
            Err(error) => {
                warn!(backend = backend.name(), step = index, error = %error, "step aborted");
                return SequenceOutcome {
                    steps: reports,
                    failure: Some(error),
                };
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            backend = backend.name(),
            step = index,
            exit_code = output.exit_code,
            duration_ms = duration_ms,
            "step finished"
        );

        let exit_code = output.exit_code;
        let stderr = output.stderr.trim().to_string();
        reports.push(StepReport {
            command: command.clone(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms,
        });
        if exit_code != 0 {
            let stderr = if stderr.is_empty() {
                "Command failed".to_string()
            } else {
                stderr
            };
            return SequenceOutcome {
                failure: Some(EngineError::CommandFailed {
                    command: command.clone(),
                    exit_code,
                    stderr,
                }),
                steps: reports,
            };
        }
    }

    SequenceOutcome {
        steps: reports,
        failure: None,
    }
}

/// Numeric owner of `dir` as `uid:gid`, so files written through the mount
/// belong to the same identity as the directory.
#[cfg(unix)]
pub fn owner_ids(dir: &Path) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::metadata(dir).ok()?;
    Some(format!("{}:{}", meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
pub fn owner_ids(_dir: &Path) -> Option<String> {
    None
}
