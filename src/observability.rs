//! Structured logging for refile runs.

use std::time::Instant;
use tracing::{error, info, warn, Span};
use tracing_subscriber::EnvFilter;

use crate::adapters::StdEnvAdapter;
use crate::ports::EnvironmentPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// `REFILE_LOG_JSON=1` selects JSON lines; anything else is pretty output.
    pub fn from_env<E: EnvironmentPort>(env: &E) -> Self {
        match env.get_var("REFILE_LOG_JSON") {
            Ok(v) if v.trim() == "1" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global subscriber. `RUST_LOG` sets the filter (default `info`).
/// Logs go to stderr so stdout stays machine-readable.
pub fn init_observability() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match LogFormat::from_env(&StdEnvAdapter) {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .try_init()?,
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()?,
    }
    Ok(())
}

/// Per-request logging context.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub request_id: String,
    pub owner: String,
    pub start_time: Instant,
}

impl ExecutionContext {
    pub fn new(request_id: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            owner: owner.into(),
            start_time: Instant::now(),
        }
    }

    pub fn span(&self) -> Span {
        tracing::info_span!(
            "request",
            request_id = %self.request_id,
            owner = %self.owner,
        )
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn record_completion(&self, steps: usize, new_files: usize) {
        let duration_ms = self.elapsed_ms();
        info!(
            request_id = %self.request_id,
            steps = steps,
            new_files = new_files,
            duration_ms = duration_ms,
            "Execution completed"
        );
        info!(
            metric_name = "refile_execution_duration_ms",
            value = duration_ms,
            request_id = %self.request_id,
            "metric"
        );
    }

    pub fn record_rejection(&self, command: &str, reason: &str) {
        warn!(
            request_id = %self.request_id,
            command = %command,
            reason = %reason,
            "Command rejected"
        );
        info!(
            metric_name = "refile_rejections_total",
            value = 1,
            request_id = %self.request_id,
            "metric"
        );
    }

    pub fn record_error(&self, kind: &str, message: &str) {
        error!(
            request_id = %self.request_id,
            kind = %kind,
            message = %message,
            "Execution error"
        );
        info!(
            metric_name = "refile_errors_total",
            value = 1,
            request_id = %self.request_id,
            kind = %kind,
            "metric"
        );
    }
}
