//! `docker` CLI backend: one disposable container per atomic command.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{IsolationBackend, Mount, StepOutput};
use crate::config::Settings;
use crate::error::EngineError;

/// Exit status docker itself uses when it could not start the container. A
/// command inside the container may exit with the same status.
const DOCKER_RUN_FAILURE: i32 = 125;

/// What `docker inspect` reports about a container after `docker run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerState {
    /// Never created, e.g. the image is missing.
    Absent,
    /// Created, but its process did not start.
    NotStarted,
    /// The command ran; its exit status is the command's own.
    Ran,
}

#[derive(Debug, Clone)]
pub struct DockerBackend {
    pub docker_bin: String,
    pub image: String,
    pub memory_mb: u64,
    pub cpus: f64,
    pub pids_limit: u64,
    pub network: bool,
}

impl DockerBackend {
    pub fn from_settings(settings: &Settings) -> Self {
        DockerBackend {
            docker_bin: settings.docker_bin.clone(),
            image: settings.image.clone(),
            memory_mb: settings.memory_mb,
            cpus: settings.cpus,
            pids_limit: settings.pids_limit,
            network: settings.network,
        }
    }

    /// Arguments for `docker run` executing `command` under `mount`.
    pub fn run_args(&self, container: &str, mount: &Mount, command: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--name".into(),
            container.into(),
            "--pull".into(),
            "never".into(),
        ];
        if !self.network {
            args.extend(["--network".into(), "none".into()]);
        }
        if self.memory_mb > 0 {
            args.push(format!("--memory={}m", self.memory_mb));
        }
        if self.cpus > 0.0 {
            args.push(format!("--cpus={}", self.cpus));
        }
        if self.pids_limit > 0 {
            args.push(format!("--pids-limit={}", self.pids_limit));
        }
        args.push("-v".into());
        args.push(format!("{}:{}:rw", mount.host_dir.display(), mount.target));
        args.extend(["-w".into(), mount.target.clone()]);
        if let Some(user) = &mount.user {
            args.extend(["--user".into(), user.clone()]);
        }
        args.push(self.image.clone());
        args.extend(["sh".into(), "-c".into(), command.to_string()]);
        args
    }

    async fn docker(&self, args: &[&str]) -> Result<std::process::Output, std::io::Error> {
        Command::new(&self.docker_bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
    }

    async fn inspect_state(&self, container: &str) -> ContainerState {
        match self
            .docker(&["inspect", "--format", "{{.State.Error}}", container])
            .await
        {
            Ok(out) if out.status.success() => {
                if String::from_utf8_lossy(&out.stdout).trim().is_empty() {
                    ContainerState::Ran
                } else {
                    ContainerState::NotStarted
                }
            }
            _ => ContainerState::Absent,
        }
    }

    async fn force_remove(&self, container: &str) {
        match self.docker(&["rm", "-f", container]).await {
            Ok(out) if out.status.success() => debug!(container, "container removed"),
            Ok(out) => warn!(
                container,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "container removal failed"
            ),
            Err(e) => warn!(container, error = %e, "container removal failed"),
        }
    }
}

#[async_trait]
impl IsolationBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn preflight(&self) -> Result<(), EngineError> {
        let version = self
            .docker(&["version", "--format", "{{.Server.Version}}"])
            .await
            .map_err(|e| EngineError::BackendUnreachable(e.to_string()))?;
        if !version.status.success() {
            return Err(EngineError::BackendUnreachable(
                String::from_utf8_lossy(&version.stderr).trim().to_string(),
            ));
        }
        debug!(
            server = %String::from_utf8_lossy(&version.stdout).trim(),
            "docker daemon reachable"
        );

        let inspect = self
            .docker(&["image", "inspect", "--format", "{{.Id}}", &self.image])
            .await
            .map_err(|e| EngineError::BackendUnreachable(e.to_string()))?;
        if !inspect.status.success() {
            return Err(EngineError::ImageMissing(self.image.clone()));
        }
        Ok(())
    }

    async fn run(
        &self,
        mount: &Mount,
        command: &str,
        limit: Duration,
    ) -> Result<StepOutput, EngineError> {
        let container = format!("refile-{}", Uuid::new_v4());
        let args = self.run_args(&container, mount, command);
        debug!(container = %container, "starting disposable container");

        let child = Command::new(&self.docker_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::BackendUnreachable(e.to_string()))?;

        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                self.force_remove(&container).await;
                return Err(EngineError::Backend(e.to_string()));
            }
            Err(_) => {
                // The client process is killed on drop; the container needs an explicit removal.
                self.force_remove(&container).await;
                return Err(EngineError::TimedOut {
                    command: command.to_string(),
                    limit_secs: limit.as_secs(),
                });
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        let state = if exit_code == DOCKER_RUN_FAILURE {
            self.inspect_state(&container).await
        } else {
            ContainerState::Ran
        };
        if state != ContainerState::Absent {
            self.force_remove(&container).await;
        }
        if state != ContainerState::Ran {
            if stderr.contains("No such image") || stderr.contains("Unable to find image") {
                return Err(EngineError::ImageMissing(self.image.clone()));
            }
            return Err(EngineError::Backend(stderr.trim().to_string()));
        }

        Ok(StepOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}
