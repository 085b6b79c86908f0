use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ports::{env::EnvError, EnvironmentPort};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub upload_root: PathBuf,
    /// Pre-built image carrying ffmpeg, ImageMagick, poppler-utils and tesseract.
    pub image: String,
    pub mount_path: String,
    pub docker_bin: String,
    /// Wall-clock limit for one atomic command.
    pub command_timeout_secs: u64,
    pub memory_mb: u64,
    pub cpus: f64,
    pub pids_limit: u64,
    pub network: bool,
    /// Conversation turns kept per request context.
    pub history_window: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            upload_root: PathBuf::from("user-uploads"),
            image: "my-base-image-clis".to_string(),
            mount_path: "/data".to_string(),
            docker_bin: "docker".to_string(),
            command_timeout_secs: 300,
            memory_mb: 2048,
            cpus: 2.0,
            pids_limit: 256,
            network: false,
            history_window: 10,
        }
    }
}

impl Settings {
    /// Defaults, then the optional YAML file, then `REFILE_*` overrides.
    pub fn load<E: EnvironmentPort>(path: Option<&Path>, env: &E) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Settings::default(),
        };
        settings.apply_env(env)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env<E: EnvironmentPort>(&mut self, env: &E) -> Result<(), ConfigError> {
        if let Some(v) = env.parse_var::<PathBuf>("REFILE_UPLOAD_DIR")? {
            self.upload_root = v;
        }
        if let Some(v) = env.parse_var::<String>("REFILE_IMAGE")? {
            self.image = v;
        }
        if let Some(v) = env.parse_var::<String>("REFILE_MOUNT_PATH")? {
            self.mount_path = v;
        }
        if let Some(v) = env.parse_var::<String>("REFILE_DOCKER_BIN")? {
            self.docker_bin = v;
        }
        if let Some(v) = env.parse_var("REFILE_TIMEOUT_SECS")? {
            self.command_timeout_secs = v;
        }
        if let Some(v) = env.parse_var("REFILE_MEMORY_MB")? {
            self.memory_mb = v;
        }
        if let Some(v) = env.parse_var("REFILE_CPUS")? {
            self.cpus = v;
        }
        if let Some(v) = env.parse_var("REFILE_PIDS_LIMIT")? {
            self.pids_limit = v;
        }
        if let Some(v) = env.parse_var("REFILE_HISTORY_WINDOW")? {
            self.history_window = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "command_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.image.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "image",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.mount_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "mount_path",
                reason: format!("'{}' is not an absolute path", self.mount_path),
            });
        }
        if !self.cpus.is_finite() || self.cpus < 0.0 {
            return Err(ConfigError::Invalid {
                field: "cpus",
                reason: format!("{} is not a usable cpu count", self.cpus),
            });
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
