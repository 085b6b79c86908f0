//! In-process stand-in for the container backend. Understands a handful of
//! tool invocations and acts on the mounted directory the way the real tools
//! would, so pipeline tests run without a daemon.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use refile::config::Settings;
use refile::sandbox::{IsolationBackend, Mount, StepOutput};
use refile::store::UserStore;
use refile::{Engine, EngineError};
use tempfile::TempDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Ready,
    Unreachable,
    ImageMissing,
}

pub struct ScriptedBackend {
    pub health: Health,
    pub ran: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::with_health(Health::Ready)
    }

    pub fn with_health(health: Health) -> Self {
        ScriptedBackend {
            health,
            ran: Mutex::new(Vec::new()),
        }
    }

    pub fn ran(&self) -> Vec<String> {
        self.ran.lock().unwrap().clone()
    }
}

fn ok() -> StepOutput {
    StepOutput {
        exit_code: 0,
        stdout: String::new(),
        stderr: String::new(),
    }
}

fn failed(code: i32, stderr: impl Into<String>) -> StepOutput {
    StepOutput {
        exit_code: code,
        stdout: String::new(),
        stderr: stderr.into(),
    }
}

/// `tag:` followed by the input's bytes, so equal inputs give equal outputs.
fn transcode(dir: &Path, input: &str, output: &str, tag: &str) -> StepOutput {
    match fs::read(dir.join(input)) {
        Ok(bytes) => {
            let mut data = format!("{tag}:").into_bytes();
            data.extend_from_slice(&bytes);
            fs::write(dir.join(output), data).unwrap();
            ok()
        }
        Err(_) => failed(1, format!("{input}: No such file or directory\n")),
    }
}

#[async_trait]
impl IsolationBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn preflight(&self) -> Result<(), EngineError> {
        match self.health {
            Health::Ready => Ok(()),
            Health::Unreachable => Err(EngineError::BackendUnreachable(
                "connection refused".to_string(),
            )),
            Health::ImageMissing => Err(EngineError::ImageMissing("my-base-image-clis".to_string())),
        }
    }

    async fn run(
        &self,
        mount: &Mount,
        command: &str,
        limit: Duration,
    ) -> Result<StepOutput, EngineError> {
        self.ran.lock().unwrap().push(command.to_string());
        let dir = mount.host_dir.as_path();
        let words = shlex::split(command).unwrap_or_default();
        let args: Vec<&str> = words.iter().map(String::as_str).collect();

        let out = match args.as_slice() {
            ["ffmpeg", rest @ ..] => {
                let input = rest
                    .iter()
                    .position(|a| *a == "-i")
                    .and_then(|i| rest.get(i + 1));
                match (input, rest.last()) {
                    (Some(input), Some(output)) => transcode(dir, input, output, "audio"),
                    _ => failed(1, "ffmpeg: missing arguments"),
                }
            }
            ["convert", input, output] => transcode(dir, input, output, "image"),
            ["touch", name] => {
                fs::write(dir.join(name), b"").unwrap();
                ok()
            }
            ["write", name, text] => {
                fs::write(dir.join(name), text.as_bytes()).unwrap();
                ok()
            }
            ["rm", name] => match fs::remove_file(dir.join(name)) {
                Ok(()) => ok(),
                Err(_) => failed(1, format!("rm: cannot remove '{name}'")),
            },
            ["sleep", ..] => {
                return Err(EngineError::TimedOut {
                    command: command.to_string(),
                    limit_secs: limit.as_secs(),
                })
            }
            ["false"] => failed(1, ""),
            _ => failed(127, format!("sh: {command}: not found\n")),
        };
        Ok(out)
    }
}

/// Engine over a fresh temporary upload root.
pub fn engine(health: Health) -> (TempDir, Engine<ScriptedBackend>) {
    let root = tempfile::tempdir().unwrap();
    let settings = Settings {
        upload_root: root.path().to_path_buf(),
        command_timeout_secs: 5,
        ..Settings::default()
    };
    let store = UserStore::new(&settings.upload_root);
    let engine = Engine::new(store, ScriptedBackend::with_health(health), &settings);
    (root, engine)
}

/// Sorted file names in `owner`'s directory.
pub fn files_of(root: &Path, owner: &str) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root.join(owner))
        .unwrap()
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}
