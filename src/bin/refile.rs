use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::warn;

use refile::adapters::{StdEnvAdapter, SystemClock};
use refile::agent::{ConversationContext, StaticProposer};
use refile::config::Settings;
use refile::ledger::{JsonlLedger, Ledger, RunRecord};
use refile::observability::init_observability;
use refile::ports::Clock;
use refile::preset::Preset;
use refile::sandbox::docker::DockerBackend;
use refile::sandbox::IsolationBackend;
use refile::store::{validate_user_id, UserStore};
use refile::{CommandProposal, Engine, EngineError, ErrorKind, ErrorReport, ExecutionResult, RunFailure};

const LEDGER_FILE: &str = "ledger.jsonl";

#[derive(Parser, Debug)]
#[command(name = "refile", version)]
struct Cli {
    /// YAML settings file; REFILE_* variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command proposal against a user's files
    Exec {
        #[arg(long)]
        user: String,
        #[arg(short = 'f', long)]
        proposal: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run a prompt through a fixed proposer
    Prompt {
        #[arg(long)]
        user: String,
        #[arg(short = 'f', long)]
        proposal: PathBuf,
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Render and run a preset
    Preset {
        #[arg(long)]
        user: String,
        #[arg(long)]
        preset: PathBuf,
        /// JSON object mapping template variables to file references
        #[arg(long)]
        mappings: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Upload {
        #[arg(long)]
        user: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    List {
        #[arg(long)]
        user: String,
    },
    Delete {
        #[arg(long)]
        user: String,
        #[arg(long)]
        id: String,
    },
    /// Show the recorded outcome of a request
    Status { request_id: String },
    /// List recorded runs for a user, oldest first
    History {
        #[arg(long)]
        user: String,
    },
    /// Check that the container backend and image are usable
    Check,
}

fn main() {
    let cli = Cli::parse();
    let _ = init_observability();

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            std::process::exit(4);
        }
    };
    let code = rt.block_on(async move {
        match run(cli).await {
            Ok(code) => code,
            Err(e) => {
                let report = match e.downcast_ref::<EngineError>() {
                    Some(engine) => engine.report(),
                    None => ErrorReport {
                        kind: ErrorKind::UserInput,
                        message: format!("{e:#}"),
                        command: None,
                        stderr: None,
                        request_id: None,
                        partial_files: Vec::new(),
                    },
                };
                emit_error(&report);
                e.downcast_ref::<EngineError>().map(exit_code).unwrap_or(1)
            }
        }
    });
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let settings = Settings::load(cli.config.as_deref(), &StdEnvAdapter)?;
    let store = UserStore::new(&settings.upload_root);
    let ledger = JsonlLedger::new(store.root().join(LEDGER_FILE));

    match cli.command {
        Commands::Exec { user, proposal, out } => {
            let proposal: CommandProposal = read_json(&proposal)?;
            let engine = Engine::new(store, DockerBackend::from_settings(&settings), &settings);
            let result = engine.process(&user, &proposal).await;
            record(&ledger, &user, &proposal.raw_command, &result);
            finish(result, out.as_deref())
        }
        Commands::Prompt {
            user,
            proposal,
            prompt,
            out,
        } => {
            let proposer = StaticProposer {
                proposal: read_json(&proposal)?,
            };
            let files = store.list(&user)?.into_iter().map(|e| e.stored_name).collect();
            let mut ctx = ConversationContext::new(&user, settings.history_window).with_files(files);
            let engine = Engine::new(store, DockerBackend::from_settings(&settings), &settings);
            let command = proposer.proposal.raw_command.clone();
            let result = engine
                .process_prompt(&proposer, &mut ctx, &prompt)
                .await
                .map(|(_, done)| done);
            record(&ledger, &user, &command, &result);
            finish(result, out.as_deref())
        }
        Commands::Preset {
            user,
            preset,
            mappings,
            out,
        } => {
            let preset: Preset = read_json(&preset)?;
            let mappings: BTreeMap<String, String> =
                serde_json::from_str(&mappings).context("--mappings must be a JSON object of strings")?;
            let engine = Engine::new(store, DockerBackend::from_settings(&settings), &settings);
            let result = engine
                .run_preset(&user, &preset, &mappings, &SystemClock)
                .await;
            let command = match &result {
                Ok((command, _)) => command.clone(),
                Err(_) => preset.command_template.clone(),
            };
            let result = result.map(|(_, done)| done);
            record(&ledger, &user, &command, &result);
            finish(result, out.as_deref())
        }
        Commands::Upload { user, files } => {
            let mut stored = Vec::with_capacity(files.len());
            for path in &files {
                let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
                let original = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?;
                stored.push(store.upload(&user, original, &bytes).await?);
            }
            print_json(&stored, None)?;
            Ok(0)
        }
        Commands::List { user } => {
            print_json(&store.list(&user)?, None)?;
            Ok(0)
        }
        Commands::Delete { user, id } => {
            let deleted = store.delete(&user, &id).await?;
            print_json(&serde_json::json!({ "id": id, "deleted": deleted }), None)?;
            Ok(0)
        }
        Commands::Status { request_id } => match ledger.get(&request_id)? {
            Some(rec) => {
                print_json(&rec, None)?;
                Ok(0)
            }
            None => Err(EngineError::NotFound(format!("request '{request_id}'")).into()),
        },
        Commands::History { user } => {
            validate_user_id(&user)?;
            print_json(&ledger.list_for_owner(&user)?, None)?;
            Ok(0)
        }
        Commands::Check => {
            let backend = DockerBackend::from_settings(&settings);
            backend.preflight().await?;
            print_json(
                &serde_json::json!({ "backend": backend.name(), "image": backend.image, "ok": true }),
                None,
            )?;
            Ok(0)
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let data = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data)
        .map_err(|e| EngineError::MalformedProposal(format!("{}: {e}", path.display())).into())
}

fn finish(result: Result<ExecutionResult, RunFailure>, out: Option<&Path>) -> anyhow::Result<i32> {
    match result {
        Ok(done) => {
            print_json(&done, out)?;
            Ok(0)
        }
        Err(failure) => {
            emit_error(&failure.report());
            Ok(exit_code(&failure.error))
        }
    }
}

fn record(
    ledger: &dyn Ledger,
    owner: &str,
    command: &str,
    result: &Result<ExecutionResult, RunFailure>,
) {
    let Some(rec) = RunRecord::from_outcome(owner, command, result, SystemClock.now()) else {
        return;
    };
    if let Err(e) = ledger.put(rec) {
        warn!(error = %e, "could not record run");
    }
}

fn exit_code(err: &EngineError) -> i32 {
    if matches!(err, EngineError::Rejected { .. }) {
        return 2;
    }
    match err.kind() {
        ErrorKind::Infrastructure => 4,
        ErrorKind::Execution => 3,
        ErrorKind::UserInput | ErrorKind::Unexpected => 1,
    }
}

fn print_json<T: Serialize>(value: &T, out: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => fs::write(path, json.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn emit_error(report: &ErrorReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => eprintln!("{json}"),
        Err(_) => eprintln!("error: {}", report.message),
    }
}
