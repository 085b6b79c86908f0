//! Request pipeline: mapping, validation, sequencing, isolated execution,
//! diffing and registration, all under the owner's directory lock.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::agent::{render_user_message, ConversationContext, Proposer};
use crate::config::Settings;
use crate::error::{EngineError, RunFailure};
use crate::mapper;
use crate::observability::ExecutionContext;
use crate::ports::Clock;
use crate::preset::{render_preset_command, Preset};
use crate::registrar;
use crate::sandbox::{run_sequence, IsolationBackend, Mount};
use crate::schema::{CommandProposal, ExecutionResult};
use crate::sequencer;
use crate::store::UserStore;
use crate::validator;

pub struct Engine<B> {
    store: UserStore,
    backend: B,
    mount_path: String,
    timeout: Duration,
}

impl<B: IsolationBackend> Engine<B> {
    pub fn new(store: UserStore, backend: B, settings: &Settings) -> Self {
        Engine {
            store,
            backend,
            mount_path: settings.mount_path.clone(),
            timeout: settings.command_timeout(),
        }
    }

    pub fn store(&self) -> &UserStore {
        &self.store
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run one proposal against `owner`'s directory.
    pub async fn process(
        &self,
        owner: &str,
        proposal: &CommandProposal,
    ) -> Result<ExecutionResult, RunFailure> {
        let request_id = Uuid::new_v4().to_string();
        let ctx = ExecutionContext::new(&request_id, owner);
        let span = ctx.span();
        let result = self
            .process_inner(&ctx, proposal)
            .instrument(span)
            .await;
        match &result {
            Ok(done) => ctx.record_completion(done.steps.len(), done.new_files.len()),
            Err(failure) => match &failure.error {
                EngineError::Rejected { command, reason } => ctx.record_rejection(command, reason),
                other => ctx.record_error(other.kind().as_str(), &other.to_string()),
            },
        }
        result.map_err(|mut failure| {
            failure.request_id = Some(request_id);
            failure
        })
    }

    async fn process_inner(
        &self,
        ctx: &ExecutionContext,
        proposal: &CommandProposal,
    ) -> Result<ExecutionResult, RunFailure> {
        let owner = ctx.owner.as_str();
        let dir = self.store.user_dir(owner)?;
        let _guard = self.store.lock(owner).await;

        let inputs = mapper::resolve(&dir, &proposal.declared_inputs);
        let steps = sequencer::plan(proposal)?;
        validator::validate_all(&steps)?;
        self.backend.preflight().await?;

        let mount = Mount::for_dir(&dir, &self.mount_path)?;
        let before = registrar::snapshot(&dir);
        info!(steps = steps.len(), inputs = inputs.len(), "running sequence");
        let outcome = run_sequence(&self.backend, &mount, &steps, self.timeout).await;
        let after = registrar::snapshot(&dir);

        let events = registrar::diff(&before, &after);
        let registered = registrar::register(&dir, owner, &events);

        let new_files = match (outcome.failure, registered) {
            (None, Ok(files)) => files,
            (None, Err(registration)) => {
                return Err(RunFailure {
                    error: registration.error,
                    partial_files: registration.registered,
                    request_id: None,
                })
            }
            (Some(error), Ok(partial_files)) => {
                return Err(RunFailure {
                    error,
                    partial_files,
                    request_id: None,
                })
            }
            (Some(error), Err(registration)) => {
                warn!(error = %registration.error, "could not register every file from the failed run");
                return Err(RunFailure {
                    error,
                    partial_files: registration.registered,
                    request_id: None,
                });
            }
        };

        Ok(ExecutionResult {
            request_id: ctx.request_id.clone(),
            owner: owner.to_string(),
            inputs,
            steps: outcome.steps,
            events,
            new_files,
        })
    }

    /// Ask `proposer` for a command, remember the exchange, run the proposal.
    pub async fn process_prompt<P: Proposer + ?Sized>(
        &self,
        proposer: &P,
        ctx: &mut ConversationContext,
        prompt: &str,
    ) -> Result<(CommandProposal, ExecutionResult), RunFailure> {
        let dir = self.store.user_dir(&ctx.owner)?;
        if ctx.files.is_empty() {
            ctx.files = mapper::list_files(&dir);
        }
        let proposal = proposer.propose(prompt, ctx).await?;
        let reply = serde_json::to_string(&proposal)
            .map_err(|e| EngineError::MalformedProposal(e.to_string()))?;
        ctx.record_exchange(render_user_message(prompt, &ctx.files), reply);

        let owner = ctx.owner.clone();
        let result = self.process(&owner, &proposal).await?;
        Ok((proposal, result))
    }

    /// Render and run a preset. Every mapped input must resolve to a stored file.
    pub async fn run_preset(
        &self,
        owner: &str,
        preset: &Preset,
        mappings: &BTreeMap<String, String>,
        clock: &dyn Clock,
    ) -> Result<(String, ExecutionResult), RunFailure> {
        let dir = self.store.user_dir(owner)?;
        let mut resolved = BTreeMap::new();
        for (var, reference) in mappings {
            let name = mapper::resolve(&dir, std::slice::from_ref(reference))
                .into_iter()
                .next()
                .ok_or_else(|| EngineError::NotFound(format!("input '{reference}' for {{{var}}}")))?;
            resolved.insert(var.clone(), name);
        }

        let (command, expected) = render_preset_command(
            &preset.command_template,
            &resolved,
            &preset.output_patterns,
            clock.now(),
        );
        info!(preset = %preset.name, command = %command, "rendered preset");

        let proposal = CommandProposal {
            raw_command: command.clone(),
            command_template: Some(preset.command_template.clone()),
            declared_inputs: resolved.into_values().collect(),
            expected_outputs: expected,
            description: preset.description.clone(),
            steps: Vec::new(),
        };
        let result = self.process(owner, &proposal).await?;
        Ok((command, result))
    }
}
