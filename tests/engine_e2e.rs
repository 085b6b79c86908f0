//! End-to-end pipeline tests against the scripted backend.

mod common;

use std::collections::BTreeMap;
use std::fs;

use chrono::TimeZone;
use pretty_assertions::assert_eq;
use refile::adapters::FixedClock;
use refile::agent::{ConversationContext, StaticProposer};
use refile::ledger::{InMemoryLedger, Ledger, RunRecord, RunStatus};
use refile::preset::{OutputPattern, Preset};
use refile::{CommandProposal, EngineError, ErrorKind, FileEvent, StoredFile};

use common::{engine, files_of, Health};

const USER: &str = "alice";

fn proposal(raw: &str, inputs: &[&str]) -> CommandProposal {
    CommandProposal::new(raw, inputs.iter().map(|s| s.to_string()).collect())
}

#[tokio::test]
async fn transcode_registers_one_new_file() {
    let (root, engine) = engine(Health::Ready);
    let input = engine.store().upload(USER, "a.mp4", b"video-bytes").await.unwrap();

    let cmd = format!("ffmpeg -i {} output.mp3", input.stored_name);
    let result = engine.process(USER, &proposal(&cmd, &["a.mp4"])).await.unwrap();

    assert_eq!(result.inputs, vec![input.stored_name.clone()]);
    assert_eq!(result.new_files.len(), 1);
    let out = &result.new_files[0];
    assert!(StoredFile::is_stored_name(&out.stored_name));
    assert!(out.stored_name.ends_with(".mp3"));
    assert_eq!(out.original_name, "output.mp3");
    assert_eq!(out.content_type, "audio/mpeg");
    assert_eq!(out.path, format!("{USER}/{}", out.stored_name));
    assert_eq!(result.events, vec![FileEvent::Created("output.mp3".into())]);

    let mut expected = vec![input.stored_name.clone(), out.stored_name.clone()];
    expected.sort();
    assert_eq!(files_of(root.path(), USER), expected);
    let original = fs::read(root.path().join(USER).join(&input.stored_name)).unwrap();
    assert_eq!(original, b"video-bytes");
}

#[tokio::test]
async fn first_failure_stops_the_chain() {
    let (root, engine) = engine(Health::Ready);
    let cmd = "ffmpeg -i missing.mp4 out.mp3 && touch never.txt";
    let failure = engine.process(USER, &proposal(cmd, &[])).await.unwrap_err();

    assert_eq!(engine.backend().ran(), vec!["ffmpeg -i missing.mp4 out.mp3".to_string()]);
    match &failure.error {
        EngineError::CommandFailed { command, exit_code, stderr } => {
            assert_eq!(command, "ffmpeg -i missing.mp4 out.mp3");
            assert_eq!(*exit_code, 1);
            assert!(stderr.contains("missing.mp4: No such file or directory"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(failure.kind(), ErrorKind::Execution);
    assert!(failure.request_id.is_some());
    assert!(files_of(root.path(), USER).is_empty());
}

#[tokio::test]
async fn repeated_runs_get_fresh_ids_and_equal_digests() {
    let (_root, engine) = engine(Health::Ready);
    let input = engine.store().upload(USER, "clip.mp4", b"same").await.unwrap();
    let cmd = format!("ffmpeg -i {} output.mp3", input.stored_name);

    let first = engine.process(USER, &proposal(&cmd, &[])).await.unwrap();
    let second = engine.process(USER, &proposal(&cmd, &[])).await.unwrap();

    let (a, b) = (&first.new_files[0], &second.new_files[0]);
    assert_ne!(a.id, b.id);
    assert_ne!(a.stored_name, b.stored_name);
    assert_eq!(a.sha256, b.sha256);
    assert_ne!(first.request_id, second.request_id);
}

#[tokio::test]
async fn rejected_commands_never_reach_the_backend() {
    let (_root, engine) = engine(Health::Ready);
    let failure = engine
        .process(USER, &proposal("touch a.txt && ffmpeg out.mp3", &[]))
        .await
        .unwrap_err();

    match &failure.error {
        EngineError::Rejected { command, reason } => {
            assert_eq!(command, "ffmpeg out.mp3");
            assert!(reason.contains("-i"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(engine.backend().ran().is_empty());
}

#[tokio::test]
async fn empty_proposal_is_an_input_error() {
    let (_root, engine) = engine(Health::Ready);
    let failure = engine.process(USER, &proposal("  \n ", &[])).await.unwrap_err();
    assert!(matches!(failure.error, EngineError::NoCommand));
    assert_eq!(failure.kind(), ErrorKind::UserInput);
}

#[tokio::test]
async fn unreachable_backend_is_fatal() {
    let (_root, engine) = engine(Health::Unreachable);
    let failure = engine.process(USER, &proposal("touch a.txt", &[])).await.unwrap_err();
    assert!(matches!(failure.error, EngineError::BackendUnreachable(_)));
    assert_eq!(failure.kind(), ErrorKind::Infrastructure);
    assert!(engine.backend().ran().is_empty());
}

#[tokio::test]
async fn missing_image_is_fatal() {
    let (_root, engine) = engine(Health::ImageMissing);
    let failure = engine.process(USER, &proposal("touch a.txt", &[])).await.unwrap_err();
    assert!(matches!(failure.error, EngineError::ImageMissing(_)));
    assert_eq!(failure.report().kind, ErrorKind::Infrastructure);
}

#[tokio::test]
async fn invalid_owner_is_refused() {
    let (root, engine) = engine(Health::Ready);
    let failure = engine.process("../bob", &proposal("touch a.txt", &[])).await.unwrap_err();
    assert!(matches!(failure.error, EngineError::InvalidUser(_)));
    assert!(fs::read_dir(root.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn timeout_reports_the_limit() {
    let (_root, engine) = engine(Health::Ready);
    let failure = engine.process(USER, &proposal("sleep 1000", &[])).await.unwrap_err();
    assert!(matches!(
        failure.error,
        EngineError::TimedOut { limit_secs: 5, .. }
    ));
}

#[tokio::test]
async fn outputs_of_completed_steps_survive_a_failure() {
    let (root, engine) = engine(Health::Ready);
    let failure = engine
        .process(USER, &proposal("touch notes.txt && false", &[]))
        .await
        .unwrap_err();

    assert_eq!(failure.partial_files.len(), 1);
    let kept = &failure.partial_files[0];
    assert_eq!(kept.original_name, "notes.txt");
    assert!(StoredFile::is_stored_name(&kept.stored_name));
    assert_eq!(files_of(root.path(), USER), vec![kept.stored_name.clone()]);

    let report = failure.report();
    assert_eq!(report.partial_files.len(), 1);
    assert_eq!(report.stderr.as_deref(), Some("Command failed"));
}

#[tokio::test]
async fn rewriting_an_existing_file_is_not_reported() {
    let (root, engine) = engine(Health::Ready);
    let input = engine.store().upload(USER, "notes.txt", b"v1").await.unwrap();

    let cmd = format!("write {} v2", input.stored_name);
    let result = engine.process(USER, &proposal(&cmd, &[])).await.unwrap();

    assert!(result.events.is_empty());
    assert!(result.new_files.is_empty());
    let now = fs::read(root.path().join(USER).join(&input.stored_name)).unwrap();
    assert_eq!(now, b"v2");
}

#[tokio::test]
async fn removed_files_are_reported_not_registered() {
    let (root, engine) = engine(Health::Ready);
    let input = engine.store().upload(USER, "old.txt", b"x").await.unwrap();

    let cmd = format!("rm {}", input.stored_name);
    let result = engine.process(USER, &proposal(&cmd, &[])).await.unwrap();

    assert_eq!(result.events, vec![FileEvent::Removed(input.stored_name.clone())]);
    assert!(result.new_files.is_empty());
    assert!(files_of(root.path(), USER).is_empty());
}

#[tokio::test]
async fn structured_steps_run_without_splitting() {
    let (_root, engine) = engine(Health::Ready);
    let mut p = proposal("ignored && ignored", &[]);
    p.steps = vec!["touch one.txt".into(), "touch two.txt".into()];

    let result = engine.process(USER, &p).await.unwrap();
    assert_eq!(engine.backend().ran(), p.steps);
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.new_files.len(), 2);
}

#[tokio::test]
async fn preset_resolves_mappings_and_runs() {
    let (_root, engine) = engine(Health::Ready);
    let input = engine.store().upload(USER, "photo.png", b"pixels").await.unwrap();
    let preset = Preset {
        name: "to-jpeg".into(),
        description: "convert to jpeg".into(),
        command_template: "convert {input_file} {output_file}".into(),
        output_patterns: vec![OutputPattern {
            name: "output_file".into(),
            template: "converted_{timestamp}.jpg".into(),
        }],
    };
    let mappings: BTreeMap<String, String> =
        [("input_file".to_string(), "photo.png".to_string())].into();
    let clock = FixedClock(chrono::Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap());

    let (command, result) = engine.run_preset(USER, &preset, &mappings, &clock).await.unwrap();

    assert_eq!(
        command,
        format!("convert {} converted_20240501_083000.jpg", input.stored_name)
    );
    assert_eq!(result.new_files.len(), 1);
    assert_eq!(result.new_files[0].original_name, "converted_20240501_083000.jpg");
    assert_eq!(result.new_files[0].content_type, "image/jpeg");
}

#[tokio::test]
async fn preset_with_unknown_input_fails_before_running() {
    let (_root, engine) = engine(Health::Ready);
    let preset = Preset {
        name: "to-jpeg".into(),
        description: String::new(),
        command_template: "convert {input_file} out.jpg".into(),
        output_patterns: vec![],
    };
    let mappings: BTreeMap<String, String> =
        [("input_file".to_string(), "nothing.png".to_string())].into();
    let clock = FixedClock(chrono::Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap());

    let failure = engine.run_preset(USER, &preset, &mappings, &clock).await.unwrap_err();
    assert!(matches!(failure.error, EngineError::NotFound(_)));
    assert!(engine.backend().ran().is_empty());
}

#[tokio::test]
async fn prompt_runs_the_proposed_command_and_keeps_history() {
    let (_root, engine) = engine(Health::Ready);
    let input = engine.store().upload(USER, "song.mp4", b"tune").await.unwrap();
    let proposer = StaticProposer {
        proposal: proposal(
            &format!("ffmpeg -i {} song.mp3", input.stored_name),
            &["song.mp4"],
        ),
    };
    let mut ctx = ConversationContext::new(USER, 10);

    let (proposed, result) = engine
        .process_prompt(&proposer, &mut ctx, "extract the audio")
        .await
        .unwrap();

    assert_eq!(proposed, proposer.proposal);
    assert_eq!(ctx.files, vec![input.stored_name.clone()]);
    assert_eq!(ctx.history.len(), 2);
    assert!(ctx.history[0].content.contains("extract the audio"));
    assert_eq!(result.new_files.len(), 1);
}

#[tokio::test]
async fn outcomes_are_recorded_per_owner() {
    let (_root, engine) = engine(Health::Ready);
    let ledger = InMemoryLedger::new();
    let at = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();

    for (minute, cmd) in ["touch a.txt", "touch b.txt && false"].into_iter().enumerate() {
        let outcome = engine.process(USER, &proposal(cmd, &[])).await;
        let when = at + chrono::Duration::minutes(minute as i64);
        ledger
            .put(RunRecord::from_outcome(USER, cmd, &outcome, when).unwrap())
            .unwrap();
    }

    let runs = ledger.list_for_owner(USER).unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[1].status, RunStatus::Failed);
    assert_eq!(runs[1].files.len(), 1);
    assert_eq!(runs[1].error.as_ref().unwrap().kind, ErrorKind::Execution);
    assert!(ledger.list_for_owner("bob").unwrap().is_empty());
}

#[tokio::test]
async fn relative_input_paths_resolve_by_extension() {
    let (_root, engine) = engine(Health::Ready);
    let input = engine.store().upload(USER, "clip.mp4", b"v").await.unwrap();
    let cmd = format!("ffmpeg -i {} clip.mp3", input.stored_name);
    let result = engine
        .process(USER, &proposal(&cmd, &["./uploads/clip.mp4"]))
        .await
        .unwrap();
    assert_eq!(result.inputs, vec![input.stored_name]);
}

