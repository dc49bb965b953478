//! Deferring failures to the pending-request store and resolving them.

use super::common::{CI_DEFAULT_TIMEOUT, init_test_logging, test_config, with_ci_timeout};
use cogshell::{
    Command, Engine, OutputEvent, StoreError,
    handoff::{DebugTrigger, HandoffOutcome},
    pending::JsonMap,
    sink::{LoggingEventSink, NdjsonSink, channel_sink},
};
use serde_json::{Value, json};
use tempfile::TempDir;

fn engine_with_trigger(dir: &std::path::Path, trigger: DebugTrigger) -> Engine {
    let mut config = test_config(dir);
    config.debug_trigger = trigger;
    Engine::new(config)
}

fn context() -> JsonMap {
    let mut context = JsonMap::new();
    context.insert("workspace".to_string(), json!("demo"));
    context
}

async fn handoff(engine: &Engine, command: &str) -> HandoffOutcome {
    let sink = LoggingEventSink::new("handoff-test".to_string());
    with_ci_timeout(
        "handoff",
        CI_DEFAULT_TIMEOUT,
        engine.handoff(&Command::new(command), context(), &sink),
    )
    .await
    .unwrap()
    .unwrap()
}

#[tokio::test]
async fn test_successful_command_completes_without_pending_entry() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_with_trigger(temp_dir.path(), DebugTrigger::AnyStderr);

    let outcome = handoff(&engine, "echo one; echo two").await;

    assert_eq!(
        outcome,
        HandoffOutcome::Completed {
            exit_code: 0,
            stdout: "one\ntwo".to_string(),
        }
    );
    assert!(engine.store().is_empty().await);
}

#[tokio::test]
async fn test_stderr_line_defers_and_resolves_once() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_with_trigger(temp_dir.path(), DebugTrigger::AnyStderr);

    let outcome = handoff(&engine, "echo building; sleep 0.2; echo 'cannot find crate' >&2; sleep 30").await;

    let HandoffOutcome::Deferred {
        request_id,
        error_details,
    } = outcome
    else {
        panic!("expected a deferred failure, got {outcome:?}");
    };
    assert_eq!(error_details, "cannot find crate");
    assert_eq!(engine.store().len().await, 1);

    let payload = engine.resolve(Some(request_id.as_str())).await.unwrap();
    assert_eq!(payload["workspace"], json!("demo"));
    assert_eq!(
        payload["shell_command"],
        json!("echo building; sleep 0.2; echo 'cannot find crate' >&2; sleep 30")
    );
    assert_eq!(payload["error_details"], json!("cannot find crate"));
    assert_eq!(payload["full_shell_output"], json!("building"));

    assert_eq!(
        engine.resolve(Some(request_id.as_str())).await,
        Err(StoreError::NotFound {
            id: request_id.to_string()
        })
    );
}

#[tokio::test]
async fn test_error_pattern_trigger_ignores_plain_stderr() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_with_trigger(temp_dir.path(), DebugTrigger::ErrorPattern);

    let quiet = handoff(&engine, "echo 'progress 50%' >&2; echo done").await;
    assert!(matches!(quiet, HandoffOutcome::Completed { exit_code: 0, .. }));

    let loud = handoff(&engine, "echo 'error: mismatched types'; exit 0").await;
    match loud {
        HandoffOutcome::Deferred { error_details, .. } => {
            assert_eq!(error_details, "error: mismatched types")
        }
        other => panic!("expected a deferred failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failure_trigger_defers_on_nonzero_exit() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_with_trigger(temp_dir.path(), DebugTrigger::Failure);

    let outcome = handoff(&engine, "echo 'no such file' >&2; exit 2").await;
    match outcome {
        HandoffOutcome::Deferred { error_details, .. } => {
            assert_eq!(error_details, "Command exited with code 2:\nno such file")
        }
        other => panic!("expected a deferred failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_blocked_command_is_deferred() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_with_trigger(temp_dir.path(), DebugTrigger::Failure);

    let outcome = handoff(&engine, "mkfs.ext4 /dev/sdz").await;
    match outcome {
        HandoffOutcome::Deferred { error_details, .. } => {
            assert_eq!(error_details, "Unsafe command blocked: mkfs.ext4 /dev/sdz")
        }
        other => panic!("expected a deferred failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_secrets_are_redacted_before_parking() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_with_trigger(temp_dir.path(), DebugTrigger::AnyStderr);

    let outcome = handoff(
        &engine,
        "echo 'token=abc123secret'; sleep 0.2; echo 'login failed password=hunter2' >&2",
    )
    .await;

    let HandoffOutcome::Deferred {
        request_id,
        error_details,
    } = outcome
    else {
        panic!("expected a deferred failure");
    };
    assert!(!error_details.contains("hunter2"));
    assert!(error_details.contains("[REDACTED]"));

    let payload = engine.resolve(Some(request_id.as_str())).await.unwrap();
    let output = payload["full_shell_output"].as_str().unwrap();
    assert!(!output.contains("abc123secret"));
}

#[tokio::test]
async fn test_triggering_event_reaches_the_sink() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_with_trigger(temp_dir.path(), DebugTrigger::AnyStderr);
    let (sink, mut receiver) = channel_sink(64);

    let outcome = engine
        .handoff(&Command::new("echo ok; sleep 0.2; echo bad >&2"), JsonMap::new(), &sink)
        .await
        .unwrap();
    assert!(matches!(outcome, HandoffOutcome::Deferred { .. }));
    drop(sink);

    let mut forwarded = Vec::new();
    while let Some(event) = receiver.recv().await {
        forwarded.push(event);
    }
    assert_eq!(forwarded.last(), Some(&OutputEvent::stderr("bad")));
    assert!(forwarded.contains(&OutputEvent::stdout("ok")));
}

#[tokio::test]
async fn test_announcement_written_as_ndjson() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_with_trigger(temp_dir.path(), DebugTrigger::Failure);
    let sink = NdjsonSink::new(Vec::new());

    let outcome = engine
        .handoff(&Command::new("exit 9"), JsonMap::new(), &sink)
        .await
        .unwrap();
    let written = String::from_utf8(sink.into_inner()).unwrap();
    let last: Value = serde_json::from_str(written.lines().last().unwrap()).unwrap();
    assert_eq!(last, json!({"type": "exit_code", "content": 9}));

    let announcement = outcome.announcement().unwrap().to_value().unwrap();
    assert_eq!(announcement["type"], "auto_debug_request");
    assert_eq!(
        announcement["content"]["error_details"],
        "Command exited with code 9"
    );
    let id = announcement["content"]["request_id"].as_str().unwrap();
    assert!(engine.resolve(Some(id)).await.is_ok());
}
