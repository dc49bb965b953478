//! Timeouts, abandonment and cleanup of child processes.

use super::common::{
    CI_DEFAULT_TIMEOUT, CI_QUICK_TIMEOUT, collect_with_deadline, init_test_logging,
    is_process_alive, test_config, wait_for_process_exit, with_ci_timeout,
};
use cogshell::{Command, Engine, FailureKind, OutputEvent, SessionOutcome};
use futures::StreamExt;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[tokio::test]
async fn test_silent_command_times_out_and_is_killed() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::new(test_config(temp_dir.path()));

    let started = Instant::now();
    let stream = engine.stream(&Command::new("sleep 30").with_timeout(Duration::from_secs(1)));
    let pid = stream.pid().expect("sleep should have been spawned");
    let events = collect_with_deadline(stream, CI_DEFAULT_TIMEOUT).await.unwrap();

    // Timeout plus kill grace plus scheduling slack.
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(events.len(), 1, "{events:?}");
    assert!(matches!(
        &events[0],
        OutputEvent::Error { kind: FailureKind::Timeout, content } if content.contains("timed out")
    ));
    assert!(wait_for_process_exit(pid, CI_QUICK_TIMEOUT).await);
}

#[tokio::test]
async fn test_timeout_resets_on_output() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::new(test_config(temp_dir.path()));

    // Runs for about 2.4s in total but never stays silent for a full second.
    let script = "for i in 1 2 3 4 5 6; do echo tick$i; sleep 0.4; done";
    let stream = engine.stream(&Command::new(script).with_timeout(Duration::from_secs(1)));
    let events = collect_with_deadline(stream, CI_DEFAULT_TIMEOUT).await.unwrap();

    assert_eq!(events.len(), 7, "{events:?}");
    assert_eq!(events.last(), Some(&OutputEvent::ExitCode { content: 0 }));
}

#[tokio::test]
async fn test_timeout_after_partial_output_keeps_earlier_lines() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::new(test_config(temp_dir.path()));

    let stream =
        engine.stream(&Command::new("echo started; sleep 30").with_timeout(Duration::from_secs(1)));
    let events = collect_with_deadline(stream, CI_DEFAULT_TIMEOUT).await.unwrap();

    assert_eq!(events.first(), Some(&OutputEvent::stdout("started")));
    assert!(matches!(
        events.last(),
        Some(OutputEvent::Error { kind: FailureKind::Timeout, .. })
    ));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_dropping_stream_after_first_line_kills_process() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::new(test_config(temp_dir.path()));

    let mut stream = engine.stream(&Command::new("echo first; sleep 30"));
    let pid = stream.pid().expect("command should have been spawned");

    let first = with_ci_timeout("first line", CI_QUICK_TIMEOUT, stream.next())
        .await
        .unwrap();
    assert_eq!(first, Some(OutputEvent::stdout("first")));
    assert!(is_process_alive(pid));

    drop(stream);
    assert!(
        wait_for_process_exit(pid, CI_QUICK_TIMEOUT).await,
        "process {pid} survived abandonment"
    );
}

#[tokio::test]
async fn test_cancel_marks_session_abandoned() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::new(test_config(temp_dir.path()));

    let stream = engine.stream(&Command::new("sleep 30"));
    let pid = stream.pid().expect("command should have been spawned");
    stream.cancel();

    let outcome = with_ci_timeout("abandon", CI_QUICK_TIMEOUT, stream.finished())
        .await
        .unwrap();
    assert_eq!(outcome, Some(SessionOutcome::Abandoned));
    assert!(wait_for_process_exit(pid, CI_QUICK_TIMEOUT).await);
}

#[tokio::test]
async fn test_background_grandchild_does_not_hold_session_open() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::new(test_config(temp_dir.path()));

    let started = Instant::now();
    let stream = engine.stream(&Command::new("sleep 30 & echo parent done"));
    let events = collect_with_deadline(stream, CI_DEFAULT_TIMEOUT).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(events.first(), Some(&OutputEvent::stdout("parent done")));
    assert_eq!(events.last(), Some(&OutputEvent::ExitCode { content: 0 }));
}

#[tokio::test]
async fn test_timeout_kills_group_member_that_ignores_sigterm() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::new(test_config(temp_dir.path()));

    // The subshell ignores SIGTERM and its sleep inherits that, so only the
    // follow-up group kill can end it.
    let script = "(trap '' TERM; exec sleep 30) & echo $! > straggler.pid; wait";
    let stream = engine.stream(&Command::new(script).with_timeout(Duration::from_secs(1)));
    let events = collect_with_deadline(stream, CI_DEFAULT_TIMEOUT).await.unwrap();
    assert!(matches!(
        events.last(),
        Some(OutputEvent::Error { kind: FailureKind::Timeout, .. })
    ));

    let straggler: u32 = std::fs::read_to_string(temp_dir.path().join("straggler.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(
        wait_for_process_exit(straggler, CI_QUICK_TIMEOUT).await,
        "process {straggler} survived its session"
    );
}
