//! Run-to-completion execution through the engine.

use super::common::{
    CI_DEFAULT_TIMEOUT, CI_QUICK_TIMEOUT, FailingSpawner, SpySpawner, init_test_logging,
    test_config, test_engine_with, wait_for_process_exit, with_ci_timeout,
};
use cogshell::{Command, Engine, ExecutionResult, types::NOT_RUN_EXIT_CODE};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;

#[tokio::test]
async fn test_run_collects_output_and_exit_code() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::new(test_config(temp_dir.path()));

    let result = engine
        .run(&Command::new("echo hello; echo warning >&2"))
        .await;

    assert_eq!(
        result,
        ExecutionResult {
            stdout: "hello\n".to_string(),
            stderr: "warning\n".to_string(),
            exit_code: 0,
        }
    );
    assert!(result.success());
}

#[tokio::test]
async fn test_run_uses_configured_working_dir() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("input.txt"), "contents").unwrap();
    let engine = Engine::new(test_config(temp_dir.path()));

    let result = engine.run(&Command::new("cat input.txt")).await;
    assert_eq!(result.stdout, "contents");
    assert_eq!(result.exit_code, 0);
}

#[tokio::test]
async fn test_blocked_run_never_spawns() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let spy = SpySpawner::new();
    let engine = test_engine_with(temp_dir.path(), spy.clone());

    let result = engine.run(&Command::new("dd if=/dev/zero of=/dev/null")).await;
    assert_eq!(result.exit_code, NOT_RUN_EXIT_CODE);
    assert!(result.stderr.starts_with("Unsafe command blocked"));
    assert!(result.stdout.is_empty());
    assert_eq!(spy.spawn_count(), 0);
}

#[tokio::test]
async fn test_extra_denylist_applies_to_run() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path());
    config.extra_denylist = vec!["curl".to_string()];
    let engine = Engine::new(config);

    let result = engine.run(&Command::new("curl http://localhost")).await;
    assert_eq!(result.exit_code, NOT_RUN_EXIT_CODE);
}

#[tokio::test]
async fn test_run_spawn_failure_is_reported_in_stderr() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = test_engine_with(temp_dir.path(), Arc::new(FailingSpawner));

    let result = engine.run(&Command::new("echo hi")).await;
    assert_eq!(result.exit_code, NOT_RUN_EXIT_CODE);
    assert!(result.stderr.starts_with("Failed to spawn process"));
}

#[tokio::test]
async fn test_run_timeout_reports_seconds() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::new(test_config(temp_dir.path()));

    let result = with_ci_timeout(
        "sync timeout",
        CI_DEFAULT_TIMEOUT,
        engine.run(&Command::new("sleep 30").with_timeout(Duration::from_secs(1))),
    )
    .await
    .unwrap();

    assert_eq!(result.exit_code, NOT_RUN_EXIT_CODE);
    assert_eq!(result.stderr, "Command timed out after 1 seconds.");
}

#[tokio::test]
async fn test_run_returns_despite_background_grandchild() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::new(test_config(temp_dir.path()));

    let result = with_ci_timeout(
        "background grandchild",
        CI_DEFAULT_TIMEOUT,
        engine.run(&Command::new("sleep 30 & echo parent")),
    )
    .await
    .unwrap();

    assert_eq!(result.exit_code, 0);
    assert!(result.stdout.starts_with("parent"));
}

#[tokio::test]
async fn test_run_timeout_kills_group_member_that_ignores_sigterm() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::new(test_config(temp_dir.path()));

    let script = "(trap '' TERM; exec sleep 30) & echo $! > straggler.pid; wait";
    let result = with_ci_timeout(
        "sync straggler",
        CI_DEFAULT_TIMEOUT,
        engine.run(&Command::new(script).with_timeout(Duration::from_secs(1))),
    )
    .await
    .unwrap();
    assert_eq!(result.exit_code, NOT_RUN_EXIT_CODE);

    let straggler: u32 = std::fs::read_to_string(temp_dir.path().join("straggler.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(wait_for_process_exit(straggler, CI_QUICK_TIMEOUT).await);
}
