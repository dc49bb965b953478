use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

/// Default timeout for waiting on a whole streaming session in tests.
pub const CI_DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Short timeout for quick sanity checks.
pub const CI_QUICK_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait for an async condition to become true, polling at a fixed interval.
/// Returns true if the condition succeeds within the timeout.
pub async fn wait_for_condition<F, Fut>(
    timeout: Duration,
    interval: Duration,
    mut condition: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if condition().await {
            return true;
        }

        if start.elapsed() >= timeout {
            return false;
        }

        tokio::time::sleep(interval).await;
    }
}

/// Spawn multiple tasks that all start simultaneously using a barrier.
pub async fn spawn_tasks_with_barrier<F, Fut, T>(count: usize, task_fn: F) -> Vec<T>
where
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let barrier = Arc::new(Barrier::new(count));
    let task_fn = Arc::new(task_fn);

    let handles: Vec<_> = (0..count)
        .map(|i| {
            let barrier = barrier.clone();
            let task_fn = task_fn.clone();
            tokio::spawn(async move {
                // All tasks wait here until everyone is ready
                barrier.wait().await;
                task_fn(i).await
            })
        })
        .collect();

    let mut results = Vec::with_capacity(count);
    for handle in handles {
        if let Ok(result) = handle.await {
            results.push(result);
        }
    }
    results
}

/// Drain a stream to the end, failing if it takes longer than `timeout`.
pub async fn collect_with_deadline<S>(stream: S, timeout: Duration) -> anyhow::Result<Vec<S::Item>>
where
    S: Stream,
{
    with_ci_timeout("collect stream", timeout, stream.collect::<Vec<_>>()).await
}

/// Assert that all items in a collection are unique.
pub fn assert_all_unique<T: Eq + Hash + std::fmt::Debug>(items: &[T]) {
    let mut seen = HashSet::new();
    for item in items {
        assert!(
            seen.insert(item),
            "Duplicate item detected: {:?}. This indicates a race condition.",
            item
        );
    }
}

/// Wrap a future with a CI-appropriate timeout.
pub async fn with_ci_timeout<T, Fut>(
    operation_name: &str,
    timeout: Duration,
    fut: Fut,
) -> anyhow::Result<T>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, fut).await.map_err(|_| {
        anyhow::anyhow!(
            "CI timeout: '{}' did not complete within {:?}. \
             This may indicate a deadlock or a process that was never terminated.",
            operation_name,
            timeout
        )
    })
}
