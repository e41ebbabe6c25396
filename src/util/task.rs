use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinHandle;

/// Wraps a future to catch panics and convert them to errors.
///
/// Background work (poll cycles, preview expiry, reaction handling) runs
/// detached from whoever triggered it. Tokio would swallow a panic in such a
/// task without a trace, so panics are turned into `Err(String)` carrying the
/// panic message instead.
///
/// # Returns
///
/// - `Ok(result)` if the future completes normally
/// - `Err(panic_message)` if the future panics
pub async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|panic| {
            if let Some(s) = panic.downcast_ref::<&'static str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                format!("Unknown panic: {:?}", (*panic).type_id())
            }
        })
}

/// Spawns fire-and-forget work with an error-logging boundary.
///
/// Errors and panics are logged under `task` and never propagate. The join
/// handle is returned for callers (mostly tests) that want to wait on it.
pub fn spawn_logged<F>(task: &'static str, future: F) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match catch_task_panic(future).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(task = task, error = %format!("{e:#}"), "Background task failed");
            }
            Err(panic_msg) => {
                tracing::error!(task = task, error = %panic_msg, "Background task panicked");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_catch_task_panic_passes_value_through() {
        let result = catch_task_panic(async { 42 }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_catch_task_panic_captures_message() {
        let result: Result<(), String> = catch_task_panic(async {
            panic!("boom");
        })
        .await;
        assert_eq!(result, Err("boom".to_string()));
    }

    #[tokio::test]
    async fn test_spawn_logged_contains_errors_and_panics() {
        let failed = spawn_logged("failing", async { Err(anyhow::anyhow!("nope")) });
        assert!(failed.await.is_ok());

        let panicked = spawn_logged("panicking", async {
            if true {
                panic!("kaboom");
            }
            Ok(())
        });
        // The panic is caught inside the task, so the join itself succeeds
        assert!(panicked.await.is_ok());
    }
}
