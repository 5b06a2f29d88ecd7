//! Periodic Refresh Task
//!
//! Background task that periodically asks a multi fetcher to refresh a fixed
//! set of subjects.

use std::fmt::Debug;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::fetch::{MultiFetchParams, MultiFetcher};

/// Spawns a background task that periodically refreshes `params`.
///
/// The task runs in an infinite loop, sleeping for `interval` between runs.
/// Refreshes still inside their TTL window are skipped by the registry, and
/// failures are logged without stopping the loop.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let handle = spawn_refresh_task(module.multi_fetcher().clone(), params, Duration::from_secs(60));
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_refresh_task<M>(
    fetcher: M,
    params: MultiFetchParams<M::Subject>,
    interval: Duration,
) -> JoinHandle<()>
where
    M: MultiFetcher + 'static,
    M::Subject: Debug,
{
    tokio::spawn(async move {
        info!(
            subjects = params.subjects.len(),
            "Starting refresh task with interval of {:?}", interval
        );

        loop {
            tokio::time::sleep(interval).await;

            match fetcher.invoke(&params).await {
                Ok(()) => debug!(subjects = ?params.subjects, "Periodic refresh done"),
                Err(error) if error.is_transient() => {
                    warn!(%error, "Periodic refresh failed, retrying next tick")
                }
                Err(error) => error!(%error, "Periodic refresh failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CacheError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MultiFetcher for CountingFetcher {
        type Subject = String;

        async fn invoke(&self, _params: &MultiFetchParams<String>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CacheError::FetchFailed("offline".to_string()));
            }
            Ok(())
        }
    }

    fn params() -> MultiFetchParams<String> {
        MultiFetchParams::new(["bitcoin".to_string()])
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_task_invokes_each_interval() {
        let fetcher = Arc::new(CountingFetcher::default());
        let handle = spawn_refresh_task(Arc::clone(&fetcher), params(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(181)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_task_survives_failures() {
        let fetcher = Arc::new(CountingFetcher {
            fail: true,
            ..CountingFetcher::default()
        });
        let handle = spawn_refresh_task(Arc::clone(&fetcher), params(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        assert!(!handle.is_finished());

        handle.abort();
    }

    #[tokio::test]
    async fn test_refresh_task_can_be_aborted() {
        let fetcher = Arc::new(CountingFetcher::default());
        let handle = spawn_refresh_task(fetcher, params(), Duration::from_secs(1));

        // Abort immediately
        handle.abort();

        // Wait a bit and verify task is finished
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
