//! Cache Registry Module
//!
//! TTL-scoped single-flight executor for refresh actions.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::cache::RegistryStats;
use crate::error::{CacheError, Result};

type Execution = Shared<BoxFuture<'static, Result<()>>>;
type WeakExecution = WeakShared<BoxFuture<'static, Result<()>>>;

// == Key State ==
#[derive(Default)]
struct KeyState {
    /// Completion time of the last successful execution
    refreshed_at: Option<Instant>,
    /// TTL of the last started execution
    ttl: Duration,
    /// Execution currently running, tagged with its id
    in_flight: Option<(u64, WeakExecution)>,
}

impl KeyState {
    /// Nothing running and nothing fresh: the key carries no information.
    fn is_idle(&self) -> bool {
        self.in_flight.is_none()
            && self
                .refreshed_at
                .map_or(true, |refreshed_at| refreshed_at.elapsed() >= self.ttl)
    }
}

#[derive(Default)]
struct RegistryState {
    keys: HashMap<String, KeyState>,
    next_id: u64,
    stats: RegistryStats,
}

// == Cache Registry ==
/// Runs refresh actions at most once per TTL window and per key.
///
/// Concurrent callers for the same key await the same execution and receive
/// the same result. Only successful executions restart the TTL window, so a
/// failed or cancelled refresh is due again immediately.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct CacheRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CacheRegistry")
            .field("keys", &state.keys.len())
            .field("stats", &state.stats)
            .finish()
    }
}

impl CacheRegistry {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Invoke On Expire ==
    /// Runs `action` for `key` unless a successful run happened less than
    /// `ttl` ago.
    ///
    /// `skip_cache` forces a run regardless of the TTL. If a run for `key` is
    /// already in flight the caller awaits it instead of starting another.
    /// `action` is only called once the execution is first polled.
    pub async fn invoke_on_expire<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        skip_cache: bool,
        action: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        match self.join_or_start(key, ttl, skip_cache, action) {
            Some(execution) => execution.await,
            None => Ok(()),
        }
    }

    /// Check-and-mark under one lock: either joins the running execution,
    /// reports the key as fresh (None), or registers a new execution.
    fn join_or_start<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        skip_cache: bool,
        action: F,
    ) -> Option<Execution>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        // Composite batch keys come and go, expired ones are dropped here
        state.keys.retain(|_, entry| !entry.is_idle());
        let entry = state.keys.entry(key.to_string()).or_default();

        if let Some(running) = entry
            .in_flight
            .as_ref()
            .and_then(|(_, execution)| execution.upgrade())
        {
            state.stats.record_join();
            debug!(key, "Joining refresh already in flight");
            return Some(running);
        }

        let fresh = !skip_cache
            && entry
                .refreshed_at
                .is_some_and(|refreshed_at| refreshed_at.elapsed() < ttl);
        if fresh {
            state.stats.record_skip();
            debug!(key, "Refresh skipped, key is still fresh");
            return None;
        }

        state.next_id += 1;
        let id = state.next_id;
        let execution = execute(Arc::downgrade(&self.state), key.to_string(), id, action)
            .boxed()
            .shared();
        entry.in_flight = execution.downgrade().map(|weak| (id, weak));
        entry.ttl = ttl;
        state.stats.record_execution();
        debug!(key, skip_cache, "Starting refresh");

        Some(execution)
    }

    // == Invalidate ==
    /// Forgets the last successful run of `key`, the next call runs again.
    pub fn invalidate(&self, key: &str) {
        let mut state = self.state.lock();
        let idle = state.keys.get_mut(key).is_some_and(|entry| {
            entry.refreshed_at = None;
            entry.is_idle()
        });
        if idle {
            state.keys.remove(key);
        }
    }

    /// Forgets the last successful run of every key.
    pub fn invalidate_all(&self) {
        self.state.lock().keys.retain(|_, entry| {
            entry.refreshed_at = None;
            !entry.is_idle()
        });
    }

    // == Inspection ==
    /// Returns true while an execution for `key` is registered.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.state
            .lock()
            .keys
            .get(key)
            .and_then(|entry| entry.in_flight.as_ref())
            .is_some()
    }

    /// Returns when `key` was last refreshed successfully.
    pub fn last_refreshed(&self, key: &str) -> Option<Instant> {
        self.state
            .lock()
            .keys
            .get(key)
            .and_then(|entry| entry.refreshed_at)
    }

    /// Returns the number of keys running or inside their TTL window.
    pub fn len(&self) -> usize {
        self.state.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().keys.is_empty()
    }

    /// Returns current registry statistics.
    pub fn stats(&self) -> RegistryStats {
        self.state.lock().stats.clone()
    }
}

fn execute<F, Fut>(
    registry: Weak<Mutex<RegistryState>>,
    key: String,
    id: u64,
    action: F,
) -> impl Future<Output = Result<()>> + Send + 'static
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    // Armed before the first poll so a never-polled execution still clears its marker
    let mut guard = InFlightGuard {
        registry,
        key,
        id,
        done: false,
    };
    async move {
        let result = AssertUnwindSafe(async move { action().await })
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(key = %guard.key, "Refresh action panicked");
                Err(CacheError::Internal("refresh action panicked".to_string()))
            });
        guard.complete(result.is_ok());
        result
    }
}

// == In-Flight Guard ==
/// Clears the in-flight marker when an execution finishes or is dropped.
struct InFlightGuard {
    registry: Weak<Mutex<RegistryState>>,
    key: String,
    id: u64,
    done: bool,
}

impl InFlightGuard {
    fn complete(&mut self, success: bool) {
        self.done = true;
        self.release(|state, entry| {
            if success {
                entry.refreshed_at = Some(Instant::now());
            } else {
                state.record_failure();
            }
        });
    }

    fn release(&self, on_release: impl FnOnce(&mut RegistryStats, &mut KeyState)) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut guard = registry.lock();
        let state = &mut *guard;

        let Some(entry) = state.keys.get_mut(&self.key) else {
            return;
        };
        // A newer execution may own the slot already
        if entry.in_flight.as_ref().is_some_and(|(id, _)| *id == self.id) {
            entry.in_flight = None;
        }
        on_release(&mut state.stats, entry);
        if entry.is_idle() {
            state.keys.remove(&self.key);
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        debug!(key = %self.key, "Refresh dropped before completion");
        self.release(|state, _| state.record_cancellation());
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    fn counting_action(
        counter: &Arc<AtomicUsize>,
        result: Result<()>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                result
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_runs_action() {
        let registry = CacheRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let result = registry
            .invoke_on_expire("quotes", TTL, false, counting_action(&counter, Ok(())))
            .await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(registry.last_refreshed("quotes").is_some());
        assert!(!registry.is_in_flight("quotes"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_within_ttl_is_skipped() {
        let registry = CacheRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        registry
            .invoke_on_expire("quotes", TTL, false, counting_action(&counter, Ok(())))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        registry
            .invoke_on_expire("quotes", TTL, false, counting_action(&counter, Ok(())))
            .await
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(registry.stats().skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_after_ttl_runs_again() {
        let registry = CacheRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        registry
            .invoke_on_expire("quotes", TTL, false, counting_action(&counter, Ok(())))
            .await
            .unwrap();
        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        registry
            .invoke_on_expire("quotes", TTL, false, counting_action(&counter, Ok(())))
            .await
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_cache_forces_run() {
        let registry = CacheRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        registry
            .invoke_on_expire("quotes", TTL, false, counting_action(&counter, Ok(())))
            .await
            .unwrap();
        registry
            .invoke_on_expire("quotes", TTL, true, counting_action(&counter, Ok(())))
            .await
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_retried_immediately() {
        let registry = CacheRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let failure = Err(CacheError::FetchFailed("503".to_string()));

        let first = registry
            .invoke_on_expire("quotes", TTL, false, counting_action(&counter, failure.clone()))
            .await;
        assert_eq!(first, failure);
        assert!(registry.last_refreshed("quotes").is_none());

        registry
            .invoke_on_expire("quotes", TTL, false, counting_action(&counter, Ok(())))
            .await
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(registry.stats().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_share_one_execution() {
        let registry = CacheRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let failure = Err(CacheError::FetchFailed("timeout".to_string()));

        let calls = (0..5).map(|_| {
            registry.invoke_on_expire(
                "quotes",
                TTL,
                false,
                counting_action(&counter, failure.clone()),
            )
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|result| *result == failure));
        assert_eq!(registry.stats().joined, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_run_independently() {
        let registry = CacheRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            registry.invoke_on_expire("quotes:eth", TTL, false, counting_action(&counter, Ok(()))),
            registry.invoke_on_expire("quotes:btc", TTL, false, counting_action(&counter, Ok(()))),
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_execution_is_not_recorded() {
        let registry = CacheRegistry::new();

        let pending = registry.invoke_on_expire("quotes", TTL, false, || async {
            std::future::pending::<()>().await;
            Ok(())
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(50), pending).await;
        assert!(timed_out.is_err());

        assert!(!registry.is_in_flight("quotes"));
        assert!(registry.last_refreshed("quotes").is_none());
        assert_eq!(registry.stats().cancellations, 1);

        let counter = Arc::new(AtomicUsize::new(0));
        registry
            .invoke_on_expire("quotes", TTL, false, counting_action(&counter, Ok(())))
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_survives_leader_cancellation() {
        let registry = CacheRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let leader = {
            let registry = registry.clone();
            let action = counting_action(&counter, Ok(()));
            tokio::spawn(async move { registry.invoke_on_expire("quotes", TTL, false, action).await })
        };
        tokio::task::yield_now().await;

        let follower = {
            let registry = registry.clone();
            let action = counting_action(&counter, Ok(()));
            tokio::spawn(async move { registry.invoke_on_expire("quotes", TTL, false, action).await })
        };
        tokio::task::yield_now().await;

        leader.abort();
        assert!(follower.await.unwrap().is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(registry.last_refreshed("quotes").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_next_run() {
        let registry = CacheRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        registry
            .invoke_on_expire("quotes", TTL, false, counting_action(&counter, Ok(())))
            .await
            .unwrap();
        registry.invalidate("quotes");
        registry
            .invoke_on_expire("quotes", TTL, false, counting_action(&counter, Ok(())))
            .await
            .unwrap();

        registry.invalidate_all();
        registry
            .invoke_on_expire("quotes", TTL, false, counting_action(&counter, Ok(())))
            .await
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_batch_keys_are_pruned() {
        let registry = CacheRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for n in 0..20 {
            let key = format!("quotes:BTC,COIN{}", n);
            registry
                .invoke_on_expire(&key, TTL, false, counting_action(&counter, Ok(())))
                .await
                .unwrap();
        }
        assert_eq!(registry.len(), 20);

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        registry
            .invoke_on_expire("quotes:ETH", TTL, false, counting_action(&counter, Ok(())))
            .await
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.last_refreshed("quotes:ETH").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_and_invalidated_keys_are_not_kept() {
        let registry = CacheRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let failure = Err(CacheError::FetchFailed("503".to_string()));

        let _ = registry
            .invoke_on_expire("quotes:A", TTL, false, counting_action(&counter, failure))
            .await;
        assert!(registry.is_empty());

        registry
            .invoke_on_expire("quotes:B", TTL, false, counting_action(&counter, Ok(())))
            .await
            .unwrap();
        registry
            .invoke_on_expire("quotes:C", TTL, false, counting_action(&counter, Ok(())))
            .await
            .unwrap();
        registry.invalidate("quotes:B");
        assert_eq!(registry.len(), 1);

        registry.invalidate_all();
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_action_fails_every_caller() {
        let registry = CacheRegistry::new();

        let calls = (0..3).map(|_| {
            registry.invoke_on_expire("quotes", TTL, false, || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Option::<()>::None.expect("decoder bug");
                Ok(())
            })
        });
        let results = futures::future::join_all(calls).await;

        for result in results {
            assert!(matches!(result, Err(CacheError::Internal(_))));
        }
        assert!(!registry.is_in_flight("quotes"));
        assert_eq!(registry.stats().failures, 1);

        let counter = Arc::new(AtomicUsize::new(0));
        registry
            .invoke_on_expire("quotes", TTL, false, counting_action(&counter, Ok(())))
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
