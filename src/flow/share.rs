//! Shared Flow Module
//!
//! Multicast adapter turning one producer stream into a replaying stream
//! shared by any number of subscribers.
//!
//! One upstream task per flow pumps the producer stream into a single replay
//! slot. Subscribers hold a receiver on that slot and a reference count on
//! the flow. When the count drops to zero a keep-alive timer starts: after
//! `stop_timeout` the upstream task is aborted, after `replay_expiration` more
//! the flow is evicted from its owning table and its slot is dropped.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{BoxStream, Stream, StreamExt};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error};

use crate::error::CacheError;

/// Starts a fresh producer stream.
pub type FlowSource<V> = Arc<dyn Fn() -> BoxStream<'static, V> + Send + Sync>;

/// Flows keyed by cache key, owned by a supplier.
pub type FlowTable<V> = Mutex<HashMap<String, SharedFlow<V>>>;

// == Sharing Policy ==
/// Keep-alive policy of a shared stream once its last subscriber detaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharingPolicy {
    /// Grace window during which the upstream keeps running
    pub stop_timeout: Duration,
    /// How long the replay slot and producer survive after the upstream stopped
    pub replay_expiration: Duration,
}

impl Default for SharingPolicy {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(5),
            replay_expiration: Duration::ZERO,
        }
    }
}

// == Flow State ==
struct FlowState<V> {
    /// Replay slot, None once the flow is torn down
    tx: Option<watch::Sender<V>>,
    subscribers: usize,
    upstream: Option<JoinHandle<()>>,
    /// Bumped on every attach and on every last detach, stale timers compare against it
    generation: u64,
    /// Why the producer stream stopped, set when the flow is torn down by a failure
    termination: Option<CacheError>,
}

struct FlowInner<V> {
    key: String,
    source: FlowSource<V>,
    policy: SharingPolicy,
    table: Weak<FlowTable<V>>,
    state: Mutex<FlowState<V>>,
}

// == Shared Flow ==
/// Handle on one multicast stream. Cloning yields another handle to the same flow.
pub struct SharedFlow<V> {
    inner: Arc<FlowInner<V>>,
}

impl<V> Clone for SharedFlow<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for SharedFlow<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SharedFlow")
            .field("key", &self.inner.key)
            .field("subscribers", &state.subscribers)
            .field("running", &state.upstream.is_some())
            .field("closed", &state.tx.is_none())
            .finish()
    }
}

impl<V> SharedFlow<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    // == Open ==
    /// Creates a flow whose replay slot starts at `initial` and attaches
    /// the first subscriber, which starts the upstream.
    ///
    /// `table` is the map the flow is evicted from once idle. The caller
    /// inserts `subscription.flow()` into it.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn open(
        key: String,
        source: FlowSource<V>,
        initial: V,
        policy: SharingPolicy,
        table: Weak<FlowTable<V>>,
    ) -> Subscription<V> {
        let (tx, rx) = watch::channel(initial);
        let flow = Self {
            inner: Arc::new(FlowInner {
                key,
                source,
                policy,
                table,
                state: Mutex::new(FlowState {
                    tx: Some(tx),
                    subscribers: 0,
                    upstream: None,
                    generation: 0,
                    termination: None,
                }),
            }),
        };

        let mut state = flow.inner.state.lock();
        flow.attach(&mut state);
        drop(state);

        Subscription {
            stream: WatchStream::new(rx),
            flow,
        }
    }

    // == Subscribe ==
    /// Attaches a new subscriber.
    ///
    /// The subscriber first receives the latest value. Returns None when the
    /// flow was torn down and must be recreated.
    pub fn subscribe(&self) -> Option<Subscription<V>> {
        let mut state = self.inner.state.lock();
        let rx = state.tx.as_ref()?.subscribe();
        self.attach(&mut state);
        drop(state);

        Some(Subscription {
            stream: WatchStream::new(rx),
            flow: self.clone(),
        })
    }

    fn attach(&self, state: &mut FlowState<V>) {
        state.subscribers += 1;
        state.generation += 1;

        if state.upstream.is_none() {
            debug!(key = %self.inner.key, "Starting shared stream upstream");
            let values = (self.inner.source)();
            state.upstream = Some(tokio::spawn(run_upstream(
                Arc::downgrade(&self.inner),
                values,
            )));
        }
    }

    // == Inspection ==
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Returns true when both handles point at the same flow.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers
    }

    /// Returns true while the upstream task is running.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().upstream.is_some()
    }

    /// Returns true once the flow was torn down or evicted.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().tx.is_none()
    }

    /// Terminal error of a flow whose producer ended or panicked.
    ///
    /// None while the flow is alive and after an idle eviction.
    pub fn termination(&self) -> Option<CacheError> {
        self.inner.state.lock().termination.clone()
    }

    /// Latest value in the replay slot, None once the flow is closed.
    pub fn latest(&self) -> Option<V> {
        self.inner
            .state
            .lock()
            .tx
            .as_ref()
            .map(|tx| tx.borrow().clone())
    }

    // == Teardown ==
    fn release(&self) {
        let mut state = self.inner.state.lock();
        state.subscribers = state.subscribers.saturating_sub(1);
        if state.subscribers > 0 || state.tx.is_none() {
            return;
        }
        state.generation += 1;
        let generation = state.generation;
        drop(state);

        debug!(key = %self.inner.key, "Last subscriber detached");
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(expire(Arc::downgrade(&self.inner), generation));
            }
            // Runtime gone, nothing left to keep alive
            Err(_) => {
                if self.stop_if_idle(generation) {
                    self.evict_if_idle(generation);
                }
            }
        }
    }

    /// Aborts the upstream unless a subscriber attached since `generation`.
    fn stop_if_idle(&self, generation: u64) -> bool {
        let mut state = self.inner.state.lock();
        if state.generation != generation || state.subscribers > 0 {
            return false;
        }
        if let Some(upstream) = state.upstream.take() {
            debug!(key = %self.inner.key, "Stopping idle shared stream");
            upstream.abort();
        }
        true
    }

    /// Removes the flow from its table unless a subscriber attached since `generation`.
    fn evict_if_idle(&self, generation: u64) {
        let table = self.inner.table.upgrade();
        let mut flows = table.as_ref().map(|table| table.lock());
        let mut state = self.inner.state.lock();
        if state.generation != generation || state.subscribers > 0 {
            return;
        }

        let tx = state.tx.take();
        let removed = flows.as_mut().and_then(|flows| self.remove_from(flows));
        drop(state);
        drop(flows);
        drop(tx);
        drop(removed);
        debug!(key = %self.inner.key, "Evicted idle shared stream");
    }

    /// Tears the flow down after its producer stream ended or panicked.
    fn terminate(&self, error: CacheError) {
        error!(key = %self.inner.key, %error, "Shared stream torn down");

        let table = self.inner.table.upgrade();
        let mut flows = table.as_ref().map(|table| table.lock());
        let mut state = self.inner.state.lock();
        state.termination = Some(error);

        // Dropping the sender ends every subscriber stream
        let tx = state.tx.take();
        let upstream = state.upstream.take();
        let removed = flows.as_mut().and_then(|flows| self.remove_from(flows));
        drop(state);
        drop(flows);
        drop((tx, upstream, removed));
    }

    fn remove_from(&self, flows: &mut HashMap<String, SharedFlow<V>>) -> Option<SharedFlow<V>> {
        let owned = flows
            .get(&self.inner.key)
            .is_some_and(|flow| flow.ptr_eq(self));
        if owned {
            flows.remove(&self.inner.key)
        } else {
            None
        }
    }
}

async fn run_upstream<V>(flow: Weak<FlowInner<V>>, mut values: BoxStream<'static, V>)
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    let pumped = AssertUnwindSafe(async {
        while let Some(value) = values.next().await {
            let Some(inner) = flow.upgrade() else {
                return false;
            };
            let state = inner.state.lock();
            if let Some(tx) = state.tx.as_ref() {
                tx.send_if_modified(|current| {
                    if *current == value {
                        return false;
                    }
                    *current = value;
                    true
                });
            }
        }
        true
    })
    .catch_unwind()
    .await;

    let error = match pumped {
        Ok(false) => return,
        Ok(true) => CacheError::ProducerTerminated("producer stream ended".to_string()),
        Err(_) => CacheError::ProducerTerminated("producer stream panicked".to_string()),
    };
    if let Some(inner) = flow.upgrade() {
        SharedFlow { inner }.terminate(error);
    }
}

async fn expire<V>(flow: Weak<FlowInner<V>>, generation: u64)
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    let Some(policy) = flow.upgrade().map(|inner| inner.policy) else {
        return;
    };

    tokio::time::sleep(policy.stop_timeout).await;
    let stopped = flow
        .upgrade()
        .is_some_and(|inner| SharedFlow { inner }.stop_if_idle(generation));
    if !stopped {
        return;
    }

    if !policy.replay_expiration.is_zero() {
        tokio::time::sleep(policy.replay_expiration).await;
    }
    if let Some(inner) = flow.upgrade() {
        SharedFlow { inner }.evict_if_idle(generation);
    }
}

// == Subscription ==
/// One subscriber of a [`SharedFlow`]. Detaches on drop.
pub struct Subscription<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    stream: WatchStream<V>,
    flow: SharedFlow<V>,
}

impl<V> Subscription<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// The flow this subscription is attached to.
    pub fn flow(&self) -> &SharedFlow<V> {
        &self.flow
    }

    /// Error that ended this subscription, if the stream ended because its
    /// producer failed. A fresh `get` recreates the stream.
    pub fn termination(&self) -> Option<CacheError> {
        self.flow.termination()
    }
}

impl<V> fmt::Debug for Subscription<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("flow", &self.flow)
            .finish()
    }
}

impl<V> Stream for Subscription<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    type Item = V;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<V>> {
        self.stream.poll_next_unpin(cx)
    }
}

impl<V> Drop for Subscription<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.flow.release();
    }
}
