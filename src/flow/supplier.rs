//! Caching Supplier Module
//!
//! Maps params to cache keys and hands out one shared stream per key.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::flow::producer::{Producer, ProducerFactory};
use crate::flow::share::{FlowSource, FlowTable, SharedFlow, SharingPolicy, Subscription};

/// Value type emitted by the producers of a factory.
pub type FactoryValue<F> = <<F as ProducerFactory>::Producer as Producer>::Value;

/// Derives the cache key of a params value.
pub type KeyCreator<P> = Box<dyn Fn(&P) -> String + Send + Sync>;

// == Caching Supplier ==
/// Multiplexer turning "one producer per params" into "one shared stream per key".
///
/// Params mapping to the same key share a single producer, whatever their
/// shape. Producers are created lazily and discarded once their stream has
/// been idle for the configured [`SharingPolicy`].
pub struct CachingSupplier<F: ProducerFactory> {
    factory: F,
    key_creator: KeyCreator<F::Params>,
    policy: SharingPolicy,
    flows: Arc<FlowTable<FactoryValue<F>>>,
}

impl<F: ProducerFactory> fmt::Debug for CachingSupplier<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingSupplier")
            .field("policy", &self.policy)
            .field("flows", &self.flows.lock().len())
            .finish()
    }
}

impl<F: ProducerFactory> CachingSupplier<F> {
    // == Constructor ==
    pub fn new(
        factory: F,
        key_creator: impl Fn(&F::Params) -> String + Send + Sync + 'static,
        policy: SharingPolicy,
    ) -> Self {
        Self {
            factory,
            key_creator: Box::new(key_creator),
            policy,
            flows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    // == Get ==
    /// Returns a subscription to the shared stream for `params`.
    ///
    /// Reuses the live stream of the derived key when there is one, otherwise
    /// creates a producer through the factory. Never waits: the subscription
    /// yields the latest known value (or the producer fallback) first.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn get(&self, params: &F::Params) -> Subscription<FactoryValue<F>> {
        let key = (self.key_creator)(params);
        let mut flows = self.flows.lock();

        if let Some(subscription) = flows.get(&key).and_then(SharedFlow::subscribe) {
            debug!(key, "Reusing shared stream");
            return subscription;
        }

        debug!(key, "Creating producer");
        let producer = Arc::new(self.factory.create(params));
        let initial = producer.current();
        let source: FlowSource<FactoryValue<F>> = Arc::new(move || producer.produce());

        let subscription = SharedFlow::open(
            key.clone(),
            source,
            initial,
            self.policy,
            Arc::downgrade(&self.flows),
        );
        let replaced = flows.insert(key, subscription.flow().clone());
        drop(flows);
        drop(replaced);

        subscription
    }

    // == Inspection ==
    pub fn policy(&self) -> SharingPolicy {
        self.policy
    }

    /// Returns the key `params` maps to.
    pub fn key_for(&self, params: &F::Params) -> String {
        (self.key_creator)(params)
    }

    /// Returns true while a shared stream exists for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.flows.lock().contains_key(key)
    }

    /// Returns the keys with a live or replaying shared stream.
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.flows.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the number of shared streams.
    pub fn len(&self) -> usize {
        self.flows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.lock().is_empty()
    }
}
