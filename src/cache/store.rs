//! Runtime Store Module
//!
//! Observable key-value table fetchers write into and producers read from.

use std::collections::HashMap;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::cache::Identified;

/// Immutable view of the whole store at one point in time.
pub type Snapshot<T> = Arc<HashMap<<T as Identified>::Id, T>>;

// == Runtime Store ==
/// Observable table of values keyed by their own identifier.
///
/// Every write swaps in a new immutable snapshot, so readers never see a
/// partially applied batch. Cloning yields another handle to the same table.
#[derive(Debug)]
pub struct RuntimeStore<T: Identified> {
    /// Latest snapshot plus change notification
    tx: Arc<watch::Sender<Snapshot<T>>>,
}

impl<T: Identified> Clone for RuntimeStore<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> Default for RuntimeStore<T>
where
    T: Identified + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RuntimeStore<T>
where
    T: Identified + Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates an empty store.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(HashMap::new()));
        Self { tx: Arc::new(tx) }
    }

    // == Get ==
    /// Live stream of snapshots.
    ///
    /// The current snapshot is yielded first. Snapshots written in quick
    /// succession may be coalesced; the latest one is always delivered.
    pub fn get(&self) -> impl Stream<Item = Snapshot<T>> + Send + Unpin + 'static {
        WatchStream::new(self.tx.subscribe())
    }

    /// Returns the current snapshot.
    pub fn get_all_sync(&self) -> Snapshot<T> {
        Arc::clone(&self.tx.borrow())
    }

    /// Returns the current value for `id`, if any.
    pub fn get_sync(&self, id: &T::Id) -> Option<T> {
        self.tx.borrow().get(id).cloned()
    }

    // == Store ==
    /// Upserts a batch of values in a single atomic swap.
    ///
    /// Empty batches do not notify observers.
    pub fn store(&self, values: impl IntoIterator<Item = T>) {
        let mut values = values.into_iter().peekable();
        if values.peek().is_none() {
            return;
        }

        self.tx.send_modify(|snapshot| {
            let mut next = (**snapshot).clone();
            for value in values {
                next.insert(value.id(), value);
            }
            *snapshot = Arc::new(next);
        });
    }

    /// Seeds values restored from a previous session.
    ///
    /// `mark` is applied to each value before it is stored, typically
    /// tagging it as cache-only.
    pub fn store_cached(&self, values: impl IntoIterator<Item = T>, mark: impl Fn(T) -> T) {
        self.store(values.into_iter().map(mark));
    }

    // == Update ==
    /// Atomically rewrites the values for `ids`.
    ///
    /// `f` receives the current value (None if absent) and returns the
    /// replacement, or None to leave the slot untouched. Observers are only
    /// notified when at least one slot changed.
    pub fn update<F>(&self, ids: impl IntoIterator<Item = T::Id>, mut f: F)
    where
        F: FnMut(&T::Id, Option<&T>) -> Option<T>,
    {
        self.tx.send_if_modified(|snapshot| {
            let mut next: Option<HashMap<T::Id, T>> = None;

            for id in ids {
                let current = match next.as_ref() {
                    Some(pending) => pending.get(&id),
                    None => snapshot.get(&id),
                };
                if let Some(replacement) = f(&id, current) {
                    next.get_or_insert_with(|| (**snapshot).clone())
                        .insert(id, replacement);
                }
            }

            match next {
                Some(next) => {
                    *snapshot = Arc::new(next);
                    true
                }
                None => false,
            }
        });
    }

    // == Clear ==
    /// Removes every value.
    pub fn clear(&self) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.is_empty() {
                return false;
            }
            *snapshot = Arc::new(HashMap::new());
            true
        });
    }

    // == Length ==
    /// Returns the number of stored values.
    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{StatusSource, SubjectStatus};
    use futures::StreamExt;

    type TestStore = RuntimeStore<SubjectStatus<String, u32>>;

    fn status(subject: &str, value: u32) -> SubjectStatus<String, u32> {
        SubjectStatus::actual(subject.to_string(), value)
    }

    #[test]
    fn test_store_new() {
        let store = TestStore::new();
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_and_get_sync() {
        let store = TestStore::new();

        store.store([status("ETH", 1), status("BTC", 2)]);

        assert_eq!(store.len(), 2);
        let eth = store.get_sync(&"ETH".to_string()).unwrap();
        assert_eq!(eth.status.value(), Some(&1));
    }

    #[test]
    fn test_store_overwrite() {
        let store = TestStore::new();

        store.store([status("ETH", 1)]);
        store.store([status("ETH", 2)]);

        assert_eq!(store.len(), 1);
        let eth = store.get_sync(&"ETH".to_string()).unwrap();
        assert_eq!(eth.status.value(), Some(&2));
    }

    #[test]
    fn test_snapshot_is_immutable() {
        let store = TestStore::new();
        store.store([status("ETH", 1)]);

        let before = store.get_all_sync();
        store.store([status("BTC", 2)]);

        assert_eq!(before.len(), 1);
        assert_eq!(store.get_all_sync().len(), 2);
    }

    #[test]
    fn test_store_cached_marks_values() {
        let store = TestStore::new();

        store.store_cached([status("ETH", 1)], |value| {
            value.with_source(StatusSource::OnlyCache)
        });

        let eth = store.get_sync(&"ETH".to_string()).unwrap();
        assert_eq!(eth.status.source(), Some(StatusSource::OnlyCache));
    }

    #[test]
    fn test_update_existing_only() {
        let store = TestStore::new();
        store.store([status("ETH", 1)]);

        store.update(["ETH".to_string(), "ADA".to_string()], |_, current| {
            current.map(|value| value.clone().with_source(StatusSource::Cache))
        });

        assert_eq!(store.len(), 1);
        let eth = store.get_sync(&"ETH".to_string()).unwrap();
        assert_eq!(eth.status.source(), Some(StatusSource::Cache));
    }

    #[test]
    fn test_update_inserts_when_absent() {
        let store = TestStore::new();

        store.update(["ADA".to_string()], |id, current| match current {
            Some(_) => None,
            None => Some(SubjectStatus::empty(id.clone())),
        });

        assert!(store.get_sync(&"ADA".to_string()).unwrap().status.is_empty());
    }

    #[test]
    fn test_clear() {
        let store = TestStore::new();
        store.store([status("ETH", 1)]);

        store.clear();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_get_yields_current_snapshot_first() {
        let store = TestStore::new();
        store.store([status("ETH", 1)]);

        let mut stream = store.get();
        let first = stream.next().await.unwrap();
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn test_get_observes_writes() {
        let store = TestStore::new();
        let mut stream = store.get();

        let initial = stream.next().await.unwrap();
        assert!(initial.is_empty());

        store.store([status("ETH", 1), status("BTC", 2)]);

        let next = stream.next().await.unwrap();
        assert_eq!(next.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_does_not_notify() {
        let store = TestStore::new();
        let mut stream = tokio_test::task::spawn(store.get());

        tokio_test::assert_ready!(stream.poll_next());
        store.store(Vec::new());
        tokio_test::assert_pending!(stream.poll_next());
    }
}
