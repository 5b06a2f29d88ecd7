//! Producer Module
//!
//! Key-scoped live streams derived from a runtime store.

use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

use futures::future;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::cache::{RuntimeStore, SubjectStatus};

// == Producer ==
/// Live, restartable stream of the current value for one subject.
pub trait Producer: Send + Sync + 'static {
    /// Emitted value
    type Value: Clone + PartialEq + Send + Sync + 'static;

    /// Starts a new stream. Each call returns an independent stream that
    /// begins with the currently known value.
    fn produce(&self) -> BoxStream<'static, Self::Value>;

    /// Value shown before any real data exists.
    fn fallback(&self) -> Self::Value;

    /// Most recently known value, or the fallback when there is none yet.
    fn current(&self) -> Self::Value {
        self.fallback()
    }
}

// == Producer Factory ==
/// Builds one producer per params value. Construction does no I/O.
pub trait ProducerFactory: Send + Sync + 'static {
    type Params;
    type Producer: Producer;

    fn create(&self, params: &Self::Params) -> Self::Producer;
}

/// Params that identify exactly one subject of a store.
pub trait SubjectParams {
    type Subject;

    fn subject(&self) -> Self::Subject;
}

// == Store Producer ==
/// Producer watching a single subject of a [`RuntimeStore`].
#[derive(Debug, Clone)]
pub struct StoreProducer<S, V>
where
    S: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    subject: S,
    store: RuntimeStore<SubjectStatus<S, V>>,
}

impl<S, V> StoreProducer<S, V>
where
    S: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(subject: S, store: RuntimeStore<SubjectStatus<S, V>>) -> Self {
        Self { subject, store }
    }

    pub fn subject(&self) -> &S {
        &self.subject
    }
}

impl<S, V> Producer for StoreProducer<S, V>
where
    S: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    type Value = SubjectStatus<S, V>;

    fn produce(&self) -> BoxStream<'static, Self::Value> {
        let subject = self.subject.clone();
        let values = self.store.get().map(move |snapshot| {
            snapshot
                .get(&subject)
                .cloned()
                .unwrap_or_else(|| SubjectStatus::empty(subject.clone()))
        });
        distinct_until_changed(values).boxed()
    }

    fn fallback(&self) -> Self::Value {
        SubjectStatus::empty(self.subject.clone())
    }

    fn current(&self) -> Self::Value {
        self.store
            .get_sync(&self.subject)
            .unwrap_or_else(|| self.fallback())
    }
}

// == Store Producer Factory ==
/// Creates a [`StoreProducer`] for the subject named by each params value.
pub struct StoreProducerFactory<P, S, V>
where
    S: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    store: RuntimeStore<SubjectStatus<S, V>>,
    _params: PhantomData<fn(&P)>,
}

impl<P, S, V> StoreProducerFactory<P, S, V>
where
    S: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(store: RuntimeStore<SubjectStatus<S, V>>) -> Self {
        Self {
            store,
            _params: PhantomData,
        }
    }
}

impl<P, S, V> ProducerFactory for StoreProducerFactory<P, S, V>
where
    P: SubjectParams<Subject = S> + 'static,
    S: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    type Params = P;
    type Producer = StoreProducer<S, V>;

    fn create(&self, params: &P) -> Self::Producer {
        StoreProducer::new(params.subject(), self.store.clone())
    }
}

// == Change Suppression ==
/// Drops items equal to the previously emitted one.
pub fn distinct_until_changed<St>(stream: St) -> impl Stream<Item = St::Item>
where
    St: Stream,
    St::Item: Clone + PartialEq,
{
    let mut last: Option<St::Item> = None;
    stream.filter_map(move |value| {
        let changed = last.as_ref() != Some(&value);
        if changed {
            last = Some(value.clone());
        }
        future::ready(changed.then_some(value))
    })
}
