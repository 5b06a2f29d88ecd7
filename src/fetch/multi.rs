//! Multi Fetcher Module
//!
//! The single code path that talks to the network: batches subjects, gates
//! the remote call through the cache registry and writes every result in
//! one atomic store update.

use std::collections::{BTreeSet, HashMap};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::cache::{CacheRegistry, RuntimeStore, Status, StatusSource, SubjectStatus};
use crate::error::Result;
use crate::fetch::{FetchContext, MultiFetchParams};

/// Per-subject result of a successful remote call, Err carries the upstream reason.
pub type SubjectOutcome<V> = std::result::Result<V, String>;

/// Reason stored for subjects a successful response did not mention.
pub const NO_DATA_REASON: &str = "no data returned";

// == Remote Source ==
/// The remote call behind a multi fetcher.
#[async_trait]
pub trait RemoteSource: Send + Sync + 'static {
    type Subject: Clone + Ord + Hash + Debug + Display + Send + Sync + 'static;
    type Value: Clone + PartialEq + Send + Sync + 'static;

    /// Prefix of the registry keys of this source.
    fn name(&self) -> &str;

    /// Upstream limit of subjects per call, None when unbounded.
    fn max_batch_size(&self) -> Option<usize> {
        None
    }

    /// Fetches `subjects` in one round trip.
    ///
    /// Err means the whole call failed. Per-subject problems are reported
    /// inside the map.
    async fn fetch(
        &self,
        subjects: &[Self::Subject],
        context: &FetchContext,
    ) -> Result<HashMap<Self::Subject, SubjectOutcome<Self::Value>>>;
}

// == Multi Fetcher ==
#[async_trait]
pub trait MultiFetcher: Send + Sync {
    type Subject: Clone + Ord + Send + Sync + 'static;

    /// Refreshes `params.subjects` unless they were refreshed within the TTL.
    async fn invoke(&self, params: &MultiFetchParams<Self::Subject>) -> Result<()>;
}

#[async_trait]
impl<T> MultiFetcher for Arc<T>
where
    T: MultiFetcher + ?Sized,
{
    type Subject = T::Subject;

    async fn invoke(&self, params: &MultiFetchParams<Self::Subject>) -> Result<()> {
        (**self).invoke(params).await
    }
}

/// Store of the statuses a source produces.
pub type SourceStore<R> =
    RuntimeStore<SubjectStatus<<R as RemoteSource>::Subject, <R as RemoteSource>::Value>>;

// == Default Multi Fetcher ==
/// [`MultiFetcher`] over a [`RemoteSource`], a store and a registry.
pub struct DefaultMultiFetcher<R: RemoteSource> {
    source: Arc<R>,
    store: SourceStore<R>,
    registry: CacheRegistry,
    ttl: Duration,
}

impl<R: RemoteSource> Debug for DefaultMultiFetcher<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultMultiFetcher")
            .field("source", &self.source.name())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<R: RemoteSource> DefaultMultiFetcher<R> {
    // == Constructor ==
    pub fn new(
        source: Arc<R>,
        store: SourceStore<R>,
        registry: CacheRegistry,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            store,
            registry,
            ttl,
        }
    }

    pub fn store(&self) -> &SourceStore<R> {
        &self.store
    }

    /// Registry key of a batch: source name plus the sorted subjects.
    pub fn cache_key(&self, subjects: &BTreeSet<R::Subject>) -> String {
        let subjects: Vec<String> = subjects.iter().map(ToString::to_string).collect();
        format!("{}:{}", self.source.name(), subjects.join(","))
    }
}

#[async_trait]
impl<R: RemoteSource> MultiFetcher for DefaultMultiFetcher<R> {
    type Subject = R::Subject;

    async fn invoke(&self, params: &MultiFetchParams<R::Subject>) -> Result<()> {
        if params.subjects.is_empty() {
            debug!(source = self.source.name(), "Nothing to fetch");
            return Ok(());
        }

        let key = self.cache_key(&params.subjects);
        let subjects: Vec<R::Subject> = params.subjects.iter().cloned().collect();
        let source = Arc::clone(&self.source);
        let store = self.store.clone();
        let context = params.context.clone();

        self.registry
            .invoke_on_expire(&key, self.ttl, params.context.refresh, move || {
                refresh(source, store, subjects, context)
            })
            .await
    }
}

async fn refresh<R: RemoteSource>(
    source: Arc<R>,
    store: SourceStore<R>,
    subjects: Vec<R::Subject>,
    context: FetchContext,
) -> Result<()> {
    info!(source = source.name(), subjects = subjects.len(), "Fetching");
    let before = store.get_all_sync();

    let mut fetched = match fetch_batched(&*source, &subjects, &context).await {
        Ok(fetched) => fetched,
        Err(error) => {
            warn!(
                source = source.name(),
                %error,
                transient = error.is_transient(),
                "Fetch failed, serving cached values"
            );
            // Entries rewritten by an overlapping batch meanwhile stay as they are
            store.update(subjects, |subject, current| {
                current
                    .filter(|status| matches!(status.status, Status::Data(_)))
                    .filter(|status| before.get(subject) == Some(*status))
                    .map(|status| status.clone().with_source(StatusSource::Cache))
            });
            return Err(error);
        }
    };

    let mut failed = 0usize;
    store.update(subjects.iter().cloned(), |subject, current| {
        let status = match fetched.remove(subject) {
            Some(Ok(value)) => SubjectStatus::actual(subject.clone(), value),
            Some(Err(reason)) => {
                failed += 1;
                warn!(source = source.name(), %subject, %reason, "Subject fetch failed");
                SubjectStatus::error(subject.clone(), reason, current.map(|c| &c.status))
            }
            None => {
                failed += 1;
                warn!(source = source.name(), %subject, "Subject missing from response");
                SubjectStatus::error(subject.clone(), NO_DATA_REASON, current.map(|c| &c.status))
            }
        };
        Some(status)
    });

    info!(
        source = source.name(),
        subjects = subjects.len(),
        failed,
        "Fetch complete"
    );
    Ok(())
}

/// Splits `subjects` into upstream-sized chunks fetched concurrently.
async fn fetch_batched<R: RemoteSource>(
    source: &R,
    subjects: &[R::Subject],
    context: &FetchContext,
) -> Result<HashMap<R::Subject, SubjectOutcome<R::Value>>> {
    let chunk_size = source
        .max_batch_size()
        .filter(|size| *size > 0)
        .unwrap_or(subjects.len())
        .max(1);

    let chunks = subjects
        .chunks(chunk_size)
        .map(|chunk| source.fetch(chunk, context));
    let responses = try_join_all(chunks).await?;

    Ok(responses.into_iter().flatten().collect())
}
