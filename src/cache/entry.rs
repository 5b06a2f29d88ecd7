//! Cache Entry Module
//!
//! Defines the per-subject status values held by the backing store.

use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::Serialize;

// == Status Source ==
/// Where the value a consumer receives comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusSource {
    /// Last known value, a refresh failed or is pending
    Cache,
    /// Restored value, no refresh attempted yet
    OnlyCache,
    /// Freshly validated by a successful fetch
    Actual,
}

// == Identified ==
/// Values that carry their own store key.
pub trait Identified {
    /// Identifier type used as the store key
    type Id: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Returns the identifier of this value.
    fn id(&self) -> Self::Id;
}

// == Entry ==
/// A fetched value plus the metadata needed to judge its freshness.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry<V> {
    /// The fetched value
    pub value: V,
    /// When the value was fetched
    pub fetched_at: DateTime<Utc>,
    /// Freshness tag
    pub source: StatusSource,
}

impl<V> Entry<V> {
    // == Constructor ==
    /// Creates an entry for a value fetched just now.
    pub fn actual(value: V) -> Self {
        Self {
            value,
            fetched_at: Utc::now(),
            source: StatusSource::Actual,
        }
    }

    /// Returns the same entry re-tagged with `source`.
    pub fn with_source(mut self, source: StatusSource) -> Self {
        self.source = source;
        self
    }
}

// == Status ==
/// State of one subject in the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Status<V> {
    /// Nothing known yet
    Empty,
    /// Value available
    Data(Entry<V>),
    /// The last fetch could not produce a value for this subject
    Error {
        /// Upstream reason
        reason: String,
        /// Previous value, if any, tagged as cache
        cached: Option<Entry<V>>,
    },
}

impl<V> Status<V> {
    /// Returns the entry to render, fresh or cached.
    pub fn entry(&self) -> Option<&Entry<V>> {
        match self {
            Status::Empty => None,
            Status::Data(entry) => Some(entry),
            Status::Error { cached, .. } => cached.as_ref(),
        }
    }

    /// Returns the value to render, fresh or cached.
    pub fn value(&self) -> Option<&V> {
        self.entry().map(|entry| &entry.value)
    }

    /// Returns the freshness tag, None when nothing is known.
    pub fn source(&self) -> Option<StatusSource> {
        self.entry().map(|entry| entry.source)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Status::Empty)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Status::Error { .. })
    }
}

// == Subject Status ==
/// Stored unit: a status plus the subject it describes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectStatus<S, V> {
    /// The subject (currency, staking position, ...)
    pub subject: S,
    /// Current state
    pub status: Status<V>,
}

impl<S, V> SubjectStatus<S, V> {
    /// Fallback value for a subject nothing is known about.
    pub fn empty(subject: S) -> Self {
        Self {
            subject,
            status: Status::Empty,
        }
    }

    /// Freshly fetched value.
    pub fn actual(subject: S, value: V) -> Self {
        Self {
            subject,
            status: Status::Data(Entry::actual(value)),
        }
    }

    /// Value restored from a previous session.
    pub fn only_cache(subject: S, value: V) -> Self {
        Self {
            subject,
            status: Status::Data(Entry::actual(value).with_source(StatusSource::OnlyCache)),
        }
    }

    /// Error state keeping the previous value, if there was one.
    pub fn error(subject: S, reason: impl Into<String>, previous: Option<&Status<V>>) -> Self
    where
        V: Clone,
    {
        let cached = previous
            .and_then(Status::entry)
            .cloned()
            .map(|entry| entry.with_source(StatusSource::Cache));

        Self {
            subject,
            status: Status::Error {
                reason: reason.into(),
                cached,
            },
        }
    }

    /// Returns the same status with any known value re-tagged as `source`.
    pub fn with_source(self, source: StatusSource) -> Self {
        let status = match self.status {
            Status::Data(entry) => Status::Data(entry.with_source(source)),
            Status::Error { reason, cached } => Status::Error {
                reason,
                cached: cached.map(|entry| entry.with_source(source)),
            },
            Status::Empty => Status::Empty,
        };
        Self {
            subject: self.subject,
            status,
        }
    }
}

impl<S, V> Identified for SubjectStatus<S, V>
where
    S: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    type Id = S;

    fn id(&self) -> S {
        self.subject.clone()
    }
}
