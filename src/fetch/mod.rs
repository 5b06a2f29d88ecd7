//! Fetch Module
//!
//! Multi fetchers issue batched remote calls gated by the cache registry;
//! single fetchers fold one subject into a multi fetch.

mod multi;
mod params;
mod single;

// Re-export public types
pub use multi::{
    DefaultMultiFetcher, MultiFetcher, RemoteSource, SourceStore, SubjectOutcome, NO_DATA_REASON,
};
pub use params::{FetchContext, MultiFetchParams, SessionToken, SingleFetchParams};
pub use single::SingleFetcher;
