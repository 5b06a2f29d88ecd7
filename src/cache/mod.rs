//! Cache Module
//!
//! Provides the status model, the observable backing store and the TTL
//! single-flight registry that gates refreshes.

mod entry;
mod registry;
mod stats;
mod store;


// Re-export public types
pub use entry::{Entry, Identified, Status, StatusSource, SubjectStatus};
pub use registry::CacheRegistry;
pub use stats::RegistryStats;
pub use store::{RuntimeStore, Snapshot};
