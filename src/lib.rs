//! Live Cache - keyed reactive caching and fetch orchestration
//!
//! Serves live, frequently changing data (price quotes, staking balances)
//! to many concurrent observers with one shared stream per key, at most one
//! in-flight remote fetch per key and TTL-gated refreshes.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod flow;
pub mod models;
pub mod quotes;
pub mod staking;
pub mod tasks;

pub use cache::{CacheRegistry, RuntimeStore, Status, StatusSource, SubjectStatus};
pub use config::Config;
pub use error::{CacheError, Result};
pub use flow::{CachingSupplier, SharingPolicy, Subscription};
pub use tasks::spawn_refresh_task;
