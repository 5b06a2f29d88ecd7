//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the process is up.
//!
//! # Tasks
//! - Periodic Refresh: Re-fetches a fixed subject set at configured intervals

mod refresh;

pub use refresh::spawn_refresh_task;
