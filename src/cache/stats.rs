//! Registry Statistics Module
//!
//! Tracks how refresh requests were served: executed, skipped by TTL, or
//! joined onto an execution already in flight.

use serde::Serialize;

// == Registry Stats ==
/// Tracks registry activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Number of actions started
    pub executions: u64,
    /// Number of requests skipped because the key was still fresh
    pub skipped: u64,
    /// Number of requests that awaited an execution already in flight
    pub joined: u64,
    /// Number of executions that completed with an error
    pub failures: u64,
    /// Number of executions dropped before completion
    pub cancellations: u64,
}

impl RegistryStats {
    // == Constructor ==
    /// Creates a new RegistryStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Saved Rate ==
    /// Share of requests that did not start a new execution.
    ///
    /// Returns (skipped + joined) / total, or 0.0 if no requests have been made.
    pub fn saved_rate(&self) -> f64 {
        let saved = self.skipped + self.joined;
        let total = saved + self.executions;
        if total == 0 {
            0.0
        } else {
            saved as f64 / total as f64
        }
    }

    pub fn record_execution(&mut self) {
        self.executions += 1;
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn record_join(&mut self) {
        self.joined += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn record_cancellation(&mut self) {
        self.cancellations += 1;
    }
}
