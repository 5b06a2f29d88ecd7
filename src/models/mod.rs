//! Request and Response models of the remote APIs
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::YieldBalanceRequest;
pub use responses::{BalanceItemDto, QuoteDto, QuotesResponse, YieldBalanceDto};
