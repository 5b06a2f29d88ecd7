//! Response DTOs of the remote APIs
//!
//! Defines the structure of incoming HTTP response bodies.

use std::collections::HashMap;

use bigdecimal::BigDecimal;
use serde::Deserialize;

/// Response body of the quotes endpoint (GET /quotes)
///
/// Keyed by coin id. Coins the upstream does not know are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QuotesResponse {
    #[serde(default)]
    pub quotes: HashMap<String, QuoteDto>,
}

/// One coin of a [`QuotesResponse`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteDto {
    /// Price in the requested fiat currency, absent when the upstream has none
    #[serde(default)]
    pub price: Option<BigDecimal>,
    /// Relative 24h price change in percent
    #[serde(default)]
    pub price_change_24h: Option<BigDecimal>,
}

/// One staking position of a yield balances response
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YieldBalanceDto {
    pub integration_id: String,
    pub address: String,
    #[serde(default)]
    pub balances: Vec<BalanceItemDto>,
}

/// One balance line (staked, rewards, unstaking, ...)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BalanceItemDto {
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: BigDecimal,
}
