//! Request DTOs of the remote APIs
//!
//! Defines the structure of outgoing HTTP request bodies.

use serde::Serialize;

/// One entry of a yield balances request body
///
/// # Fields
/// - `integration_id`: Staking integration (validator set, pool, ...)
/// - `address`: Wallet address staking in that integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YieldBalanceRequest {
    pub integration_id: String,
    pub address: String,
}

impl YieldBalanceRequest {
    pub fn new(integration_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            integration_id: integration_id.into(),
            address: address.into(),
        }
    }

    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.integration_id.is_empty() {
            return Some("Integration id cannot be empty".to_string());
        }
        if self.address.is_empty() {
            return Some("Address cannot be empty".to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yield_balance_request_serialize() {
        let request = YieldBalanceRequest::new("solana-sol-native-staking", "So1abc");
        let json = serde_json::to_string(&request).unwrap();

        assert_eq!(
            json,
            r#"{"integrationId":"solana-sol-native-staking","address":"So1abc"}"#
        );
    }

    #[test]
    fn test_yield_balance_request_validation() {
        assert!(YieldBalanceRequest::new("lido", "0xabc").validate().is_none());
        assert!(YieldBalanceRequest::new("", "0xabc").validate().is_some());
        assert!(YieldBalanceRequest::new("lido", "").validate().is_some());
    }
}
