//! HTTP quotes client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::Result;
use crate::fetch::FetchContext;
use crate::models::QuotesResponse;
use crate::quotes::{CurrencyId, QuotesApi};

/// Fields requested from the quotes endpoint
const QUOTE_FIELDS: &str = "price,priceChange24h";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// == Http Quotes Api ==
/// [`QuotesApi`] over `GET {base_url}/quotes`.
#[derive(Debug, Clone)]
pub struct HttpQuotesApi {
    client: Client,
    base_url: String,
}

impl HttpQuotesApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn quotes_url(&self) -> String {
        format!("{}/quotes", self.base_url)
    }
}

#[async_trait]
impl QuotesApi for HttpQuotesApi {
    async fn get_quotes(
        &self,
        fiat_currency: &str,
        coin_ids: &[CurrencyId],
        context: &FetchContext,
    ) -> Result<QuotesResponse> {
        let coin_ids = coin_ids
            .iter()
            .map(CurrencyId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        debug!(fiat_currency, coin_ids, "Requesting quotes");

        let mut request = self.client.get(self.quotes_url()).query(&[
            ("currencyId", fiat_currency),
            ("coinIds", coin_ids.as_str()),
            ("fields", QUOTE_FIELDS),
        ]);
        if let Some(session) = &context.session {
            request = request.bearer_auth(session.expose());
        }

        let response = request.send().await?.error_for_status()?;
        let body = response.bytes().await?;

        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quotes_url_trims_trailing_slash() {
        let api = HttpQuotesApi::with_client(Client::new(), "http://localhost:8080/");
        assert_eq!(api.quotes_url(), "http://localhost:8080/quotes");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        // Port 9 (discard) is closed on test machines
        let api = HttpQuotesApi::new("http://127.0.0.1:9").unwrap();
        let result = api
            .get_quotes("usd", &[CurrencyId::from("bitcoin")], &FetchContext::default())
            .await;

        assert!(result.unwrap_err().is_transient());
    }
}
