//! Quotes Module
//!
//! Fiat price quotes per currency: remote source, store, shared streams and
//! fetchers wired together by [`QuotesModule`].

mod http;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Serialize;

use crate::cache::{CacheRegistry, RuntimeStore, SubjectStatus};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::fetch::{
    DefaultMultiFetcher, FetchContext, RemoteSource, SingleFetcher, SubjectOutcome,
};
use crate::flow::{CachingSupplier, SharingPolicy, StoreProducerFactory, SubjectParams, Subscription};
use crate::models::QuotesResponse;

pub use http::HttpQuotesApi;

/// Registry key prefix of quote batches.
pub const QUOTES_SOURCE_NAME: &str = "quotes";

// == Currency Id ==
/// Upstream coin identifier ("bitcoin", "ethereum", ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CurrencyId(String);

impl CurrencyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CurrencyId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// == Quote ==
/// Price of one currency in the configured fiat currency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub fiat_rate: BigDecimal,
    pub price_change_24h: Option<BigDecimal>,
}

/// Stored unit of the quotes store.
pub type QuoteStatus = SubjectStatus<CurrencyId, Quote>;
pub type QuotesStore = RuntimeStore<QuoteStatus>;
pub type QuotesProducerFactory = StoreProducerFactory<QuoteParams, CurrencyId, Quote>;
pub type QuotesSupplier = CachingSupplier<QuotesProducerFactory>;
pub type QuotesMultiFetcher = DefaultMultiFetcher<QuotesSource>;
pub type QuotesSingleFetcher = SingleFetcher<Arc<QuotesMultiFetcher>>;

// == Quote Params ==
/// Params of one quote stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuoteParams {
    pub currency_id: CurrencyId,
}

impl QuoteParams {
    pub fn new(currency_id: impl Into<CurrencyId>) -> Self {
        Self {
            currency_id: currency_id.into(),
        }
    }

    /// Cache key shared by every stream of this currency.
    pub fn cache_key(&self) -> String {
        format!("quote:{}", self.currency_id)
    }
}

impl SubjectParams for QuoteParams {
    type Subject = CurrencyId;

    fn subject(&self) -> CurrencyId {
        self.currency_id.clone()
    }
}

// == Quotes Api ==
/// Remote quotes endpoint.
#[async_trait]
pub trait QuotesApi: Send + Sync + 'static {
    /// Fetches quotes of `coin_ids` expressed in `fiat_currency`.
    async fn get_quotes(
        &self,
        fiat_currency: &str,
        coin_ids: &[CurrencyId],
        context: &FetchContext,
    ) -> Result<QuotesResponse>;
}

// == Quotes Source ==
/// [`RemoteSource`] turning a [`QuotesApi`] response into per-currency outcomes.
pub struct QuotesSource {
    api: Arc<dyn QuotesApi>,
    fiat_currency: String,
}

impl QuotesSource {
    pub fn new(api: Arc<dyn QuotesApi>, fiat_currency: impl Into<String>) -> Self {
        Self {
            api,
            fiat_currency: fiat_currency.into(),
        }
    }
}

#[async_trait]
impl RemoteSource for QuotesSource {
    type Subject = CurrencyId;
    type Value = Quote;

    fn name(&self) -> &str {
        QUOTES_SOURCE_NAME
    }

    async fn fetch(
        &self,
        subjects: &[CurrencyId],
        context: &FetchContext,
    ) -> Result<HashMap<CurrencyId, SubjectOutcome<Quote>>> {
        if self.fiat_currency.trim().is_empty() {
            return Err(CacheError::InvalidArguments(
                "fiat currency id is empty".to_string(),
            ));
        }

        let mut response = self
            .api
            .get_quotes(&self.fiat_currency, subjects, context)
            .await?;

        let outcomes = subjects
            .iter()
            .filter_map(|id| {
                let dto = response.quotes.remove(id.as_str())?;
                let outcome = match dto.price {
                    Some(fiat_rate) => Ok(Quote {
                        fiat_rate,
                        price_change_24h: dto.price_change_24h,
                    }),
                    None => Err("price missing".to_string()),
                };
                Some((id.clone(), outcome))
            })
            .collect();

        Ok(outcomes)
    }
}

// == Quotes Module ==
/// Quotes store, supplier and fetchers sharing one registry.
pub struct QuotesModule {
    store: QuotesStore,
    supplier: QuotesSupplier,
    multi: Arc<QuotesMultiFetcher>,
    single: QuotesSingleFetcher,
}

impl fmt::Debug for QuotesModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotesModule")
            .field("quotes", &self.store.len())
            .field("supplier", &self.supplier)
            .finish()
    }
}

impl QuotesModule {
    /// Wires the module from the runtime configuration.
    pub fn new(api: Arc<dyn QuotesApi>, registry: CacheRegistry, config: &Config) -> Self {
        Self::with_settings(
            api,
            registry,
            &config.fiat_currency,
            config.quotes_ttl(),
            config.sharing_policy(),
        )
    }

    pub fn with_settings(
        api: Arc<dyn QuotesApi>,
        registry: CacheRegistry,
        fiat_currency: &str,
        ttl: Duration,
        policy: SharingPolicy,
    ) -> Self {
        let store = QuotesStore::new();
        let source = Arc::new(QuotesSource::new(api, fiat_currency));
        let multi = Arc::new(DefaultMultiFetcher::new(
            source,
            store.clone(),
            registry,
            ttl,
        ));
        let supplier = CachingSupplier::new(
            QuotesProducerFactory::new(store.clone()),
            QuoteParams::cache_key,
            policy,
        );

        Self {
            store,
            supplier,
            single: SingleFetcher::new(Arc::clone(&multi)),
            multi,
        }
    }

    /// Shared stream of one currency's quote status.
    pub fn get(&self, params: &QuoteParams) -> Subscription<QuoteStatus> {
        self.supplier.get(params)
    }

    pub fn store(&self) -> &QuotesStore {
        &self.store
    }

    pub fn supplier(&self) -> &QuotesSupplier {
        &self.supplier
    }

    pub fn multi_fetcher(&self) -> &Arc<QuotesMultiFetcher> {
        &self.multi
    }

    pub fn single_fetcher(&self) -> &QuotesSingleFetcher {
        &self.single
    }
}
