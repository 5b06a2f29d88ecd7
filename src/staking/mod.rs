//! Staking Module
//!
//! Staking balances per wallet and staking position, fetched in upstream
//! sized batches and served through shared streams.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Serialize;

use crate::cache::{CacheRegistry, RuntimeStore, SubjectStatus};
use crate::config::Config;
use crate::error::Result;
use crate::fetch::{
    DefaultMultiFetcher, FetchContext, MultiFetchParams, RemoteSource, SingleFetcher,
    SubjectOutcome,
};
use crate::flow::{CachingSupplier, SharingPolicy, StoreProducerFactory, SubjectParams, Subscription};
use crate::models::{YieldBalanceDto, YieldBalanceRequest};

/// Registry key prefix of staking batches.
pub const STAKING_SOURCE_NAME: &str = "staking";

/// Upstream limit of balance requests per call.
pub const DEFAULT_MAX_BATCH: usize = 15;

// == Identifiers ==
/// Identifier of a user wallet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct UserWalletId(String);

impl UserWalletId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for UserWalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One staking position: an integration plus the staking address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StakingId {
    pub integration_id: String,
    pub address: String,
}

impl StakingId {
    pub fn new(integration_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            integration_id: integration_id.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for StakingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.integration_id, self.address)
    }
}

/// Store key: a staking position of one wallet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StakingSubject {
    pub wallet: UserWalletId,
    pub staking: StakingId,
}

impl StakingSubject {
    pub fn new(wallet: UserWalletId, staking: StakingId) -> Self {
        Self { wallet, staking }
    }
}

impl fmt::Display for StakingSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.wallet, self.staking)
    }
}

// == Staking Balance ==
/// One balance line of a staking position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StakingBalanceItem {
    pub kind: String,
    pub amount: BigDecimal,
}

/// Balances of one staking position.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StakingBalance {
    pub items: Vec<StakingBalanceItem>,
}

impl StakingBalance {
    /// Sum of every balance line.
    pub fn total(&self) -> BigDecimal {
        self.items
            .iter()
            .fold(BigDecimal::from(0), |total, item| total + &item.amount)
    }
}

impl From<YieldBalanceDto> for StakingBalance {
    fn from(dto: YieldBalanceDto) -> Self {
        Self {
            items: dto
                .balances
                .into_iter()
                .map(|item| StakingBalanceItem {
                    kind: item.kind,
                    amount: item.amount,
                })
                .collect(),
        }
    }
}

pub type StakingStatus = SubjectStatus<StakingSubject, StakingBalance>;
pub type StakingStore = RuntimeStore<StakingStatus>;
pub type StakingProducerFactory =
    StoreProducerFactory<StakingBalanceParams, StakingSubject, StakingBalance>;
pub type StakingSupplier = CachingSupplier<StakingProducerFactory>;
pub type StakingMultiFetcher = DefaultMultiFetcher<StakingSource>;
pub type StakingSingleFetcher = SingleFetcher<Arc<StakingMultiFetcher>>;

// == Staking Balance Params ==
/// Params of one staking balance stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StakingBalanceParams {
    pub wallet: UserWalletId,
    pub staking: StakingId,
}

impl StakingBalanceParams {
    pub fn new(wallet: UserWalletId, staking: StakingId) -> Self {
        Self { wallet, staking }
    }

    pub fn cache_key(&self) -> String {
        format!("staking_balance:{}:{}", self.wallet, self.staking)
    }
}

impl SubjectParams for StakingBalanceParams {
    type Subject = StakingSubject;

    fn subject(&self) -> StakingSubject {
        StakingSubject::new(self.wallet.clone(), self.staking.clone())
    }
}

/// Batch params for every position of one wallet.
pub fn wallet_params(
    wallet: &UserWalletId,
    stakings: impl IntoIterator<Item = StakingId>,
) -> MultiFetchParams<StakingSubject> {
    MultiFetchParams::new(
        stakings
            .into_iter()
            .map(|staking| StakingSubject::new(wallet.clone(), staking)),
    )
}

// == Staking Api ==
/// Remote yield balances endpoint.
#[async_trait]
pub trait StakingApi: Send + Sync + 'static {
    async fn get_balances(
        &self,
        requests: &[YieldBalanceRequest],
        context: &FetchContext,
    ) -> Result<Vec<YieldBalanceDto>>;
}

// == Staking Source ==
/// [`RemoteSource`] over a [`StakingApi`], limited to `max_batch` positions per call.
pub struct StakingSource {
    api: Arc<dyn StakingApi>,
    max_batch: usize,
}

impl StakingSource {
    pub fn new(api: Arc<dyn StakingApi>, max_batch: usize) -> Self {
        Self {
            api,
            max_batch: max_batch.max(1),
        }
    }
}

#[async_trait]
impl RemoteSource for StakingSource {
    type Subject = StakingSubject;
    type Value = StakingBalance;

    fn name(&self) -> &str {
        STAKING_SOURCE_NAME
    }

    fn max_batch_size(&self) -> Option<usize> {
        Some(self.max_batch)
    }

    async fn fetch(
        &self,
        subjects: &[StakingSubject],
        context: &FetchContext,
    ) -> Result<HashMap<StakingSubject, SubjectOutcome<StakingBalance>>> {
        let mut outcomes = HashMap::new();
        let mut requests: Vec<YieldBalanceRequest> = Vec::with_capacity(subjects.len());
        let mut valid: Vec<&StakingSubject> = Vec::with_capacity(subjects.len());
        for subject in subjects {
            let request =
                YieldBalanceRequest::new(&subject.staking.integration_id, &subject.staking.address);
            match request.validate() {
                Some(reason) => {
                    outcomes.insert(subject.clone(), Err(reason));
                }
                None => {
                    requests.push(request);
                    valid.push(subject);
                }
            }
        }

        // Sibling chunks of the same batch must not fail with this one
        if requests.is_empty() {
            return Ok(outcomes);
        }

        let balances: HashMap<StakingId, YieldBalanceDto> = self
            .api
            .get_balances(&requests, context)
            .await?
            .into_iter()
            .map(|dto| (StakingId::new(&dto.integration_id, &dto.address), dto))
            .collect();

        // Balances are per position, every wallet holding it gets the same lines
        outcomes.extend(valid.into_iter().filter_map(|subject| {
            let dto = balances.get(&subject.staking)?.clone();
            Some((subject.clone(), Ok(StakingBalance::from(dto))))
        }));

        Ok(outcomes)
    }
}

// == Staking Module ==
/// Staking balances store, supplier and fetchers sharing one registry.
pub struct StakingModule {
    store: StakingStore,
    supplier: StakingSupplier,
    multi: Arc<StakingMultiFetcher>,
    single: StakingSingleFetcher,
}

impl fmt::Debug for StakingModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StakingModule")
            .field("balances", &self.store.len())
            .field("supplier", &self.supplier)
            .finish()
    }
}

impl StakingModule {
    pub fn new(api: Arc<dyn StakingApi>, registry: CacheRegistry, config: &Config) -> Self {
        Self::with_settings(
            api,
            registry,
            config.staking_max_batch,
            config.staking_ttl(),
            config.sharing_policy(),
        )
    }

    pub fn with_settings(
        api: Arc<dyn StakingApi>,
        registry: CacheRegistry,
        max_batch: usize,
        ttl: Duration,
        policy: SharingPolicy,
    ) -> Self {
        let store = StakingStore::new();
        let source = Arc::new(StakingSource::new(api, max_batch));
        let multi = Arc::new(DefaultMultiFetcher::new(
            source,
            store.clone(),
            registry,
            ttl,
        ));
        let supplier = CachingSupplier::new(
            StakingProducerFactory::new(store.clone()),
            StakingBalanceParams::cache_key,
            policy,
        );

        Self {
            store,
            supplier,
            single: SingleFetcher::new(Arc::clone(&multi)),
            multi,
        }
    }

    /// Shared stream of one staking position's balance status.
    pub fn get(&self, params: &StakingBalanceParams) -> Subscription<StakingStatus> {
        self.supplier.get(params)
    }

    pub fn store(&self) -> &StakingStore {
        &self.store
    }

    pub fn supplier(&self) -> &StakingSupplier {
        &self.supplier
    }

    pub fn multi_fetcher(&self) -> &Arc<StakingMultiFetcher> {
        &self.multi
    }

    pub fn single_fetcher(&self) -> &StakingSingleFetcher {
        &self.single
    }
}
