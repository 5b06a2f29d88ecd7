//! Single Fetcher Module
//!
//! Adapter folding one-subject requests into the multi fetcher.

use crate::error::Result;
use crate::fetch::{MultiFetcher, SingleFetchParams};

// == Single Fetcher ==
/// Fetches one subject through a [`MultiFetcher`] with a singleton set, so
/// single and batch requests share registry keys and store writes.
#[derive(Debug, Clone)]
pub struct SingleFetcher<M> {
    multi: M,
}

impl<M: MultiFetcher> SingleFetcher<M> {
    pub fn new(multi: M) -> Self {
        Self { multi }
    }

    pub async fn invoke(&self, params: SingleFetchParams<M::Subject>) -> Result<()> {
        self.multi.invoke(&params.into()).await
    }

    pub fn multi(&self) -> &M {
        &self.multi
    }
}
