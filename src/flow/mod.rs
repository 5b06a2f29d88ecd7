//! Flow Module
//!
//! Producers, the multicast adapter and the caching supplier built on them.

mod producer;
mod share;
mod supplier;

// Re-export public types
pub use producer::{
    distinct_until_changed, Producer, ProducerFactory, StoreProducer, StoreProducerFactory,
    SubjectParams,
};
pub use share::{FlowSource, FlowTable, SharedFlow, SharingPolicy, Subscription};
pub use supplier::{CachingSupplier, FactoryValue, KeyCreator};
