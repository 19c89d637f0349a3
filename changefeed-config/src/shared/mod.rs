//! Configuration types shared by the changefeed services.

mod base;
mod broker;
mod feed;
mod indexer;
mod pipeline;
mod producer;
mod sentry;
mod store;

pub use base::ValidationError;
pub use broker::{AutoOffsetReset, BrokerConfig};
pub use feed::FeedConfig;
pub use indexer::{IndexerConfig, IndexerConfigWithoutSecrets};
pub use pipeline::{IdStrategy, PipelineConfig};
pub use producer::ProducerConfig;
pub use sentry::SentryConfig;
pub use store::{StoreConfig, StoreConfigWithoutSecrets};
