//! Consume-commit pipeline moving change events from a Kafka topic into a search index.
//!
//! A [`pipeline::Pipeline`] drives a single [`workers::consume::ConsumeCommitLoop`] that polls a
//! [`broker::Broker`], turns the polled messages into index operations, submits them to an
//! [`store::IndexStore`] in one bulk request and only then commits the consumed offsets. Every
//! message is therefore indexed at least once, and redeliveries overwrite the same documents.

pub mod batch;
pub mod broker;
pub mod concurrency;
pub mod error;
pub mod extract;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod gateway;
mod macros;
pub mod metrics;
pub mod pipeline;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
