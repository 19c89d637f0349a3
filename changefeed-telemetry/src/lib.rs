//! Logging and metrics setup shared by the changefeed binaries.

pub mod metrics;
pub mod tracing;
