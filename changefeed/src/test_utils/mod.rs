//! Helpers for exercising the consume-commit loop against in-memory clients.
//!
//! - [`notify`] bounds waits on asynchronous conditions so a broken test fails instead of hanging.
//! - [`faults`] wraps a broker or a store to make chosen calls fail.
//! - [`failpoints`] configures fail points for the duration of a test.
//! - [`pipeline`] builds pipelines and change events with test defaults.

#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod faults;
pub mod notify;
pub mod pipeline;
