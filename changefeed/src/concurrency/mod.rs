//! Coordination between the consume-commit loop and the task requesting its shutdown.
//!
//! The [`shutdown`] module carries the one-way shutdown request into the loop. The [`signal`]
//! module carries the confirmation that the loop released its clients back to the requester.

pub mod shutdown;
pub mod signal;
