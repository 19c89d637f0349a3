mod base;
pub mod kafka;
pub mod memory;

pub use base::Broker;
