//! Configuration types and loading for the changefeed services.
//!
//! Both the indexer and the producer read their settings through [`load_config`], which layers
//! a base file, an environment specific file and `APP_` prefixed environment variables.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
