//! Dispatcher configuration loading and validation (.qad/config.toml).

pub mod config;
pub mod paths;
pub mod validate;

pub use config::{
    ApiConfig, CURRENT_SCHEMA_VERSION, CacheConfig, DispatchConfig, RetryConfig, TierConfig,
    TiersConfig, WaitConfig,
};
pub use validate::{validate_config, validate_loaded_config};
