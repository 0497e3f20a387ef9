//! # Configuration Module
//!
//! Configuration structures, defaults and validation for the gateway.

pub mod config;

pub use config::{
    BudgetConfig, CacheConfig, GatewayConfig, PreprocessConfig, ProviderConfig, ProviderKind,
    RetryConfig, RetryPolicy, default_providers,
};
