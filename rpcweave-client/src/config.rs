//! Configuration modules for rpcweave clients.
//!
//! This module contains client-level configuration:
//! - [`RetryPolicy`]: Retry filters and exponential backoff
//! - [`ClientConfig`]: Deserializable client settings
//! - [`FaultRuleConfig`]: Deserializable fault injection rules

mod retry;
mod settings;

pub use retry::{
    Decision, ExponentialBackoff, Filter, RetryPolicy, context_error_filter, defaults, execute,
    retry_all_filter, retryable_error_filter,
};
pub use settings::{ClientConfig, ConfigError, FaultOutcomeConfig, FaultRuleConfig, RetryConfig};
