//! Deserializable client settings.
//!
//! Durations are written as integer milliseconds. Every field has a default,
//! so an empty document yields a single-attempt client with no fault rules.

use std::time::Duration;

use rpcweave_core::ApplicationException;
use serde::Deserialize;

use super::retry::{RetryPolicy, defaults};
use crate::fault::{FaultOutcome, FaultRule, HeaderCondition};
use crate::interceptor::UnaryResponse;
use crate::{ClientError, ContextError};

/// Errors raised while turning settings into runtime types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid retry settings: {0}")]
    Retry(&'static str),

    #[error("fault rule percentage {0} is above 100")]
    Percentage(u8),

    #[error("fault rule has an empty address")]
    EmptyAddress,
}

/// Settings for one client.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Slug of the remote service, used in metric labels and span names.
    pub slug: String,
    /// Address of the remote service. Fault injection is disabled without it.
    pub address: Option<String>,
    /// Name sent as the user agent of every call.
    pub client_name: Option<String>,
    pub retry: RetryConfig,
    pub faults: Vec<FaultRuleConfig>,
}

impl ClientConfig {
    /// Convert every fault rule, failing on the first invalid one.
    pub fn fault_rules(&self) -> Result<Vec<FaultRule>, ConfigError> {
        self.faults.iter().cloned().map(FaultRuleConfig::into_rule).collect()
    }
}

/// Retry settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: defaults::ATTEMPTS,
            base_delay_ms: defaults::BASE_DELAY.as_millis() as u64,
            max_delay_ms: defaults::MAX_DELAY.as_millis() as u64,
            multiplier: defaults::MULTIPLIER,
            jitter: defaults::JITTER,
        }
    }
}

impl RetryConfig {
    /// Build a validated policy. Filters are not configurable here; only the
    /// default filters apply.
    pub fn to_policy(&self) -> Result<RetryPolicy, ConfigError> {
        let policy = RetryPolicy::new()
            .attempts(self.attempts)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .multiplier(self.multiplier)
            .jitter(self.jitter);
        policy.validate().map_err(ConfigError::Retry)?;
        Ok(policy)
    }
}

/// The outcome a configured fault rule forces.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultOutcomeConfig {
    /// The remote service answers with an application exception.
    Exception {
        code: i32,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        type_name: Option<String>,
        #[serde(default)]
        retryable: Option<bool>,
    },
    /// The transport fails.
    Transport {
        message: String,
        #[serde(default)]
        retryable: Option<bool>,
    },
    PoolExhausted,
    DeadlineExceeded,
}

impl From<FaultOutcomeConfig> for FaultOutcome {
    fn from(config: FaultOutcomeConfig) -> Self {
        match config {
            FaultOutcomeConfig::Exception {
                code,
                message,
                type_name,
                retryable,
            } => {
                let mut exception = match type_name {
                    Some(type_name) => ApplicationException::of_type(type_name),
                    None => ApplicationException::new(code, ""),
                };
                exception.code = Some(code);
                exception.message = message;
                exception.retryable = retryable;
                FaultOutcome::Response(UnaryResponse::with_exception(exception))
            }
            FaultOutcomeConfig::Transport { message, retryable } => {
                FaultOutcome::Error(ClientError::Transport { message, retryable })
            }
            FaultOutcomeConfig::PoolExhausted => FaultOutcome::Error(ClientError::PoolExhausted),
            FaultOutcomeConfig::DeadlineExceeded => {
                FaultOutcome::Error(ContextError::DeadlineExceeded.into())
            }
        }
    }
}

fn default_percentage() -> u8 {
    100
}

/// A fault rule as written in configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct FaultRuleConfig {
    pub address: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub header: Option<HeaderCondition>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default = "default_percentage")]
    pub percentage: u8,
    pub outcome: FaultOutcomeConfig,
}

impl FaultRuleConfig {
    pub fn into_rule(self) -> Result<FaultRule, ConfigError> {
        if self.address.is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        if self.percentage > 100 {
            return Err(ConfigError::Percentage(self.percentage));
        }
        Ok(FaultRule {
            address: self.address,
            host_pattern: self.host,
            method_pattern: self.method,
            header: self.header,
            delay: self.delay_ms.map(Duration::from_millis),
            percentage: self.percentage,
            outcome: self.outcome.into(),
        })
    }
}
