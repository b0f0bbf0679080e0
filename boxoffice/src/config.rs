//! Engine configuration.
//!
//! Values are validated when they are constructed, so an [`EngineConfig`]
//! that exists is always usable. [`EngineConfig::from_env`] reads the
//! `BOXOFFICE_*` variables on top of the defaults.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Probability in the range [0.0, 1.0].
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct Probability(f64);

impl Probability {
    /// Always happens.
    pub fn always() -> Self {
        Self::try_new(1.0).expect("1.0 is a valid probability")
    }

    /// Never happens.
    pub fn never() -> Self {
        Self::try_new(0.0).expect("0.0 is a valid probability")
    }
}

/// A configuration value could not be used.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held something unparseable or out of range.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name, e.g. `BOXOFFICE_MAX_RETRIES`.
        key: &'static str,
        /// Raw text that was rejected.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Inclusive window of simulated gateway latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLatencyWindow")]
pub struct LatencyWindow {
    min_ms: u64,
    max_ms: u64,
}

#[derive(Deserialize)]
struct RawLatencyWindow {
    min_ms: u64,
    max_ms: u64,
}

impl TryFrom<RawLatencyWindow> for LatencyWindow {
    type Error = String;

    fn try_from(raw: RawLatencyWindow) -> Result<Self, Self::Error> {
        Self::new(raw.min_ms, raw.max_ms).ok_or_else(|| {
            format!(
                "latency minimum {} exceeds maximum {}",
                raw.min_ms, raw.max_ms
            )
        })
    }
}

impl LatencyWindow {
    /// Returns `None` when `min_ms > max_ms`.
    pub const fn new(min_ms: u64, max_ms: u64) -> Option<Self> {
        if min_ms > max_ms {
            None
        } else {
            Some(Self { min_ms, max_ms })
        }
    }

    /// No simulated latency at all.
    pub const fn instant() -> Self {
        Self {
            min_ms: 0,
            max_ms: 0,
        }
    }

    /// Shortest delay, in milliseconds.
    pub const fn min_ms(&self) -> u64 {
        self.min_ms
    }

    /// Longest delay, in milliseconds.
    pub const fn max_ms(&self) -> u64 {
        self.max_ms
    }

    /// Parses `"100-500"` or a single `"250"`.
    fn parse(key: &'static str, value: &str) -> Result<Self, ConfigError> {
        let parse_ms = |part: &str| {
            part.trim()
                .parse::<u64>()
                .map_err(|error| ConfigError::invalid(key, value, error.to_string()))
        };

        let (min_ms, max_ms) = match value.split_once('-') {
            Some((min, max)) => (parse_ms(min)?, parse_ms(max)?),
            None => {
                let fixed = parse_ms(value)?;
                (fixed, fixed)
            }
        };

        Self::new(min_ms, max_ms)
            .ok_or_else(|| ConfigError::invalid(key, value, "minimum exceeds maximum"))
    }
}

/// Behaviour of the simulated payment gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Share of charges approved.
    pub charge_success_rate: Probability,
    /// Delay applied to every charge.
    pub charge_latency: LatencyWindow,
    /// Share of refunds approved.
    pub refund_success_rate: Probability,
    /// Delay applied to every refund.
    pub refund_latency: LatencyWindow,
    /// Fixes the gateway's random draws when set.
    pub seed: Option<u64>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            charge_success_rate: Probability::try_new(0.90).expect("0.90 is a valid probability"),
            charge_latency: LatencyWindow {
                min_ms: 100,
                max_ms: 500,
            },
            refund_success_rate: Probability::try_new(0.95).expect("0.95 is a valid probability"),
            refund_latency: LatencyWindow {
                min_ms: 100,
                max_ms: 300,
            },
            seed: None,
        }
    }
}

impl GatewayConfig {
    /// Zero-latency gateway with the given success rates.
    pub const fn instant(charge_success_rate: Probability, refund_success_rate: Probability) -> Self {
        Self {
            charge_success_rate,
            charge_latency: LatencyWindow::instant(),
            refund_success_rate,
            refund_latency: LatencyWindow::instant(),
            seed: None,
        }
    }

    /// Makes approvals and delays reproducible.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Retry behaviour for transient storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles each attempt.
    pub base_delay_ms: u64,
    /// Backoff ceiling.
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 1_000,
        }
    }
}

/// Top-level engine configuration.
///
/// # Example
///
/// ```
/// use boxoffice::EngineConfig;
///
/// let config = EngineConfig::from_lookup(|key| match key {
///     "BOXOFFICE_MAX_RETRIES" => Some("5".to_string()),
///     _ => None,
/// })
/// .unwrap();
/// assert_eq!(config.retry.max_retries, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Simulated gateway behaviour.
    pub gateway: GatewayConfig,
    /// Executor retry behaviour.
    pub retry: RetrySettings,
    /// How long a unit of work may wait for a row lock. `None` waits forever.
    pub lock_timeout_ms: Option<u64>,
}

impl EngineConfig {
    /// [`lock_timeout_ms`](Self::lock_timeout_ms) as a duration.
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    /// Defaults overridden by `BOXOFFICE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("BOXOFFICE_CHARGE_SUCCESS_RATE") {
            config.gateway.charge_success_rate =
                parse_probability("BOXOFFICE_CHARGE_SUCCESS_RATE", &value)?;
        }
        if let Some(value) = lookup("BOXOFFICE_REFUND_SUCCESS_RATE") {
            config.gateway.refund_success_rate =
                parse_probability("BOXOFFICE_REFUND_SUCCESS_RATE", &value)?;
        }
        if let Some(value) = lookup("BOXOFFICE_CHARGE_LATENCY_MS") {
            config.gateway.charge_latency =
                LatencyWindow::parse("BOXOFFICE_CHARGE_LATENCY_MS", &value)?;
        }
        if let Some(value) = lookup("BOXOFFICE_REFUND_LATENCY_MS") {
            config.gateway.refund_latency =
                LatencyWindow::parse("BOXOFFICE_REFUND_LATENCY_MS", &value)?;
        }
        if let Some(value) = lookup("BOXOFFICE_GATEWAY_SEED") {
            config.gateway.seed = Some(parse_number("BOXOFFICE_GATEWAY_SEED", &value)?);
        }
        if let Some(value) = lookup("BOXOFFICE_MAX_RETRIES") {
            config.retry.max_retries = parse_number("BOXOFFICE_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("BOXOFFICE_LOCK_TIMEOUT_MS") {
            config.lock_timeout_ms = Some(parse_number("BOXOFFICE_LOCK_TIMEOUT_MS", &value)?);
        }

        Ok(config)
    }
}

fn parse_probability(key: &'static str, value: &str) -> Result<Probability, ConfigError> {
    let raw: f64 = value
        .trim()
        .parse()
        .map_err(|error: std::num::ParseFloatError| {
            ConfigError::invalid(key, value, error.to_string())
        })?;
    Probability::try_new(raw).map_err(|error| ConfigError::invalid(key, value, error.to_string()))
}

fn parse_number<N>(key: &'static str, value: &str) -> Result<N, ConfigError>
where
    N: std::str::FromStr,
    N::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|error: N::Err| ConfigError::invalid(key, value, error.to_string()))
}
