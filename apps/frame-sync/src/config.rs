use std::env;
use std::time::Duration;

use clap::ValueEnum;
use frame_proto::DEFAULT_HEIGHT;
use thiserror::Error;

use crate::retry::{RetryPolicy, RetryStrategy};

pub const GUEST_URL_VAR: &str = "FRAME_SYNC_GUEST_URL";
pub const PINNED_HEIGHT_VAR: &str = "FRAME_SYNC_PINNED_HEIGHT";
pub const FALLBACK_HEIGHT_VAR: &str = "FRAME_SYNC_FALLBACK_HEIGHT";
pub const HOST_URL_VAR: &str = "FRAME_SYNC_HOST_URL";
pub const RETRY_VAR: &str = "FRAME_SYNC_RETRY";
pub const POLL_ATTEMPTS_VAR: &str = "FRAME_SYNC_POLL_ATTEMPTS";
pub const POLL_INTERVAL_VAR: &str = "FRAME_SYNC_POLL_INTERVAL_MS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Configuration for the embedding side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Full URL or bare origin of the embedded document.
    pub guest_url: String,
    /// Host-authoritative height; guest reports never override it.
    pub pinned_height: Option<u32>,
    /// Used until the guest reports, when no height is pinned.
    pub fallback_height: Option<u32>,
}

impl HostConfig {
    pub fn new(guest_url: impl Into<String>) -> Self {
        Self {
            guest_url: guest_url.into(),
            pinned_height: None,
            fallback_height: None,
        }
    }

    pub fn with_pinned_height(mut self, pixels: u32) -> Self {
        self.pinned_height = Some(pixels);
        self
    }

    pub fn with_fallback_height(mut self, pixels: u32) -> Self {
        self.fallback_height = Some(pixels);
        self
    }

    /// Height before any message is exchanged.
    pub fn initial_height(&self) -> u32 {
        self.pinned_height
            .or(self.fallback_height)
            .unwrap_or(DEFAULT_HEIGHT)
    }

    /// Load host configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            guest_url: required(GUEST_URL_VAR)?,
            pinned_height: parse_optional(PINNED_HEIGHT_VAR)?,
            fallback_height: parse_optional(FALLBACK_HEIGHT_VAR)?,
        })
    }
}

/// Configuration for the embedded side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestConfig {
    /// Full URL or bare origin of the embedding page.
    pub host_url: String,
}

impl GuestConfig {
    pub fn new(host_url: impl Into<String>) -> Self {
        Self {
            host_url: host_url.into(),
        }
    }

    /// Load guest configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host_url: required(HOST_URL_VAR)?,
        })
    }
}

/// Reads the retry strategy and its polling knobs. Unset variables fall back
/// to the event-driven strategy and the default polling schedule.
pub fn retry_policy_from_env() -> Result<RetryPolicy, ConfigError> {
    let strategy = match read(RETRY_VAR) {
        Some(value) => {
            RetryStrategy::from_str(&value, true).map_err(|reason| ConfigError::Invalid {
                var: RETRY_VAR,
                value,
                reason,
            })?
        }
        None => RetryStrategy::default(),
    };
    let attempts: u32 =
        parse_optional(POLL_ATTEMPTS_VAR)?.unwrap_or(RetryPolicy::DEFAULT_POLL_ATTEMPTS);
    if attempts == 0 {
        return Err(ConfigError::Invalid {
            var: POLL_ATTEMPTS_VAR,
            value: attempts.to_string(),
            reason: "at least one attempt is required".to_string(),
        });
    }
    let interval = parse_optional::<u64>(POLL_INTERVAL_VAR)?
        .map(Duration::from_millis)
        .unwrap_or(RetryPolicy::DEFAULT_POLL_INTERVAL);
    Ok(strategy.into_policy(attempts, interval))
}

fn read(var: &'static str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    read(var).ok_or(ConfigError::Missing(var))
}

fn parse_optional<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    read(var)
        .map(|value| {
            value.parse::<T>().map_err(|err| ConfigError::Invalid {
                var,
                reason: err.to_string(),
                value,
            })
        })
        .transpose()
}
