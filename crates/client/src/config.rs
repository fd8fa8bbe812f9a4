//! Connection configuration.

use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use serde::Deserialize;

/// Configuration a socket is constructed with. Fixed for the socket's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Recorded for higher layers; sockets themselves never connect on construction.
    pub auto_connect: bool,
    /// Whether the driver re-establishes lost or failed links.
    pub reconnection: bool,
    /// Maximum number of reconnect attempts (0 = unlimited)
    pub reconnection_attempts: u32,
    /// Delay before the first reconnect attempt
    pub reconnection_delay: Duration,
    /// Upper bound for the backoff delay
    pub reconnection_delay_max: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Jitter band around each delay, in `[0, 1]`
    pub randomization_factor: f64,
    /// Handshake timeout for a single attempt
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            auto_connect: false,
            reconnection: true,
            reconnection_attempts: 5,
            reconnection_delay: Duration::from_millis(2000),
            reconnection_delay_max: Duration::from_millis(5000),
            backoff_multiplier: 2.0,
            randomization_factor: 0.5,
            timeout: Duration::from_millis(20_000),
        }
    }
}

impl ConnectionConfig {
    /// Defaults with `overrides` applied on top.
    pub fn merged(overrides: Option<&ConnectionOverrides>) -> Self {
        let mut config = Self::default();
        if let Some(overrides) = overrides {
            overrides.apply_to(&mut config);
        }
        config
    }

    /// Whether another reconnect attempt is allowed after `attempts_made` attempts.
    pub fn may_retry(&self, attempts_made: u32) -> bool {
        self.reconnection
            && (self.reconnection_attempts == 0 || attempts_made < self.reconnection_attempts)
    }

    /// Backoff delay for reconnect attempt `attempt` (1-based), before jitter.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.reconnection_delay.as_millis() as f64;
        let max = self.reconnection_delay_max.as_millis() as f64;
        let delay = (base * self.backoff_multiplier.powi(exponent)).min(max);
        Duration::from_millis(delay.max(0.0) as u64)
    }

    /// Backoff delay for reconnect attempt `attempt` (1-based) with jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt).as_millis() as f64;
        let factor = if self.randomization_factor.is_finite() {
            self.randomization_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if factor == 0.0 {
            return Duration::from_millis(base as u64);
        }
        let spread = base * factor;
        let jittered = base + rand::thread_rng().gen_range(-spread..=spread);
        let max = self.reconnection_delay_max.as_millis() as f64;
        Duration::from_millis(jittered.clamp(0.0, max) as u64)
    }
}

/// Per-socket overrides merged over [`ConnectionConfig::default`].
///
/// Deserializable so applications can keep these in their own config files.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionOverrides {
    pub auto_connect: Option<bool>,
    pub reconnection: Option<bool>,
    pub reconnection_attempts: Option<u32>,
    pub reconnection_delay_ms: Option<u64>,
    pub reconnection_delay_max_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub randomization_factor: Option<f64>,
    pub timeout_ms: Option<u64>,
}

impl ConnectionOverrides {
    /// Read overrides from `TETHER_*` environment variables.
    ///
    /// Environment variables:
    /// - `TETHER_RECONNECTION`: "true" | "false"
    /// - `TETHER_RECONNECTION_ATTEMPTS`: attempt budget, 0 for unlimited
    /// - `TETHER_RECONNECTION_DELAY_MS`: base backoff delay
    /// - `TETHER_RECONNECTION_DELAY_MAX_MS`: backoff ceiling
    /// - `TETHER_TIMEOUT_MS`: handshake timeout
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
        where
            T: std::str::FromStr,
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<T>()
                        .with_context(|| format!("invalid value '{}' for {}", raw, key))
                })
                .transpose()
        }

        Ok(Self {
            reconnection: parse(&lookup, "TETHER_RECONNECTION")?,
            reconnection_attempts: parse(&lookup, "TETHER_RECONNECTION_ATTEMPTS")?,
            reconnection_delay_ms: parse(&lookup, "TETHER_RECONNECTION_DELAY_MS")?,
            reconnection_delay_max_ms: parse(&lookup, "TETHER_RECONNECTION_DELAY_MAX_MS")?,
            timeout_ms: parse(&lookup, "TETHER_TIMEOUT_MS")?,
            ..Self::default()
        })
    }

    fn apply_to(&self, config: &mut ConnectionConfig) {
        if let Some(v) = self.auto_connect {
            config.auto_connect = v;
        }
        if let Some(v) = self.reconnection {
            config.reconnection = v;
        }
        if let Some(v) = self.reconnection_attempts {
            config.reconnection_attempts = v;
        }
        if let Some(v) = self.reconnection_delay_ms {
            config.reconnection_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.reconnection_delay_max_ms {
            config.reconnection_delay_max = Duration::from_millis(v);
        }
        if let Some(v) = self.backoff_multiplier {
            if v.is_finite() {
                config.backoff_multiplier = v;
            } else {
                crate::log_warn!("Ignoring non-finite backoff multiplier {}", v);
            }
        }
        if let Some(v) = self.randomization_factor {
            if v.is_finite() {
                config.randomization_factor = v;
            } else {
                crate::log_warn!("Ignoring non-finite randomization factor {}", v);
            }
        }
        if let Some(v) = self.timeout_ms {
            config.timeout = Duration::from_millis(v);
        }
    }
}
