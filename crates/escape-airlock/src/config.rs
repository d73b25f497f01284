// ABOUTME: Channel client configuration
// ABOUTME: Ship address, credentials, and stream tuning with serde defaults

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::AirlockError;

/// Unacknowledged events tolerated before an ack is sent.
pub const DEFAULT_ACK_THRESHOLD: u64 = 20;

/// Consecutive stream errors that make the channel fatal.
pub const DEFAULT_MAX_STREAM_ERRORS: u32 = 4;

/// Base delay of the reconnect backoff, doubled per consecutive error.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 750;

/// Configuration for an [`Airlock`](crate::Airlock) channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AirlockConfig {
    /// Ship URL with scheme and port (e.g., "http://localhost:8080")
    pub base_url: String,
    /// Ship name without the leading `~`, used as the default poke/subscribe target
    pub ship: String,
    /// Desk threads run from when a request doesn't name one
    pub desk: Option<String>,
    /// Session cookie from a prior login, attached to every request
    pub cookie: Option<String>,
    pub ack_threshold: u64,
    pub max_stream_errors: u32,
    pub retry_base_delay_ms: u64,
    /// Timeout for one-shot requests (writes, scries, threads). The event stream has none.
    pub request_timeout_secs: u64,
}

impl Default for AirlockConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            ship: String::new(),
            desk: None,
            cookie: None,
            ack_threshold: DEFAULT_ACK_THRESHOLD,
            max_stream_errors: DEFAULT_MAX_STREAM_ERRORS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            request_timeout_secs: 30,
        }
    }
}

impl AirlockConfig {
    /// Create a config for `ship` served at `base_url`.
    pub fn new(base_url: impl Into<String>, ship: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            ship: ship.into().trim().trim_start_matches('~').to_string(),
            ..Self::default()
        }
    }

    pub fn with_desk(mut self, desk: impl Into<String>) -> Self {
        self.desk = Some(desk.into());
        self
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn with_ack_threshold(mut self, threshold: u64) -> Self {
        self.ack_threshold = threshold;
        self
    }

    pub fn with_max_stream_errors(mut self, max: u32) -> Self {
        self.max_stream_errors = max;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Backoff before reconnect attempt `attempt` (1-based): base · 2^(attempt−1).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_base_delay() * 2u32.pow(exponent)
    }

    /// Check the fields a channel cannot work without.
    pub fn validate(&self) -> Result<(), AirlockError> {
        if self.base_url.is_empty() {
            return Err(AirlockError::Config("base_url is empty".into()));
        }
        url::Url::parse(&self.base_url)?;
        if self.ship.is_empty() {
            return Err(AirlockError::Config("ship is empty".into()));
        }
        if self.max_stream_errors == 0 {
            return Err(AirlockError::Config(
                "max_stream_errors must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
