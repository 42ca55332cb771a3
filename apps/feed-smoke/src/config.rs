//! Environment-backed runtime configuration for `feed-smoke`.

use std::{env, error::Error, fmt, time::Duration};

use feed_core::{DEFAULT_PAGE_SIZE, FeedConfig, RetryPolicy};
use url::Url;

const DEFAULT_API_BASE: &str = "http://localhost:8000/api";
const DEFAULT_LIVE_URL: &str = "ws://localhost:8000/ws/notifications/";

/// Runtime configuration used by the smoke runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// Endpoints and tuning handed to the feed drivers.
    pub feed: FeedConfig,
    /// Ask the server to generate this many demo notifications on startup.
    pub seed_count: Option<u32>,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let api_base_url = optional_trimmed_env("NOTIFEED_API_BASE", &mut lookup)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_owned());
        let live_url = optional_trimmed_env("NOTIFEED_LIVE_URL", &mut lookup)
            .unwrap_or_else(|| DEFAULT_LIVE_URL.to_owned());
        check_url("NOTIFEED_API_BASE", &api_base_url, &["http", "https"])?;
        check_url("NOTIFEED_LIVE_URL", &live_url, &["ws", "wss"])?;

        let page_size = parse_optional::<u16, _>("NOTIFEED_PAGE_SIZE", &mut lookup)?
            .unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "NOTIFEED_PAGE_SIZE",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        let mut feed = FeedConfig::new(api_base_url, live_url);
        feed.page_size = page_size;

        if let Some(ms) = parse_optional::<u64, _>("NOTIFEED_HEARTBEAT_INTERVAL_MS", &mut lookup)? {
            if ms == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "NOTIFEED_HEARTBEAT_INTERVAL_MS",
                    value: "0".to_owned(),
                    reason: "must be greater than 0".to_owned(),
                });
            }
            feed.heartbeat_interval = Duration::from_millis(ms);
        }

        let base_ms = parse_optional::<u64, _>("NOTIFEED_RECONNECT_BASE_MS", &mut lookup)?
            .unwrap_or(feed.reconnect.base_delay_ms());
        let max_ms = parse_optional::<u64, _>("NOTIFEED_RECONNECT_MAX_MS", &mut lookup)?
            .unwrap_or(feed.reconnect.max_delay_ms());
        feed.reconnect = RetryPolicy::new(base_ms, max_ms);

        feed.request_timeout =
            parse_optional::<u64, _>("NOTIFEED_REQUEST_TIMEOUT_MS", &mut lookup)?
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis);

        let seed_count = parse_optional::<u32, _>("NOTIFEED_SEED_COUNT", &mut lookup)?
            .filter(|count| *count > 0);

        Ok(Self { feed, seed_count })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional<T, F>(key: &'static str, lookup: &mut F) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<T>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn check_url(key: &'static str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|err| ConfigError::InvalidValue {
        key,
        value: value.to_owned(),
        reason: err.to_string(),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
            reason: format!("scheme must be one of {}", schemes.join(", ")),
        });
    }
    Ok(())
}
