use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad failure category; decides how the failure is recovered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FeedErrorCategory {
    /// List or stats request failed; state is left as-is and the error surfaced.
    Fetch,
    /// A mark-read or bulk mutation was rejected; local state is not mutated.
    Mutation,
    /// Malformed payload on the live channel or in a response body.
    Parse,
    /// Live channel error or close; always answered with a reconnect.
    Channel,
    /// Invalid configuration.
    Config,
    /// Internal invariant break, for example a runtime task that went away.
    Internal,
}

/// Stable error payload shared by the API client, live runtime and feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct FeedError {
    /// High-level error category.
    pub category: FeedErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// HTTP status when the failure came from an API response.
    pub status: Option<u16>,
}

impl FeedError {
    /// Construct a new error.
    pub fn new(
        category: FeedErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Build an error for a non-success HTTP response.
    pub fn http(category: FeedErrorCategory, status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::new(category, classify_http_status(status), message)
        }
    }

    /// Build a parse error for a malformed payload.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(FeedErrorCategory::Parse, "parse_failed", message)
    }

    /// Build a live channel error.
    pub fn channel(message: impl Into<String>) -> Self {
        Self::new(FeedErrorCategory::Channel, "channel_failed", message)
    }
}

/// Map HTTP status codes to stable error codes.
pub fn classify_http_status(status: u16) -> &'static str {
    match status {
        401 | 403 => "unauthorized",
        408 | 429 => "rate_limited",
        400..=499 => "client_error",
        500..=599 => "server_error",
        _ => "http_error",
    }
}
