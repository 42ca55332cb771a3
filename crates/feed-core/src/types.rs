use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::retry::RetryPolicy;

/// Page size requested from the list endpoint unless configured otherwise.
pub const DEFAULT_PAGE_SIZE: u16 = 50;
/// Server-side ordering used for every page request (newest first).
pub const DEFAULT_ORDERING: &str = "-timestamp";
/// Interval between `ping` frames while the live channel is open.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Opaque notification identifier.
///
/// The remote API is free to use integer primary keys or string IDs, so both
/// JSON shapes are accepted and re-serialized in their original form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationId {
    /// Numeric identifier, e.g. a database primary key.
    Number(u64),
    /// Textual identifier, e.g. a UUID.
    Text(String),
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

impl From<u64> for NotificationId {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for NotificationId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for NotificationId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A single notification as served by the list endpoint and the live channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    /// Stable identifier shared by fetched and pushed copies.
    pub id: NotificationId,
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Creation instant; the server orders pages by this, newest first.
    pub timestamp: DateTime<Utc>,
    /// Whether the notification has been marked as read.
    pub is_read: bool,
}

/// Read/unread counters pushed over the live channel or fetched on demand.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FeedStats {
    /// All notifications known to the server.
    pub total: u64,
    /// Notifications already marked as read.
    pub read: u64,
    /// Notifications not yet read.
    pub unread: u64,
}

/// Read-state filter applied to the list endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    /// No read-state filtering.
    #[default]
    All,
    /// Only unread notifications.
    Unread,
    /// Only read notifications.
    Read,
}

impl StatusFilter {
    /// Query-string value, or `None` when the filter must be omitted.
    pub fn as_query_value(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Unread => Some("unread"),
            Self::Read => Some("read"),
        }
    }
}

/// Parameters of one list-endpoint request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// 1-based page number.
    pub page: u32,
    /// Requested page size.
    pub limit: u16,
    /// Read-state filter.
    pub status: StatusFilter,
    /// Free-text search term; empty means no search.
    pub search: String,
    /// Server ordering expression.
    pub ordering: &'static str,
}

impl ListQuery {
    /// Encode the query as key/value pairs, omitting empty search and `all` status.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page", self.page.to_string()),
            ("limit", self.limit.to_string()),
        ];
        if !self.search.is_empty() {
            pairs.push(("search", self.search.clone()));
        }
        if let Some(status) = self.status.as_query_value() {
            pairs.push(("status", status.to_owned()));
        }
        pairs.push(("ordering", self.ordering.to_owned()));
        pairs
    }
}

/// One page returned by the list endpoint.
///
/// Pagination hints vary between server versions, so every indicator is
/// optional and resolved by the list synchronizer in a fixed precedence order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NotificationPage {
    /// Page items in server order.
    #[serde(default, alias = "results")]
    pub notifications: Vec<Notification>,
    /// Page number echoed by the server.
    #[serde(default)]
    pub page: Option<u32>,
    /// Total number of pages for the current query.
    #[serde(default, rename = "totalPages", alias = "total_pages")]
    pub total_pages: Option<u32>,
    /// Total number of matching notifications.
    #[serde(default)]
    pub count: Option<u64>,
    /// Explicit "more pages follow" flag.
    #[serde(default, rename = "hasMore", alias = "has_more")]
    pub has_more: Option<bool>,
    /// Link to the next page. Outer `None` means the field was absent,
    /// `Some(None)` means it was present and `null`.
    #[serde(default, deserialize_with = "present_or_null")]
    pub next: Option<Option<String>>,
}

fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Lifecycle phase of the live channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// No channel is open; initial state and the state after any close.
    #[default]
    Disconnected,
    /// A channel is being opened.
    Connecting,
    /// The channel is open and receiving.
    Connected,
}

/// Commands accepted by the connection runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionCommand {
    /// Ask the server to push a fresh stats snapshot.
    RefreshStats,
}

/// Events published by the connection runtime to its subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FeedEvent {
    /// Live channel phase transition.
    PhaseChanged {
        /// New phase.
        phase: ConnectionPhase,
    },
    /// Stats snapshot from `connection_established` or `stats_update`.
    StatsUpdated(FeedStats),
    /// Server-initiated notification from `new_notification`.
    NotificationPushed(Notification),
    /// A reconnect has been scheduled after a channel loss.
    ReconnectScheduled {
        /// Zero-based attempt number used for the delay.
        attempt: u32,
        /// Delay before the reconnect fires.
        delay_ms: u64,
    },
}

/// Client configuration injected into the API client, live runtime and feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    /// Base URL of the REST API, for example `http://localhost:8000/api`.
    pub api_base_url: String,
    /// Live channel URL, for example `ws://localhost:8000/ws/notifications/`.
    pub live_url: String,
    /// Page size used for list requests (`>= 1`).
    pub page_size: u16,
    /// Heartbeat period while connected.
    pub heartbeat_interval: Duration,
    /// Reconnect backoff schedule.
    pub reconnect: RetryPolicy,
    /// Optional per-request timeout for API calls.
    ///
    /// `None` leaves timeouts to the underlying transport.
    pub request_timeout: Option<Duration>,
}

impl FeedConfig {
    /// Build a configuration with default tuning for the given endpoints.
    pub fn new(api_base_url: impl Into<String>, live_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            live_url: live_url.into(),
            page_size: DEFAULT_PAGE_SIZE,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect: RetryPolicy::default(),
            request_timeout: None,
        }
    }
}
