//! Core notification feed contract shared by the async drivers and frontends.
//!
//! This crate holds the pure parts of the feed: the list synchronizer that
//! reconciles fetched pages with pushed notifications and confirmed
//! mutations, the live channel state machine, the wire protocol, and common
//! error/channel abstractions. Nothing here performs I/O.

/// Async command/event channel primitives.
pub mod channel;
/// Live channel lifecycle state machine.
pub mod connection;
/// Stable feed error types and HTTP classification helpers.
pub mod error;
/// Notification list reconciliation.
pub mod list;
/// Live channel wire messages.
pub mod protocol;
/// Backoff policy used for reconnects.
pub mod retry;
/// Bulk-action selection helper.
pub mod selection;
/// Shared data types (notifications, pages, events, configuration).
pub mod types;

pub use channel::{EventStream, FeedChannelError, FeedChannels};
pub use connection::{ConnectionEffect, ConnectionEvent, ConnectionStateMachine, PendingReconnect};
pub use error::{FeedError, FeedErrorCategory, classify_http_status};
pub use list::{DisplayState, ListSnapshot, ListSynchronizer, PageKind, PageOutcome, PageRequest};
pub use protocol::{InboundMessage, OutboundMessage, decode_inbound, encode_outbound};
pub use retry::RetryPolicy;
pub use selection::SelectionSet;
pub use types::{
    ConnectionCommand, ConnectionPhase, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_ORDERING,
    DEFAULT_PAGE_SIZE, FeedConfig, FeedEvent, FeedStats, ListQuery, Notification,
    NotificationId, NotificationPage, StatusFilter,
};
