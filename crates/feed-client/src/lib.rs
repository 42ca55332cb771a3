//! Async drivers for the notification feed.
//!
//! [`HttpNotificationApi`] talks to the REST endpoints, [`spawn_connection`]
//! runs the live channel (reconnects, heartbeat, stats), and
//! [`NotificationFeed`] keeps a [`feed_core::ListSynchronizer`] in step with
//! both.

pub mod api;
pub mod connection;
pub mod feed;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use api::{HttpNotificationApi, NotificationApi};
pub use connection::{ConnectionHandle, spawn_connection};
pub use feed::NotificationFeed;
pub use transport::{LiveSocket, LiveTransport, WebSocketChannel, WebSocketTransport};
