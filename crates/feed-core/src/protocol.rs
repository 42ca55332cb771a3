use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{FeedError, FeedErrorCategory},
    types::{FeedStats, Notification},
};

/// Message received over the live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Greeting sent once the channel opens; may carry initial stats.
    ConnectionEstablished { stats: Option<FeedStats> },
    /// Stats changed on the server.
    StatsUpdate { stats: Option<FeedStats> },
    /// A notification was created on the server.
    NewNotification(Notification),
    /// Heartbeat reply.
    Pong,
    /// Any other `type`; ignored by consumers.
    Unknown { kind: String },
}

impl InboundMessage {
    /// Stats snapshot carried by this message, if any.
    pub fn stats(&self) -> Option<FeedStats> {
        match self {
            Self::ConnectionEstablished { stats } | Self::StatsUpdate { stats } => *stats,
            _ => None,
        }
    }
}

/// Message sent over the live channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Heartbeat.
    Ping,
    /// Ask the server to push a `stats_update`.
    RefreshStats,
}

#[derive(Deserialize)]
struct StatsBody {
    #[serde(default)]
    stats: Option<FeedStats>,
}

#[derive(Deserialize)]
struct NotificationBody {
    notification: Notification,
}

/// Decode one text frame from the live channel.
pub fn decode_inbound(text: &str) -> Result<InboundMessage, FeedError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| FeedError::parse(format!("invalid live message: {err}")))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| FeedError::parse("live message has no 'type' field"))?
        .to_owned();

    match kind.as_str() {
        "connection_established" => {
            let body: StatsBody = from_body(&kind, value)?;
            Ok(InboundMessage::ConnectionEstablished { stats: body.stats })
        }
        "stats_update" => {
            let body: StatsBody = from_body(&kind, value)?;
            Ok(InboundMessage::StatsUpdate { stats: body.stats })
        }
        "new_notification" => {
            let body: NotificationBody = from_body(&kind, value)?;
            Ok(InboundMessage::NewNotification(body.notification))
        }
        "pong" => Ok(InboundMessage::Pong),
        _ => Ok(InboundMessage::Unknown { kind }),
    }
}

/// Encode an outbound message as a text frame.
pub fn encode_outbound(message: OutboundMessage) -> Result<String, FeedError> {
    serde_json::to_string(&message).map_err(|err| {
        FeedError::new(
            FeedErrorCategory::Internal,
            "encode_failed",
            format!("cannot encode {message:?}: {err}"),
        )
    })
}

fn from_body<T>(kind: &str, value: Value) -> Result<T, FeedError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(value)
        .map_err(|err| FeedError::parse(format!("malformed '{kind}' message: {err}")))
}
