use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::{
    error::{FeedError, FeedErrorCategory},
    types::{ConnectionCommand, FeedEvent},
};

/// Broadcast event stream type used by feed subscribers.
pub type EventStream = broadcast::Receiver<FeedEvent>;

/// Errors returned by feed channel operations.
#[derive(Debug, Error)]
pub enum FeedChannelError {
    /// The connection runtime stopped receiving commands.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

impl From<FeedChannelError> for FeedError {
    fn from(err: FeedChannelError) -> Self {
        FeedError::new(FeedErrorCategory::Internal, "runtime_gone", err.to_string())
    }
}

/// Command/event channel pair shared by the connection runtime and its
/// subscribers.
#[derive(Clone, Debug)]
pub struct FeedChannels {
    command_tx: mpsc::Sender<ConnectionCommand>,
    event_tx: broadcast::Sender<FeedEvent>,
}

impl FeedChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<ConnectionCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Subscribe to emitted feed events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Sender half of the event stream, for producers that must not keep the
    /// command channel open.
    pub fn event_sender(&self) -> broadcast::Sender<FeedEvent> {
        self.event_tx.clone()
    }

    /// Send one command to the runtime.
    pub async fn send_command(&self, command: ConnectionCommand) -> Result<(), FeedChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| FeedChannelError::CommandChannelClosed)
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: FeedEvent) {
        let _ = self.event_tx.send(event);
    }
}
