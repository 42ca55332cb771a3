use async_trait::async_trait;
use feed_core::FeedError;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::trace;

/// One open live channel.
#[async_trait]
pub trait LiveSocket: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), FeedError>;

    /// Next text frame; `None` once the peer closed the channel.
    async fn next_text(&mut self) -> Option<Result<String, FeedError>>;

    /// Close the channel. Closing an already closed channel is a no-op.
    async fn close(&mut self);
}

/// Opens live channels.
#[async_trait]
pub trait LiveTransport: Send + Sync + 'static {
    type Socket: LiveSocket + 'static;

    async fn connect(&self, url: &str) -> Result<Self::Socket, FeedError>;
}

/// [`LiveTransport`] over WebSockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

/// WebSocket-backed [`LiveSocket`].
pub struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl LiveTransport for WebSocketTransport {
    type Socket = WebSocketChannel;

    async fn connect(&self, url: &str) -> Result<Self::Socket, FeedError> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|err| FeedError::channel(format!("connect to '{url}' failed: {err}")))?;
        trace!(status = %response.status(), "websocket handshake complete");
        Ok(WebSocketChannel {
            stream,
            closed: false,
        })
    }
}

#[async_trait]
impl LiveSocket for WebSocketChannel {
    async fn send_text(&mut self, text: String) -> Result<(), FeedError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|err| FeedError::channel(format!("send failed: {err}")))
    }

    async fn next_text(&mut self) -> Option<Result<String, FeedError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => {
                    trace!(?frame, "websocket closed by peer");
                    self.closed = true;
                    return None;
                }
                Ok(_) => continue,
                Err(err) => return Some(Err(FeedError::channel(err.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.stream.close(None).await {
            trace!(error = %err, "websocket close failed");
        }
    }
}
