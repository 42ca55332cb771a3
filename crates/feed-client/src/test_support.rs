//! In-memory live channel used by the runtime and feed tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use feed_core::FeedError;
use tokio::sync::mpsc;

use crate::transport::{LiveSocket, LiveTransport};

pub(crate) struct FakeSocket {
    inbound: mpsc::UnboundedReceiver<Result<String, FeedError>>,
    outbound: mpsc::UnboundedSender<String>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl LiveSocket for FakeSocket {
    async fn send_text(&mut self, text: String) -> Result<(), FeedError> {
        self.outbound
            .send(text)
            .map_err(|_| FeedError::channel("peer gone"))
    }

    async fn next_text(&mut self) -> Option<Result<String, FeedError>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Test side of a fake socket. Dropping it closes the channel.
pub(crate) struct Peer {
    pub(crate) inbound: mpsc::UnboundedSender<Result<String, FeedError>>,
    pub(crate) outbound: mpsc::UnboundedReceiver<String>,
    pub(crate) closes: Arc<AtomicUsize>,
}

impl Peer {
    pub(crate) fn push(&self, text: &str) {
        self.inbound
            .send(Ok(text.to_owned()))
            .expect("driver should hold the socket");
    }
}

fn socket_pair() -> (FakeSocket, Peer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let closes = Arc::new(AtomicUsize::new(0));
    (
        FakeSocket {
            inbound: inbound_rx,
            outbound: outbound_tx,
            closes: Arc::clone(&closes),
        },
        Peer {
            inbound: inbound_tx,
            outbound: outbound_rx,
            closes,
        },
    )
}

/// Hands out scripted sockets; refuses connections when the script is empty.
#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    sockets: Arc<Mutex<VecDeque<FakeSocket>>>,
    pub(crate) attempts: Arc<AtomicUsize>,
}

impl FakeTransport {
    /// Queue one socket for the next connect and return its peer side.
    pub(crate) fn accept_next(&self) -> Peer {
        let (socket, peer) = socket_pair();
        self.sockets
            .lock()
            .expect("script lock")
            .push_back(socket);
        peer
    }
}

#[async_trait]
impl LiveTransport for FakeTransport {
    type Socket = FakeSocket;

    async fn connect(&self, _url: &str) -> Result<Self::Socket, FeedError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.sockets
            .lock()
            .expect("script lock")
            .pop_front()
            .ok_or_else(|| FeedError::channel("connection refused"))
    }
}
