use std::{collections::VecDeque, future, sync::Arc, time::Duration};

use feed_core::{
    ConnectionCommand, ConnectionEffect, ConnectionEvent, ConnectionPhase,
    ConnectionStateMachine, EventStream, FeedChannelError, FeedChannels, FeedConfig, FeedError,
    FeedEvent, FeedStats, InboundMessage, decode_inbound, encode_outbound,
};
use tokio::{
    sync::{Mutex, broadcast, mpsc, watch},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::transport::{LiveSocket, LiveTransport};

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;

/// Handle to a running connection manager.
///
/// Cloning is cheap; every clone controls the same runtime task. Once the
/// last clone is dropped the runtime cancels any pending reconnect, closes
/// the live channel and exits, as `shutdown` does without waiting for it.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    channels: FeedChannels,
    phase_rx: watch::Receiver<ConnectionPhase>,
    stats_rx: watch::Receiver<Option<FeedStats>>,
    stop: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConnectionHandle {
    /// Subscribe to phase changes, stats snapshots and pushed notifications.
    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Current live channel phase.
    pub fn phase(&self) -> ConnectionPhase {
        *self.phase_rx.borrow()
    }

    /// Watch the live channel phase.
    pub fn watch_phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.phase_rx.clone()
    }

    /// Latest stats snapshot received over the live channel.
    pub fn stats(&self) -> Option<FeedStats> {
        *self.stats_rx.borrow()
    }

    /// Ask the server for a `stats_update`. Dropped while not connected.
    pub async fn refresh_stats(&self) -> Result<(), FeedChannelError> {
        self.channels
            .send_command(ConnectionCommand::RefreshStats)
            .await
    }

    /// Stop reconnecting, close the live channel and wait for the runtime to
    /// finish. Calling this more than once is a no-op.
    pub async fn shutdown(&self) {
        self.stop.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            warn!(error = %err, "connection runtime ended abnormally");
        }
    }
}

/// Start the connection manager on the current tokio runtime.
pub fn spawn_connection<T: LiveTransport>(config: &FeedConfig, transport: T) -> ConnectionHandle {
    let (channels, command_rx) = FeedChannels::new(COMMAND_BUFFER, EVENT_BUFFER);
    let (phase_tx, phase_rx) = watch::channel(ConnectionPhase::Disconnected);
    let (stats_tx, stats_rx) = watch::channel(None);
    let stop = CancellationToken::new();

    let driver = ConnectionDriver {
        transport,
        live_url: config.live_url.clone(),
        heartbeat_interval: config.heartbeat_interval,
        machine: ConnectionStateMachine::new(config.reconnect),
        socket: None,
        reconnect_at: None,
        events: channels.event_sender(),
        command_rx,
        phase_tx,
        stats_tx,
        stop: stop.child_token(),
    };
    let task = tokio::spawn(driver.run());

    ConnectionHandle {
        channels,
        phase_rx,
        stats_rx,
        stop,
        task: Arc::new(Mutex::new(Some(task))),
    }
}

enum Wake {
    Stop,
    Command(Option<ConnectionCommand>),
    Heartbeat,
    ReconnectDue,
    Frame(Option<Result<String, FeedError>>),
}

struct ConnectionDriver<T: LiveTransport> {
    transport: T,
    live_url: String,
    heartbeat_interval: Duration,
    machine: ConnectionStateMachine,
    socket: Option<T::Socket>,
    reconnect_at: Option<Instant>,
    events: broadcast::Sender<FeedEvent>,
    command_rx: mpsc::Receiver<ConnectionCommand>,
    phase_tx: watch::Sender<ConnectionPhase>,
    stats_tx: watch::Sender<Option<FeedStats>>,
    stop: CancellationToken,
}

impl<T: LiveTransport> ConnectionDriver<T> {
    async fn run(mut self) {
        let period = self.heartbeat_interval.max(Duration::from_millis(1));
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.handle(ConnectionEvent::Start).await;

        loop {
            let wake = tokio::select! {
                _ = self.stop.cancelled() => Wake::Stop,
                command = self.command_rx.recv() => Wake::Command(command),
                _ = heartbeat.tick() => Wake::Heartbeat,
                _ = sleep_until_due(self.reconnect_at) => Wake::ReconnectDue,
                frame = next_frame(&mut self.socket) => Wake::Frame(frame),
            };

            match wake {
                Wake::Stop | Wake::Command(None) => break,
                Wake::Command(Some(ConnectionCommand::RefreshStats)) => {
                    self.handle(ConnectionEvent::RefreshStatsRequested).await;
                }
                Wake::Heartbeat => self.handle(ConnectionEvent::HeartbeatTick).await,
                Wake::ReconnectDue => {
                    self.reconnect_at = None;
                    info!(
                        attempt = self.machine.reconnect_attempt(),
                        "reconnecting live channel"
                    );
                    self.handle(ConnectionEvent::ReconnectDue).await;
                }
                Wake::Frame(Some(Ok(text))) => self.dispatch(&text),
                Wake::Frame(Some(Err(err))) => {
                    warn!(error = %err, "live channel error");
                    self.discard_socket().await;
                    self.handle(ConnectionEvent::ChannelFailed).await;
                }
                Wake::Frame(None) => {
                    info!("live channel closed by peer");
                    self.socket = None;
                    self.handle(ConnectionEvent::ChannelClosed).await;
                }
            }
        }

        self.handle(ConnectionEvent::Shutdown).await;
        debug!("connection runtime stopped");
    }

    async fn handle(&mut self, event: ConnectionEvent) {
        let mut pending: VecDeque<ConnectionEffect> = self.machine.apply(event).into();
        while let Some(effect) = pending.pop_front() {
            if let Some(follow_up) = self.execute(effect).await {
                pending.extend(self.machine.apply(follow_up));
            }
        }
    }

    async fn execute(&mut self, effect: ConnectionEffect) -> Option<ConnectionEvent> {
        match effect {
            ConnectionEffect::OpenChannel => {
                let connected = tokio::select! {
                    _ = self.stop.cancelled() => return None,
                    result = self.transport.connect(&self.live_url) => result,
                };
                match connected {
                    Ok(socket) => {
                        self.socket = Some(socket);
                        Some(ConnectionEvent::ChannelOpened)
                    }
                    Err(err) => {
                        warn!(url = %self.live_url, error = %err, "live channel connect failed");
                        Some(ConnectionEvent::ChannelFailed)
                    }
                }
            }
            ConnectionEffect::ScheduleReconnect { attempt, delay } => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
                self.reconnect_at = Some(Instant::now() + delay);
                self.emit(FeedEvent::ReconnectScheduled {
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
                None
            }
            ConnectionEffect::CancelReconnect => {
                self.reconnect_at = None;
                None
            }
            ConnectionEffect::Send(message) => {
                let Some(socket) = self.socket.as_mut() else {
                    return None;
                };
                let text = match encode_outbound(message) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "dropping unencodable live message");
                        return None;
                    }
                };
                trace!(?message, "sending live message");
                match socket.send_text(text).await {
                    Ok(()) => None,
                    Err(err) => {
                        warn!(error = %err, "live channel send failed");
                        self.discard_socket().await;
                        Some(ConnectionEvent::ChannelFailed)
                    }
                }
            }
            ConnectionEffect::CloseChannel => {
                self.discard_socket().await;
                None
            }
            ConnectionEffect::PhaseChanged(phase) => {
                info!(?phase, "live channel phase changed");
                self.phase_tx.send_replace(phase);
                self.emit(FeedEvent::PhaseChanged { phase });
                None
            }
        }
    }

    fn dispatch(&mut self, text: &str) {
        match decode_inbound(text) {
            Ok(InboundMessage::NewNotification(notification)) => {
                debug!(id = %notification.id, "notification pushed");
                self.emit(FeedEvent::NotificationPushed(notification));
            }
            Ok(InboundMessage::Pong) => trace!("pong received"),
            Ok(InboundMessage::Unknown { kind }) => {
                debug!(%kind, "ignoring unknown live message type");
            }
            Ok(message) => {
                if let Some(stats) = message.stats() {
                    self.stats_tx.send_replace(Some(stats));
                    self.emit(FeedEvent::StatsUpdated(stats));
                }
            }
            Err(err) => warn!(error = %err, "dropping malformed live message"),
        }
    }

    fn emit(&self, event: FeedEvent) {
        let _ = self.events.send(event);
    }

    async fn discard_socket(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close().await;
        }
    }
}

async fn sleep_until_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn next_frame<S: LiveSocket>(socket: &mut Option<S>) -> Option<Result<String, FeedError>> {
    match socket {
        Some(socket) => socket.next_text().await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use feed_core::{NotificationId, RetryPolicy};
    use tokio::{sync::broadcast::error::RecvError, time::timeout};

    use super::*;
    use crate::test_support::FakeTransport;

    fn config(heartbeat: Duration) -> FeedConfig {
        FeedConfig {
            heartbeat_interval: heartbeat,
            reconnect: RetryPolicy::new(1_000, 30_000),
            ..FeedConfig::new("http://localhost/api", "ws://localhost/ws/notifications/")
        }
    }

    async fn next_event(events: &mut EventStream) -> FeedEvent {
        timeout(Duration::from_secs(120), events.recv())
            .await
            .expect("event timeout")
            .expect("event receive")
    }

    async fn wait_for_phase(events: &mut EventStream, wanted: ConnectionPhase) {
        loop {
            if let FeedEvent::PhaseChanged { phase } = next_event(events).await
                && phase == wanted
            {
                return;
            }
        }
    }

    async fn next_reconnect(events: &mut EventStream) -> (u32, u64) {
        loop {
            if let FeedEvent::ReconnectScheduled { attempt, delay_ms } = next_event(events).await {
                return (attempt, delay_ms);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_inbound_messages_by_type() {
        let transport = FakeTransport::default();
        let peer = transport.accept_next();
        let handle = spawn_connection(&config(Duration::from_secs(3_600)), transport);
        let mut events = handle.subscribe();

        wait_for_phase(&mut events, ConnectionPhase::Connected).await;
        peer.push(r#"{"type":"connection_established","stats":{"total":2,"read":1,"unread":1}}"#);
        peer.push("{not json");
        peer.push(r#"{"type":"pong"}"#);
        peer.push(r#"{"type":"mystery"}"#);
        peer.push(
            r#"{"type":"new_notification","notification":{"id":5,"title":"t","message":"m","timestamp":"2024-05-01T10:00:00Z","is_read":false}}"#,
        );
        peer.push(r#"{"type":"stats_update","stats":{"total":3,"read":1,"unread":2}}"#);

        let first = next_event(&mut events).await;
        assert_eq!(
            first,
            FeedEvent::StatsUpdated(FeedStats {
                total: 2,
                read: 1,
                unread: 1
            })
        );
        match next_event(&mut events).await {
            FeedEvent::NotificationPushed(notification) => {
                assert_eq!(notification.id, NotificationId::Number(5));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            next_event(&mut events).await,
            FeedEvent::StatsUpdated(stats) if stats.total == 3
        ));

        assert_eq!(handle.phase(), ConnectionPhase::Connected);
        assert_eq!(handle.stats().map(|s| s.unread), Some(2));
        assert_eq!(peer.closes.load(Ordering::SeqCst), 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sends_heartbeat_while_connected() {
        let transport = FakeTransport::default();
        let mut peer = transport.accept_next();
        let started = Instant::now();
        let handle = spawn_connection(&config(Duration::from_secs(30)), transport);

        let frame = timeout(Duration::from_secs(60), peer.outbound.recv())
            .await
            .expect("heartbeat timeout")
            .expect("heartbeat frame");

        assert_eq!(frame, r#"{"type":"ping"}"#);
        assert!(started.elapsed() >= Duration::from_secs(30));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_stats_is_sent_when_connected() {
        let transport = FakeTransport::default();
        let mut peer = transport.accept_next();
        let handle = spawn_connection(&config(Duration::from_secs(3_600)), transport);
        let mut phase = handle.watch_phase();
        phase
            .wait_for(|phase| *phase == ConnectionPhase::Connected)
            .await
            .expect("runtime should connect");

        handle
            .refresh_stats()
            .await
            .expect("command should enqueue");
        let frame = peer.outbound.recv().await.expect("refresh frame");
        assert_eq!(frame, r#"{"type":"refresh_stats"}"#);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_exponential_backoff() {
        let transport = FakeTransport::default();
        let peer = transport.accept_next();
        let handle = spawn_connection(&config(Duration::from_secs(3_600)), transport.clone());
        let mut events = handle.subscribe();
        wait_for_phase(&mut events, ConnectionPhase::Connected).await;

        drop(peer);
        assert_eq!(next_reconnect(&mut events).await, (0, 1_000));
        assert_eq!(next_reconnect(&mut events).await, (1, 2_000));
        assert_eq!(next_reconnect(&mut events).await, (2, 4_000));

        let peer = transport.accept_next();
        wait_for_phase(&mut events, ConnectionPhase::Connected).await;
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);

        drop(peer);
        assert_eq!(next_reconnect(&mut events).await, (0, 1_000));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn channel_errors_close_the_socket_and_reconnect() {
        let transport = FakeTransport::default();
        let peer = transport.accept_next();
        let handle = spawn_connection(&config(Duration::from_secs(3_600)), transport);
        let mut events = handle.subscribe();
        wait_for_phase(&mut events, ConnectionPhase::Connected).await;

        peer.inbound
            .send(Err(FeedError::channel("reset by peer")))
            .expect("driver should hold the socket");

        wait_for_phase(&mut events, ConnectionPhase::Disconnected).await;
        assert_eq!(next_reconnect(&mut events).await, (0, 1_000));
        assert_eq!(peer.closes.load(Ordering::SeqCst), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_channel_exactly_once() {
        let transport = FakeTransport::default();
        let peer = transport.accept_next();
        let handle = spawn_connection(&config(Duration::from_secs(3_600)), transport.clone());
        let mut phase = handle.watch_phase();
        phase
            .wait_for(|phase| *phase == ConnectionPhase::Connected)
            .await
            .expect("runtime should connect");

        handle.shutdown().await;
        handle.shutdown().await;

        assert_eq!(peer.closes.load(Ordering::SeqCst), 1);
        assert_eq!(handle.phase(), ConnectionPhase::Disconnected);
        let err = handle
            .refresh_stats()
            .await
            .expect_err("runtime is gone");
        assert!(matches!(err, FeedChannelError::CommandChannelClosed));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_reconnect() {
        let transport = FakeTransport::default();
        let handle = spawn_connection(&config(Duration::from_secs(3_600)), transport.clone());
        let mut events = handle.subscribe();

        let (attempt, delay_ms) = next_reconnect(&mut events).await;
        assert_eq!((attempt, delay_ms), (0, 1_000));

        handle.shutdown().await;
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(handle.phase(), ConnectionPhase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_stops_reconnecting() {
        let transport = FakeTransport::default();
        let handle = spawn_connection(&config(Duration::from_secs(3_600)), transport.clone());
        let mut events = handle.subscribe();
        assert_eq!(next_reconnect(&mut events).await, (0, 1_000));

        drop(handle);
        loop {
            match timeout(Duration::from_secs(120), events.recv())
                .await
                .expect("runtime should exit once the handle is gone")
            {
                Err(RecvError::Closed) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            }
        }

        time::sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    }
}
