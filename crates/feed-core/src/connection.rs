use std::time::Duration;

use crate::{protocol::OutboundMessage, retry::RetryPolicy, types::ConnectionPhase};

/// Input to the live channel state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Manager start.
    Start,
    /// A previously scheduled reconnect timer fired.
    ReconnectDue,
    /// The transport reported the channel open.
    ChannelOpened,
    /// The transport reported the channel closed.
    ChannelClosed,
    /// The transport reported an error (including a failed connect).
    ChannelFailed,
    /// Periodic heartbeat timer fired.
    HeartbeatTick,
    /// A consumer asked for a stats refresh.
    RefreshStatsRequested,
    /// Manager teardown.
    Shutdown,
}

/// Side effect requested by a transition; executed by the runtime driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEffect {
    /// Open a new channel.
    OpenChannel,
    /// Arm the reconnect timer.
    ScheduleReconnect { attempt: u32, delay: Duration },
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Send a frame on the open channel.
    Send(OutboundMessage),
    /// Close the current channel.
    CloseChannel,
    /// Report a phase change to subscribers.
    PhaseChanged(ConnectionPhase),
}

/// Reconnect waiting for its timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReconnect {
    /// Attempt number the delay was computed from.
    pub attempt: u32,
    /// Delay the timer was armed with.
    pub delay: Duration,
}

/// Live channel lifecycle: connect, heartbeat gating, reconnect with backoff.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    phase: ConnectionPhase,
    reconnect_attempt: u32,
    pending_reconnect: Option<PendingReconnect>,
    policy: RetryPolicy,
    shut_down: bool,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl ConnectionStateMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            reconnect_attempt: 0,
            pending_reconnect: None,
            policy,
            shut_down: false,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    pub fn pending_reconnect(&self) -> Option<PendingReconnect> {
        self.pending_reconnect
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn apply(&mut self, event: ConnectionEvent) -> Vec<ConnectionEffect> {
        use ConnectionEvent::*;

        if self.shut_down {
            return Vec::new();
        }

        match event {
            Start => {
                if self.phase != ConnectionPhase::Disconnected || self.pending_reconnect.is_some()
                {
                    return Vec::new();
                }
                self.begin_connect()
            }
            ReconnectDue => {
                if self.pending_reconnect.take().is_none() {
                    return Vec::new();
                }
                self.begin_connect()
            }
            ChannelOpened => {
                if self.phase != ConnectionPhase::Connecting {
                    return Vec::new();
                }
                self.reconnect_attempt = 0;
                self.transition(ConnectionPhase::Connected)
            }
            ChannelClosed | ChannelFailed => {
                if self.phase == ConnectionPhase::Disconnected {
                    return Vec::new();
                }
                let mut effects = self.transition(ConnectionPhase::Disconnected);
                effects.push(self.schedule_reconnect());
                effects
            }
            HeartbeatTick => self.send_if_connected(OutboundMessage::Ping),
            RefreshStatsRequested => self.send_if_connected(OutboundMessage::RefreshStats),
            Shutdown => self.shutdown(),
        }
    }

    fn begin_connect(&mut self) -> Vec<ConnectionEffect> {
        let mut effects = self.transition(ConnectionPhase::Connecting);
        effects.push(ConnectionEffect::OpenChannel);
        effects
    }

    fn schedule_reconnect(&mut self) -> ConnectionEffect {
        let attempt = self.reconnect_attempt;
        let delay = self.policy.delay_for_attempt(attempt);
        self.reconnect_attempt = attempt.saturating_add(1);
        self.pending_reconnect = Some(PendingReconnect { attempt, delay });
        ConnectionEffect::ScheduleReconnect { attempt, delay }
    }

    fn send_if_connected(&self, message: OutboundMessage) -> Vec<ConnectionEffect> {
        if self.phase == ConnectionPhase::Connected {
            vec![ConnectionEffect::Send(message)]
        } else {
            Vec::new()
        }
    }

    fn shutdown(&mut self) -> Vec<ConnectionEffect> {
        self.shut_down = true;
        let mut effects = Vec::new();
        if self.pending_reconnect.take().is_some() {
            effects.push(ConnectionEffect::CancelReconnect);
        }
        if self.phase != ConnectionPhase::Disconnected {
            effects.push(ConnectionEffect::CloseChannel);
            effects.extend(self.transition(ConnectionPhase::Disconnected));
        }
        effects
    }

    fn transition(&mut self, next: ConnectionPhase) -> Vec<ConnectionEffect> {
        if self.phase == next {
            return Vec::new();
        }
        self.phase = next;
        vec![ConnectionEffect::PhaseChanged(next)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> ConnectionStateMachine {
        let mut sm = ConnectionStateMachine::default();
        sm.apply(ConnectionEvent::Start);
        sm.apply(ConnectionEvent::ChannelOpened);
        sm
    }

    fn scheduled_delay(effects: &[ConnectionEffect]) -> Option<Duration> {
        effects.iter().find_map(|effect| match effect {
            ConnectionEffect::ScheduleReconnect { delay, .. } => Some(*delay),
            _ => None,
        })
    }

    #[test]
    fn runs_happy_path_transitions() {
        let mut sm = ConnectionStateMachine::default();
        assert_eq!(sm.phase(), ConnectionPhase::Disconnected);

        let effects = sm.apply(ConnectionEvent::Start);
        assert_eq!(
            effects,
            vec![
                ConnectionEffect::PhaseChanged(ConnectionPhase::Connecting),
                ConnectionEffect::OpenChannel,
            ]
        );

        let effects = sm.apply(ConnectionEvent::ChannelOpened);
        assert_eq!(
            effects,
            vec![ConnectionEffect::PhaseChanged(ConnectionPhase::Connected)]
        );
        assert_eq!(sm.phase(), ConnectionPhase::Connected);
    }

    #[test]
    fn start_is_ignored_unless_disconnected() {
        let mut sm = connected();
        assert!(sm.apply(ConnectionEvent::Start).is_empty());
        assert_eq!(sm.phase(), ConnectionPhase::Connected);
    }

    #[test]
    fn backs_off_exponentially_and_resets_after_connect() {
        let mut sm = connected();

        let mut delays = Vec::new();
        for _ in 0..3 {
            let effects = sm.apply(ConnectionEvent::ChannelClosed);
            delays.push(scheduled_delay(&effects).expect("close should schedule reconnect"));
            sm.apply(ConnectionEvent::ReconnectDue);
            assert_eq!(sm.phase(), ConnectionPhase::Connecting);
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1_000),
                Duration::from_millis(2_000),
                Duration::from_millis(4_000),
            ]
        );

        sm.apply(ConnectionEvent::ChannelOpened);
        assert_eq!(sm.reconnect_attempt(), 0);
        let effects = sm.apply(ConnectionEvent::ChannelClosed);
        assert_eq!(scheduled_delay(&effects), Some(Duration::from_millis(1_000)));
    }

    #[test]
    fn failed_connect_attempts_keep_backing_off() {
        let mut sm = ConnectionStateMachine::default();
        sm.apply(ConnectionEvent::Start);

        let first = sm.apply(ConnectionEvent::ChannelFailed);
        assert_eq!(scheduled_delay(&first), Some(Duration::from_millis(1_000)));
        sm.apply(ConnectionEvent::ReconnectDue);
        let second = sm.apply(ConnectionEvent::ChannelFailed);
        assert_eq!(scheduled_delay(&second), Some(Duration::from_millis(2_000)));
        assert_eq!(sm.reconnect_attempt(), 2);
    }

    #[test]
    fn error_followed_by_close_schedules_once() {
        let mut sm = connected();
        let on_error = sm.apply(ConnectionEvent::ChannelFailed);
        let on_close = sm.apply(ConnectionEvent::ChannelClosed);

        assert!(scheduled_delay(&on_error).is_some());
        assert!(on_close.is_empty());
        assert_eq!(sm.reconnect_attempt(), 1);
    }

    #[test]
    fn delays_cap_at_thirty_seconds() {
        let mut sm = ConnectionStateMachine::default();
        sm.apply(ConnectionEvent::Start);

        let mut delays = Vec::new();
        for _ in 0..10 {
            delays.extend(scheduled_delay(&sm.apply(ConnectionEvent::ChannelFailed)));
            sm.apply(ConnectionEvent::ReconnectDue);
        }
        assert_eq!(delays.len(), 10);
        assert_eq!(delays[4], Duration::from_millis(16_000));
        assert_eq!(delays[9], Duration::from_millis(30_000));
    }

    #[test]
    fn reconnect_due_without_pending_timer_is_ignored() {
        let mut sm = ConnectionStateMachine::default();
        assert!(sm.apply(ConnectionEvent::ReconnectDue).is_empty());
        assert_eq!(sm.phase(), ConnectionPhase::Disconnected);
    }

    #[test]
    fn heartbeat_and_refresh_only_send_while_connected() {
        let mut sm = ConnectionStateMachine::default();
        assert!(sm.apply(ConnectionEvent::HeartbeatTick).is_empty());
        assert!(sm.apply(ConnectionEvent::RefreshStatsRequested).is_empty());

        sm.apply(ConnectionEvent::Start);
        assert!(sm.apply(ConnectionEvent::HeartbeatTick).is_empty());

        sm.apply(ConnectionEvent::ChannelOpened);
        assert_eq!(
            sm.apply(ConnectionEvent::HeartbeatTick),
            vec![ConnectionEffect::Send(OutboundMessage::Ping)]
        );
        assert_eq!(
            sm.apply(ConnectionEvent::RefreshStatsRequested),
            vec![ConnectionEffect::Send(OutboundMessage::RefreshStats)]
        );
    }

    #[test]
    fn shutdown_closes_once_and_cancels_pending_reconnect() {
        let mut sm = connected();
        let effects = sm.apply(ConnectionEvent::Shutdown);
        assert_eq!(
            effects,
            vec![
                ConnectionEffect::CloseChannel,
                ConnectionEffect::PhaseChanged(ConnectionPhase::Disconnected),
            ]
        );
        assert!(sm.apply(ConnectionEvent::Shutdown).is_empty());
        assert!(sm.apply(ConnectionEvent::Start).is_empty());

        let mut waiting = connected();
        waiting.apply(ConnectionEvent::ChannelClosed);
        assert!(waiting.pending_reconnect().is_some());
        assert_eq!(
            waiting.apply(ConnectionEvent::Shutdown),
            vec![ConnectionEffect::CancelReconnect]
        );
        assert!(waiting.pending_reconnect().is_none());
        assert!(waiting.apply(ConnectionEvent::ReconnectDue).is_empty());
    }
}
