//! One connection session to a touchpad server.
//!
//! A session is a single task owning the QUIC connection, the opening-token
//! handshake, the heartbeat loop, and the outbound writer. Being one task is
//! the concurrency design: every write — token, ping, batch, tune, goodbye —
//! happens inline in the task's select loop, so exactly one write is in
//! flight on the wire at any time and outbound batches keep submission
//! order. State transitions flow to the manager as one-way events, never as
//! callbacks.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use touchlink_protocol::{
    MessageReceiver, MessageSender, PadConnection, ProtocolError, QuicTransport,
};
use touchlink_types::{
    DeviceKey, Heartbeat, HeartbeatDirection, PadMessage, TouchBatch, TouchPoint, TuneSetting,
    CONTROL_TOKEN,
};
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::state::{CloseReason, SessionState};

/// Commands a session accepts from the manager.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// One normalized frame to transmit.
    Touches(Vec<TouchPoint>),
    /// Tune settings to forward verbatim.
    Tune(TuneSetting),
    /// Tear the session down.
    Disconnect,
}

/// One-way notifications from a session task to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    /// The session moved to a non-terminal state.
    StateChanged {
        device: DeviceKey,
        state: SessionState,
    },
    /// The session ended. Emitted exactly once.
    Closed {
        device: DeviceKey,
        reason: CloseReason,
    },
}

/// Manager-side handle to a running session task.
#[derive(Debug)]
pub(crate) struct SessionHandle {
    pub(crate) device: DeviceKey,
    /// Last state reported by the session; maintained by the manager from
    /// `StateChanged` events.
    pub(crate) state: SessionState,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Non-blocking send. Touch traffic is best-effort: a full queue means
    /// the batch is dropped, never buffered behind a stalled session.
    pub(crate) fn send(&self, cmd: SessionCommand) -> bool {
        self.commands.try_send(cmd).is_ok()
    }

    /// Request teardown. Guaranteed to reach the session as long as its task
    /// is alive, even if the command queue is momentarily full.
    pub(crate) fn disconnect(&self) {
        if self.commands.try_send(SessionCommand::Disconnect).is_err() {
            let commands = self.commands.clone();
            tokio::spawn(async move {
                let _ = commands.send(SessionCommand::Disconnect).await;
            });
        }
    }
}

/// An in-flight ping awaiting its pong.
#[derive(Debug, Clone, Copy)]
struct PendingPing {
    ping: Heartbeat,
    sent_at: Instant,
    deadline: Instant,
}

/// The session state machine. Owned and driven by its task; nothing outside
/// ever touches this struct.
pub(crate) struct ConnectionSession {
    device: DeviceKey,
    /// Local identity announced in the control request.
    device_name: String,
    cfg: SessionConfig,
    state: SessionState,
    heartbeat_seq: u64,
    batch_seq: u64,
    misses: u32,
    pending: Option<PendingPing>,
    events: mpsc::Sender<SessionEvent>,
}

impl ConnectionSession {
    /// Spawn the session task for `device`. The returned handle is the only
    /// way to reach the session.
    pub(crate) fn spawn(
        device: DeviceKey,
        device_name: String,
        cfg: SessionConfig,
        transport: QuicTransport,
        events: mpsc::Sender<SessionEvent>,
    ) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(256);
        let handle = SessionHandle {
            device: device.clone(),
            state: SessionState::Idle,
            commands: commands_tx,
        };
        let session = Self {
            device,
            device_name,
            cfg,
            state: SessionState::Idle,
            heartbeat_seq: 0,
            batch_seq: 0,
            misses: 0,
            pending: None,
            events,
        };
        tokio::spawn(session.run(transport, commands_rx));
        handle
    }

    async fn run(mut self, transport: QuicTransport, mut commands: mpsc::Receiver<SessionCommand>) {
        let reason = self.drive(&transport, &mut commands).await;
        self.state = SessionState::Closed;
        info!(device = %self.device, reason = %reason, "session closed");
        let _ = self
            .events
            .send(SessionEvent::Closed {
                device: self.device.clone(),
                reason,
            })
            .await;
    }

    /// Establish and hold the session; returns the terminal close reason.
    /// The connection is released on every exit path: either it was never
    /// established, or `close()` runs before we return.
    async fn drive(
        &mut self,
        transport: &QuicTransport,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> CloseReason {
        self.transition(SessionState::Connecting).await;

        let connect = time::timeout(
            self.cfg.connect_timeout(),
            transport.connect(self.device.socket_addr()),
        );
        tokio::pin!(connect);

        let conn = loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(SessionCommand::Disconnect) | None => return CloseReason::Disconnected,
                    Some(other) => trace!(?other, "dropping command while connecting"),
                },
                result = &mut connect => match result {
                    Err(_) => {
                        info!(device = %self.device, "connect timed out");
                        return CloseReason::Timeout;
                    }
                    Ok(Err(e)) => {
                        info!(device = %self.device, error = %e, "connect failed");
                        return CloseReason::Refused(e.to_string());
                    }
                    Ok(Ok(conn)) => break conn,
                },
            }
        };

        let reason = self.converse(&conn, commands).await;
        conn.close();
        reason
    }

    /// Handshake, then steady state.
    async fn converse(
        &mut self,
        conn: &PadConnection,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> CloseReason {
        self.transition(SessionState::Handshaking).await;

        let (mut tx, mut rx) = match conn.open_session_stream().await {
            Ok(pair) => pair,
            Err(e) => return CloseReason::Refused(e.to_string()),
        };

        let request = PadMessage::ControlRequest {
            token: CONTROL_TOKEN.to_string(),
            device_name: self.device_name.clone(),
        };
        if let Err(e) = tx.send(&request).await {
            return CloseReason::Refused(e.to_string());
        }

        // Acceptance by silence: only an explicit Reject inside the grace
        // window stops the session.
        let grace_end = Instant::now() + self.cfg.accept_grace();
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(SessionCommand::Disconnect) | None => return CloseReason::Disconnected,
                    Some(other) => trace!(?other, "dropping command while handshaking"),
                },
                () = time::sleep_until(grace_end) => break,
                msg = rx.recv::<PadMessage>() => match msg {
                    Ok(Some(PadMessage::Reject { reason })) => {
                        info!(device = %self.device, reason = %reason, "control request rejected");
                        return CloseReason::Rejected(reason);
                    }
                    Ok(Some(other)) => {
                        // Any other traffic means the server accepted us.
                        trace!(?other, "server traffic during grace window");
                        break;
                    }
                    Ok(None) => {
                        return CloseReason::Transport("stream closed during handshake".to_string());
                    }
                    Err(e) => return CloseReason::Transport(e.to_string()),
                },
            }
        }

        self.transition(SessionState::Active).await;
        info!(device = %self.device, "session active");

        self.steady_state(&mut tx, &mut rx, commands).await
    }

    /// Active/Degraded loop: heartbeats, inbound messages, outbound batches.
    async fn steady_state(
        &mut self,
        tx: &mut MessageSender,
        rx: &mut MessageReceiver,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> CloseReason {
        let mut ticker = time::interval_at(
            Instant::now() + self.cfg.heartbeat_interval(),
            self.cfg.heartbeat_interval(),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let pong_deadline = self.pending.as_ref().map(|p| p.deadline);
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(reason) = self.send_ping(tx).await {
                        return reason;
                    }
                }
                () = time::sleep_until(pong_deadline.unwrap_or_else(Instant::now)),
                        if pong_deadline.is_some() => {
                    if let Some(pending) = self.pending.take() {
                        debug!(device = %self.device, seq = pending.ping.seq, "pong window expired");
                    }
                    if let Some(reason) = self.record_miss().await {
                        return reason;
                    }
                }
                msg = rx.recv::<PadMessage>() => match msg {
                    Ok(Some(PadMessage::Heartbeat(hb)))
                            if hb.direction == HeartbeatDirection::Pong => {
                        if let Some(reason) = self.handle_pong(hb).await {
                            return reason;
                        }
                    }
                    Ok(Some(PadMessage::Bye)) => {
                        info!(device = %self.device, "server said goodbye");
                        return CloseReason::PeerClosed;
                    }
                    Ok(Some(other)) => trace!(?other, "ignoring unexpected server message"),
                    Ok(None) => return CloseReason::Transport("stream closed".to_string()),
                    Err(e) => return CloseReason::Transport(e.to_string()),
                },
                cmd = commands.recv() => match cmd {
                    Some(SessionCommand::Touches(points)) => {
                        if let Some(reason) = self.send_touches(tx, points).await {
                            return reason;
                        }
                    }
                    Some(SessionCommand::Tune(setting)) => {
                        if let Some(reason) = self.send_tune(tx, setting).await {
                            return reason;
                        }
                    }
                    Some(SessionCommand::Disconnect) | None => {
                        // Best effort; the peer learns either way when the
                        // connection closes.
                        let _ = tx.send(&PadMessage::Bye).await;
                        return CloseReason::Disconnected;
                    }
                },
            }
        }
    }

    /// Returns `Some(reason)` when the session must close.
    async fn send_ping(&mut self, tx: &mut MessageSender) -> Option<CloseReason> {
        // A ping still pending at the next tick is itself a miss.
        if self.pending.take().is_some() {
            if let Some(reason) = self.record_miss().await {
                return Some(reason);
            }
        }

        let ping = Heartbeat::ping(self.heartbeat_seq, now_ms());
        self.heartbeat_seq = self.heartbeat_seq.wrapping_add(1);
        let now = Instant::now();
        match tx.send(&PadMessage::Heartbeat(ping)).await {
            Ok(()) => {
                self.pending = Some(PendingPing {
                    ping,
                    sent_at: now,
                    deadline: now + self.cfg.pong_window(),
                });
                trace!(device = %self.device, seq = ping.seq, "ping");
                None
            }
            Err(e) => self.write_failed("heartbeat", &e).await,
        }
    }

    async fn send_touches(
        &mut self,
        tx: &mut MessageSender,
        points: Vec<TouchPoint>,
    ) -> Option<CloseReason> {
        if !self.state.accepts_touches() {
            trace!(device = %self.device, state = %self.state, "dropping touch batch");
            return None;
        }
        let batch = TouchBatch {
            seq: self.batch_seq,
            sent_at_ms: now_ms(),
            points,
        };
        self.batch_seq = self.batch_seq.wrapping_add(1);
        match tx.send(&PadMessage::Touch(batch)).await {
            Ok(()) => None,
            Err(e) => self.write_failed("touch batch", &e).await,
        }
    }

    async fn send_tune(
        &mut self,
        tx: &mut MessageSender,
        setting: TuneSetting,
    ) -> Option<CloseReason> {
        if !self.state.accepts_touches() {
            trace!(device = %self.device, state = %self.state, "dropping tune update");
            return None;
        }
        match tx.send(&PadMessage::Tune(setting)).await {
            Ok(()) => None,
            Err(e) => self.write_failed("tune update", &e).await,
        }
    }

    async fn handle_pong(&mut self, hb: Heartbeat) -> Option<CloseReason> {
        match self.pending {
            Some(pending) if hb.answers(&pending.ping) => {
                let rtt = pending.sent_at.elapsed();
                self.pending = None;
                self.misses = 0;
                debug!(
                    device = %self.device,
                    seq = hb.seq,
                    rtt_ms = u64::try_from(rtt.as_millis()).unwrap_or(u64::MAX),
                    "pong"
                );
                if self.state == SessionState::Degraded {
                    info!(device = %self.device, "link recovered");
                    self.transition(SessionState::Active).await;
                }
                None
            }
            Some(_) => {
                // Wrong cookie or sequence: a protocol error, counted as a
                // miss, never fatal on its own.
                warn!(device = %self.device, seq = hb.seq, "mismatched pong");
                self.pending = None;
                self.record_miss().await
            }
            None => {
                // Its miss was already counted when the window expired.
                trace!(device = %self.device, seq = hb.seq, "stray pong");
                None
            }
        }
    }

    /// One consecutive heartbeat miss. Degrades at the first threshold,
    /// closes at the second.
    async fn record_miss(&mut self) -> Option<CloseReason> {
        self.misses += 1;
        debug!(device = %self.device, misses = self.misses, "heartbeat miss");
        if self.misses >= self.cfg.closed_after_misses {
            warn!(device = %self.device, "heartbeat budget exhausted");
            return Some(CloseReason::HeartbeatTimeout);
        }
        if self.misses >= self.cfg.degraded_after_misses && self.state == SessionState::Active {
            self.transition(SessionState::Degraded).await;
        }
        None
    }

    /// A failed write degrades the session and burns one heartbeat miss, so
    /// persistent write failure exhausts the same bounded budget.
    async fn write_failed(&mut self, what: &str, error: &ProtocolError) -> Option<CloseReason> {
        warn!(device = %self.device, error = %error, "{what} write failed");
        self.pending = None;
        if self.state == SessionState::Active {
            self.transition(SessionState::Degraded).await;
        }
        self.record_miss().await
    }

    async fn transition(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!(device = %self.device, from = %self.state, to = %state, "state change");
        self.state = state;
        let _ = self
            .events
            .send(SessionEvent::StateChanged {
                device: self.device.clone(),
                state,
            })
            .await;
    }
}

/// Sender-local wall clock in milliseconds. Observability fields only.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
