//! Session orchestration and the UI-facing command/event surface.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use touchlink_discovery::{Candidate, DirectoryStatus, DiscoveryDirectory};
use touchlink_input::FrameNormalizer;
use touchlink_protocol::QuicTransport;
use touchlink_types::{DeviceKey, RawContact, TouchPoint, TuneSetting};
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::ClientError;
use crate::session::{ConnectionSession, SessionCommand, SessionEvent, SessionHandle};
use crate::state::{CloseReason, SessionState};

/// Commands the UI layer feeds into the manager.
#[derive(Debug)]
pub enum ManagerCommand {
    /// Begin discovery; `None` uses the configured service type.
    StartDiscovery { service_type: Option<String> },
    StopDiscovery,
    /// Connect to a discovered candidate (or keep its live session).
    SelectDevice(Candidate),
    /// Disconnect and discard the device's session.
    DeselectDevice(DeviceKey),
    /// One raw multi-touch frame from the platform input API.
    SubmitTouchFrame(Vec<RawContact>),
    /// Platform-level gesture cancellation.
    CancelTouches,
    /// Forward tune settings to active sessions.
    UpdateTune(TuneSetting),
    Shutdown,
}

/// Notifications the manager emits toward the UI layer.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A session changed state.
    SessionState {
        device: DeviceKey,
        state: SessionState,
    },
    /// A session ended; emitted exactly once per session. `message` is the
    /// user-visible string mapped from the reason.
    SessionClosed {
        device: DeviceKey,
        reason: CloseReason,
        message: &'static str,
    },
    /// Discovery could not start.
    SearchFailed { reason: String },
}

/// Orchestrates zero or more sessions driven by user selection and
/// discovery updates.
///
/// The manager is the sole owner of which sessions exist and of the frame
/// normalizer; the UI layer talks to it exclusively through
/// [`ManagerCommand`] and observes it through [`Notification`] and the
/// directory's watch channel. A failure in one session never touches
/// another's state machine.
pub struct SessionManager {
    config: Config,
    transport: QuicTransport,
    directory: DiscoveryDirectory,
    normalizer: FrameNormalizer,
    sessions: HashMap<DeviceKey, SessionHandle>,
    commands_tx: mpsc::Sender<ManagerCommand>,
    commands_rx: mpsc::Receiver<ManagerCommand>,
    session_events_tx: mpsc::Sender<SessionEvent>,
    session_events_rx: mpsc::Receiver<SessionEvent>,
    notifications_tx: mpsc::Sender<Notification>,
}

impl SessionManager {
    /// Build a manager. Returns it together with the notification stream
    /// for the UI layer.
    pub fn new(
        config: Config,
        transport: QuicTransport,
        directory: DiscoveryDirectory,
    ) -> (Self, mpsc::Receiver<Notification>) {
        let (commands_tx, commands_rx) = mpsc::channel(256);
        let (session_events_tx, session_events_rx) = mpsc::channel(256);
        let (notifications_tx, notifications_rx) = mpsc::channel(1024);
        let manager = Self {
            config,
            transport,
            directory,
            normalizer: FrameNormalizer::new(),
            sessions: HashMap::new(),
            commands_tx,
            commands_rx,
            session_events_tx,
            session_events_rx,
            notifications_tx,
        };
        (manager, notifications_rx)
    }

    /// Sender for feeding commands into [`run`](Self::run).
    pub fn command_sender(&self) -> mpsc::Sender<ManagerCommand> {
        self.commands_tx.clone()
    }

    /// Observe the candidate set and searching state.
    pub fn directory_status(&self) -> watch::Receiver<DirectoryStatus> {
        self.directory.status_receiver()
    }

    /// Run the manager loop until `Shutdown` (or until every command sender
    /// is dropped).
    pub async fn run(&mut self) -> Result<(), ClientError> {
        info!("session manager running");
        loop {
            tokio::select! {
                cmd = self.commands_rx.recv() => match cmd {
                    Some(ManagerCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(event) = self.session_events_rx.recv() => {
                    self.handle_session_event(event).await;
                }
            }
        }
        self.shutdown().await;
        Ok(())
    }

    async fn handle_command(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::StartDiscovery { service_type } => {
                let ty =
                    service_type.unwrap_or_else(|| self.config.discovery.service_type.clone());
                if let Err(e) = self.directory.start(&ty).await {
                    warn!(error = %e, "discovery start failed");
                    self.notify(Notification::SearchFailed {
                        reason: e.to_string(),
                    })
                    .await;
                }
            }
            ManagerCommand::StopDiscovery => self.directory.stop().await,
            ManagerCommand::SelectDevice(candidate) => self.select_device(&candidate),
            ManagerCommand::DeselectDevice(key) => self.deselect_device(&key),
            ManagerCommand::SubmitTouchFrame(contacts) => {
                let points = self.normalizer.advance(&contacts);
                self.broadcast_points(&points);
            }
            ManagerCommand::CancelTouches => {
                let points = self.normalizer.cancel();
                self.broadcast_points(&points);
            }
            ManagerCommand::UpdateTune(setting) => {
                for handle in self
                    .sessions
                    .values()
                    .filter(|h| h.state.accepts_touches())
                {
                    if !handle.send(SessionCommand::Tune(setting)) {
                        trace!(device = %handle.device, "dropping tune update for busy session");
                    }
                }
            }
            // Handled by the run loop.
            ManagerCommand::Shutdown => {}
        }
    }

    fn select_device(&mut self, candidate: &Candidate) {
        let key = candidate.device_key();
        if let Some(existing) = self.sessions.get(&key) {
            if !existing.state.is_terminal() {
                debug!(device = %key, "device already selected");
                return;
            }
        }
        info!(device = %key, "selecting device");
        let handle = ConnectionSession::spawn(
            key.clone(),
            self.config.identity.name.clone(),
            self.config.session.clone(),
            self.transport.clone(),
            self.session_events_tx.clone(),
        );
        self.sessions.insert(key, handle);
    }

    fn deselect_device(&mut self, key: &DeviceKey) {
        if let Some(handle) = self.sessions.get(key) {
            info!(device = %key, "deselecting device");
            handle.disconnect();
            // The entry is discarded when the session reports Closed.
        } else {
            debug!(device = %key, "deselect for unknown device");
        }
    }

    /// Forward one frame's batch to every Active session, non-blocking.
    /// Sessions in other states — and sessions with a full queue — drop the
    /// batch: stale touch data is worthless, so nothing is ever buffered for
    /// later delivery.
    fn broadcast_points(&self, points: &[TouchPoint]) {
        if points.is_empty() {
            return;
        }
        for handle in self.sessions.values() {
            if !handle.state.accepts_touches() {
                trace!(device = %handle.device, state = %handle.state, "dropping batch for inactive session");
                continue;
            }
            if !handle.send(SessionCommand::Touches(points.to_vec())) {
                trace!(device = %handle.device, "dropping batch for busy session");
            }
        }
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged { device, state } => {
                if let Some(handle) = self.sessions.get_mut(&device) {
                    handle.state = state;
                }
                self.notify(Notification::SessionState { device, state })
                    .await;
            }
            SessionEvent::Closed { device, reason } => {
                self.sessions.remove(&device);
                let message = reason.user_facing();
                self.notify(Notification::SessionClosed {
                    device,
                    reason,
                    message,
                })
                .await;
            }
        }
    }

    async fn notify(&self, notification: Notification) {
        if self.notifications_tx.send(notification).await.is_err() {
            trace!("notification receiver dropped");
        }
    }

    async fn shutdown(&mut self) {
        info!("session manager shutting down");
        self.directory.stop().await;
        for handle in self.sessions.values() {
            handle.disconnect();
        }
        // Drain closure events so every session ends before we return.
        while !self.sessions.is_empty() {
            match tokio::time::timeout(Duration::from_secs(2), self.session_events_rx.recv()).await
            {
                Ok(Some(event)) => self.handle_session_event(event).await,
                Ok(None) | Err(_) => break,
            }
        }
        info!("session manager shut down");
    }
}
