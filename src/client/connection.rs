//! # Connection Manager
//!
//! Keeps one client connected to the relay and puts it back in its room
//! after a drop.
//!
//! ## States:
//! ```text
//! disconnected ─connect─▶ connecting ─ok─▶ connected
//!                              │               │ abnormal loss
//!                              │ fail          ▼
//!                              └──────▶ reconnecting ─attempt > max─▶ failed
//! ```
//!
//! ## Loss handling:
//! - **Server close**: reconnect immediately, attempt counter untouched
//! - **Abnormal loss / failed connect**: attempt += 1, then wait
//!   `min(base * 2^attempt, max)` or give up with `ConnectionFailed`
//! - **Network recovered / retry**: skip the remaining wait; out of
//!   `failed` the counter starts over
//! - **Leave while offline**: the wait ends, state goes to `disconnected`
//!   and nothing reconnects until `retry` or `network_recovered`
//!
//! ## Single task:
//! The manager is one async task with at most one pending timer. All
//! control arrives through [`ConnectionHandle`] as commands, so leave and
//! shutdown cancel a pending reconnect simply by ending the wait.

use crate::audio::pipeline::FrameSink;
use crate::client::membership::{Membership, MembershipStore};
use crate::client::transport::{ClientMessage, Connector, Link, LinkEvent};
use crate::config::ReconnectConfig;
use crate::error::{AppError, AppResult};
use crate::protocol::events::{ClientEvent, ServerEvent};
use crate::protocol::wire::AudioFrame;
use crate::room::transmission::Transmission;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 256;
const INBOUND_BUFFER: usize = 256;

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

/// Backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 5,
            connect_timeout: Duration::from_millis(10_000),
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
            connect_timeout: config.connect_timeout(),
        }
    }
}

impl ReconnectPolicy {
    /// Wait before reconnect attempt `attempt` (1-based), or `None` once the cap is passed.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

/// Something the relay delivered, or a terminal failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(ServerEvent),
    Audio(AudioFrame),
    Failed(AppError),
}

#[derive(Debug)]
enum Command {
    Send(ClientMessage),
    NetworkRecovered,
    Retry,
    LeaveRoom,
    Shutdown,
}

enum Next {
    Connect,
    Wait(Duration),
    Idle,
    Stop,
}

/// Cheap, cloneable control surface for the manager task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    state: watch::Receiver<ConnectionState>,
    commands: mpsc::Sender<Command>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Stream of state transitions, starting with the current state.
    pub fn state_changes(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.state.clone())
    }

    /// Resolve once the state satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl Fn(ConnectionState) -> bool) -> AppResult<ConnectionState> {
        let mut state = self.state.clone();
        loop {
            let current = *state.borrow_and_update();
            if predicate(current) {
                return Ok(current);
            }
            state
                .changed()
                .await
                .map_err(|_| AppError::Internal("Connection manager stopped".to_string()))?;
        }
    }

    /// Send a control event. Fails unless connected.
    pub fn send(&self, event: ClientEvent) -> AppResult<()> {
        self.send_message(ClientMessage::Event(event))
    }

    /// Send one live audio frame. Fails unless connected.
    pub fn send_audio(&self, frame: AudioFrame) -> AppResult<()> {
        self.send_message(ClientMessage::Audio(frame))
    }

    /// Upload a finished transmission to the room log.
    pub fn upload(&self, room_code: &str, transmission: Transmission) -> AppResult<()> {
        let meta = transmission.meta(room_code);
        self.send_message(ClientMessage::Upload {
            meta,
            payload: transmission.payload,
        })
    }

    pub fn network_recovered(&self) -> AppResult<()> {
        self.command(Command::NetworkRecovered)
    }

    pub fn retry(&self) -> AppResult<()> {
        self.command(Command::Retry)
    }

    /// Leave the room and forget the membership. While offline this also
    /// cancels the pending reconnect and parks the manager in `disconnected`.
    pub fn leave_room(&self) -> AppResult<()> {
        self.command(Command::LeaveRoom)
    }

    pub fn shutdown(&self) -> AppResult<()> {
        self.command(Command::Shutdown)
    }

    fn send_message(&self, message: ClientMessage) -> AppResult<()> {
        if !self.is_connected() {
            return Err(AppError::NotConnected);
        }
        self.command(Command::Send(message))
    }

    fn command(&self, command: Command) -> AppResult<()> {
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => AppError::Internal("Outbound queue full".to_string()),
            mpsc::error::TrySendError::Closed(_) => AppError::NotConnected,
        })
    }
}

impl FrameSink for ConnectionHandle {
    fn send_frame(&self, frame: AudioFrame) -> AppResult<()> {
        self.send_audio(frame)
    }
}

/// The reconnecting client connection.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::Receiver<Command>,
    inbound: mpsc::Sender<Inbound>,
    membership: Option<Membership>,
    store: Option<MembershipStore>,
    attempt: u32,
}

impl<C: Connector> ConnectionManager<C> {
    /// Build a manager, its handle and the inbound stream. Spawn [`run`](Self::run) to start.
    pub fn new(
        connector: C,
        policy: ReconnectPolicy,
        store: Option<MembershipStore>,
    ) -> (Self, ConnectionHandle, mpsc::Receiver<Inbound>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let membership = store.as_ref().and_then(MembershipStore::load_or_forget);

        let manager = Self {
            connector,
            policy,
            state: state_tx,
            commands: command_rx,
            inbound: inbound_tx,
            membership,
            store,
            attempt: 0,
        };
        let handle = ConnectionHandle {
            state: state_rx,
            commands: command_tx,
        };
        (manager, handle, inbound_rx)
    }

    /// Drive the connection until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        let mut next = Next::Connect;
        loop {
            next = match next {
                Next::Connect => self.connect().await,
                Next::Wait(delay) => self.wait(delay).await,
                Next::Idle => self.idle().await,
                Next::Stop => break,
            };
        }
        self.set_state(ConnectionState::Disconnected);
        info!("Connection manager stopped");
    }

    async fn connect(&mut self) -> Next {
        self.set_state(if self.attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting { attempt: self.attempt }
        });

        let attempt = tokio::time::timeout(self.policy.connect_timeout, self.connector.connect());
        let result = tokio::select! {
            result = attempt => result,
            command = self.commands.recv() => {
                match command {
                    Some(command) => {
                        if let Some(next) = self.offline_command(command) {
                            return next;
                        }
                    }
                    None => return Next::Stop,
                }
                // Command handled; start this attempt over
                return Next::Connect;
            }
        };

        match result {
            Ok(Ok(link)) => {
                info!(attempt = self.attempt, "Connected to relay");
                self.attempt = 0;
                self.set_state(ConnectionState::Connected);
                self.serve(link).await
            }
            Ok(Err(e)) => {
                warn!(error = %e, attempt = self.attempt, "Connect failed");
                self.backoff().await
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.policy.connect_timeout.as_millis() as u64,
                    "Connect timed out"
                );
                self.backoff().await
            }
        }
    }

    async fn serve(&mut self, mut link: Link) -> Next {
        if let Some(membership) = &self.membership {
            debug!(room = %membership.room_code, role = ?membership.role, "Resuming membership");
            let resume = ClientMessage::Event(membership.resume_event());
            if link.outbound.send(resume).await.is_err() {
                return self.backoff().await;
            }
        }

        loop {
            tokio::select! {
                event = link.inbound.recv() => match event {
                    Some(LinkEvent::Event(event)) => {
                        self.track_membership(&event);
                        if self.inbound.send(Inbound::Event(event)).await.is_err() {
                            return Next::Stop;
                        }
                    }
                    Some(LinkEvent::Audio(frame)) => {
                        // Live audio is loss-tolerant
                        let _ = self.inbound.try_send(Inbound::Audio(frame));
                    }
                    Some(LinkEvent::ServerClosed) => {
                        info!("Server closed the connection, reconnecting now");
                        self.set_state(ConnectionState::Disconnected);
                        return Next::Connect;
                    }
                    Some(LinkEvent::Lost(reason)) => {
                        warn!(reason = %reason, "Connection lost");
                        return self.backoff().await;
                    }
                    None => {
                        warn!("Connection lost");
                        return self.backoff().await;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(message)) => {
                        if link.outbound.send(message).await.is_err() {
                            return self.backoff().await;
                        }
                    }
                    Some(Command::LeaveRoom) => {
                        self.forget_membership();
                        let _ = link.outbound.send(ClientMessage::Event(ClientEvent::LeaveRoom)).await;
                    }
                    Some(Command::NetworkRecovered) | Some(Command::Retry) => {}
                    Some(Command::Shutdown) | None => return Next::Stop,
                },
            }
        }
    }

    async fn backoff(&mut self) -> Next {
        self.attempt += 1;
        match self.policy.delay_for(self.attempt) {
            Some(delay) => {
                debug!(attempt = self.attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
                Next::Wait(delay)
            }
            None => {
                let err = AppError::ConnectionFailed(format!(
                    "gave up after {} reconnect attempts",
                    self.policy.max_attempts
                ));
                warn!(error = %err, "Reconnect attempts exhausted");
                self.set_state(ConnectionState::Failed);
                let _ = self.inbound.send(Inbound::Failed(err)).await;
                Next::Idle
            }
        }
    }

    async fn wait(&mut self, delay: Duration) -> Next {
        self.set_state(ConnectionState::Reconnecting { attempt: self.attempt });
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Next::Connect,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Some(next) = self.offline_command(command) {
                            return next;
                        }
                    }
                    None => return Next::Stop,
                },
            }
        }
    }

    async fn idle(&mut self) -> Next {
        loop {
            match self.commands.recv().await {
                Some(command) => {
                    if let Some(next) = self.offline_command(command) {
                        return next;
                    }
                }
                None => return Next::Stop,
            }
        }
    }

    /// Commands received while not connected.
    fn offline_command(&mut self, command: Command) -> Option<Next> {
        match command {
            Command::Shutdown => Some(Next::Stop),
            Command::NetworkRecovered | Command::Retry => {
                if *self.state.borrow() == ConnectionState::Failed {
                    self.attempt = 0;
                }
                info!("Reconnecting immediately");
                Some(Next::Connect)
            }
            Command::LeaveRoom => {
                // Nothing left to resume, so no reconnect either
                self.forget_membership();
                self.attempt = 0;
                self.set_state(ConnectionState::Disconnected);
                info!("Left room while offline, reconnect cancelled");
                Some(Next::Idle)
            }
            Command::Send(message) => {
                debug!(?message, "Dropping message while offline");
                None
            }
        }
    }

    fn track_membership(&mut self, event: &ServerEvent) {
        if let Some(membership) = Membership::from_event(event) {
            if let Some(store) = &self.store {
                if let Err(e) = store.save(&membership) {
                    warn!(error = %e, "Failed to persist membership");
                }
            }
            self.membership = Some(membership);
        } else if Membership::ended_by(event) {
            self.forget_membership();
        }
    }

    fn forget_membership(&mut self) {
        if self.membership.take().is_some() {
            debug!("Membership forgotten");
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.clear() {
                warn!(error = %e, "Failed to clear persisted membership");
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
        }
    }
}
