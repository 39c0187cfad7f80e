//! Client connection lifecycle.
//!
//! The machine never touches the socket. Outbound payloads are queued with
//! their sequence numbers already assigned and drained by the owner after
//! each call; send failures are reported back with
//! [`ClientConnection::handle_send_failure`]. Every timer is a deadline
//! compared against the `now` passed into [`ClientConnection::update`].

use std::collections::VecDeque;
use std::collections::vec_deque::Drain;
use std::time::{Duration, Instant};

use pulse::{
    Envelope, HandshakeRequest, HandshakeResponse, Heartbeat, Payload, ReconnectionRequest,
    ReconnectionResponse, UsernamePrompt, UsernameResponse, UsernameSubmission,
};

use super::config::ClientConfig;
use super::events::{ClientEvent, DisconnectReason};
use super::schedule::ReconnectSchedule;
use super::session::{Session, SessionManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    HandshakeComplete,
    WaitingForUsernamePrompt,
    UsernameValidating,
    Connected,
    Reconnecting,
    ReconnectingWithSession,
}

impl ConnectionState {
    pub fn is_reconnecting(self) -> bool {
        matches!(self, Self::Reconnecting | Self::ReconnectingWithSession)
    }
}

#[derive(Debug)]
pub struct ClientConnection {
    state: ConnectionState,
    private_id: Option<String>,
    public_id: Option<String>,
    username: Option<String>,
    client_name: String,
    sequence_counter: u32,
    handshake_sent_at: Option<Instant>,
    username_sent_at: Option<Instant>,
    reconnect_sent_at: Option<Instant>,
    last_heartbeat_sent_at: Option<Instant>,
    last_heartbeat_ack_at: Option<Instant>,
    handshake_timeout: Duration,
    heartbeat_interval: Duration,
    connection_timeout: Duration,
    auto_reconnect_default: bool,
    auto_reconnect: bool,
    retrying: bool,
    schedule: ReconnectSchedule,
    sessions: SessionManager,
    outbox: VecDeque<Envelope>,
    events: VecDeque<ClientEvent>,
}

impl ClientConnection {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            private_id: None,
            public_id: None,
            username: None,
            client_name: config.client_name.clone(),
            sequence_counter: 1,
            handshake_sent_at: None,
            username_sent_at: None,
            reconnect_sent_at: None,
            last_heartbeat_sent_at: None,
            last_heartbeat_ack_at: None,
            handshake_timeout: config.handshake_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            connection_timeout: config.connection_timeout(),
            auto_reconnect_default: config.auto_reconnect,
            auto_reconnect: config.auto_reconnect,
            retrying: false,
            schedule: ReconnectSchedule::new(config.reconnect_delays()),
            sessions: SessionManager::new(config.session_reconnect, config.session_timeout()),
            outbox: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Starts a connection attempt. Resumes the stored session when one is
    /// still valid, otherwise performs the full handshake.
    pub fn connect(&mut self, now: Instant) {
        if !self.can_connect() {
            log::warn!("Connect ignored while {:?}", self.state);
            return;
        }

        self.auto_reconnect = self.auto_reconnect_default;
        self.retrying = false;
        self.schedule.reset();

        match self.sessions.valid_session(now).cloned() {
            Some(session) => self.begin_session_resume(now, &session),
            None => self.begin_handshake(now),
        }
    }

    /// Whether [`connect`](Self::connect) would start a new attempt. Only
    /// idle or retrying connections can be redirected.
    pub fn can_connect(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Disconnected
                | ConnectionState::Reconnecting
                | ConnectionState::ReconnectingWithSession
        )
    }

    /// Drops the connection and everything pending. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        self.tear_down();

        if self.state != ConnectionState::Disconnected {
            log::info!("Disconnected by client");
            self.set_state(ConnectionState::Disconnected);
            self.events.push_back(ClientEvent::Disconnected {
                reason: DisconnectReason::Manual,
            });
        }
    }

    /// Submits a username once the server has prompted for one. Returns false
    /// when the name is empty or no prompt is outstanding.
    pub fn submit_username(&mut self, username: &str, now: Instant) -> bool {
        let username = username.trim();
        if username.is_empty() {
            log::warn!("Ignoring empty username");
            return false;
        }
        if self.state != ConnectionState::HandshakeComplete {
            log::warn!("Username submitted while {:?}", self.state);
            return false;
        }

        self.username = Some(username.to_string());
        self.send(Payload::UsernameSubmission(UsernameSubmission {
            username: username.to_string(),
        }));
        self.username_sent_at = Some(now);
        self.set_state(ConnectionState::UsernameValidating);
        true
    }

    /// Queues a payload for sending and returns its sequence number.
    pub fn send(&mut self, payload: Payload) -> u32 {
        let sequence = self.next_sequence();
        self.outbox.push_back(Envelope::new(sequence, payload));
        sequence
    }

    fn next_sequence(&mut self) -> u32 {
        let sequence = self.sequence_counter;
        // 0 is never issued, so a wrap restarts at 1.
        self.sequence_counter = self.sequence_counter.checked_add(1).unwrap_or(1);
        sequence
    }

    pub fn update(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Connecting => {
                if elapsed_since(self.handshake_sent_at, now) >= Some(self.handshake_timeout) {
                    log::warn!("Handshake timed out");
                    self.lose_connection(now, DisconnectReason::HandshakeTimeout);
                }
            }
            ConnectionState::UsernameValidating => {
                if elapsed_since(self.username_sent_at, now) >= Some(self.handshake_timeout) {
                    log::warn!("Username validation timed out");
                    self.lose_connection(now, DisconnectReason::UsernameTimeout);
                }
            }
            ConnectionState::Connected => {
                let since_ack = elapsed_since(self.last_heartbeat_ack_at, now);
                if since_ack >= Some(self.connection_timeout) {
                    log::warn!("No heartbeat ack for {:?}", self.connection_timeout);
                    self.lose_connection(now, DisconnectReason::HeartbeatTimeout);
                    return;
                }

                let heartbeat_due = elapsed_since(self.last_heartbeat_sent_at, now)
                    .is_none_or(|elapsed| elapsed >= self.heartbeat_interval);
                if heartbeat_due {
                    self.send_heartbeat(now);
                }
            }
            ConnectionState::Reconnecting => {
                if self.schedule.is_due(now) {
                    self.schedule.clear_deadline();
                    log::info!("Retrying handshake");
                    self.begin_handshake(now);
                }
            }
            ConnectionState::ReconnectingWithSession => {
                let Some(session) = self.sessions.valid_session(now).cloned() else {
                    log::info!("Session expired, falling back to full handshake");
                    self.fall_back_to_handshake(now);
                    return;
                };

                if self.reconnect_sent_at.is_some() {
                    if elapsed_since(self.reconnect_sent_at, now) >= Some(self.handshake_timeout)
                    {
                        log::warn!("Session resume attempt timed out");
                        self.reconnect_sent_at = None;
                        self.schedule.schedule_next(now);
                    }
                } else if self.schedule.is_due(now) {
                    self.begin_session_resume(now, &session);
                }
            }
            ConnectionState::Disconnected
            | ConnectionState::HandshakeComplete
            | ConnectionState::WaitingForUsernamePrompt => {}
        }
    }

    pub fn handle_handshake_response(&mut self, response: HandshakeResponse, now: Instant) {
        match self.state {
            ConnectionState::Connecting if response.is_pending() => {
                log::debug!("Handshake acknowledged, identity pending");
                self.handshake_sent_at = None;
                self.set_state(ConnectionState::HandshakeComplete);
                self.set_state(ConnectionState::WaitingForUsernamePrompt);
            }
            ConnectionState::Connecting | ConnectionState::UsernameValidating
                if !response.is_pending() =>
            {
                self.complete_connection(response.private_id, response.public_id, now);
            }
            state => {
                log::debug!("Ignoring handshake response while {:?}", state);
            }
        }
    }

    pub fn handle_username_prompt(&mut self, prompt: UsernamePrompt) {
        match self.state {
            ConnectionState::Connecting
            | ConnectionState::WaitingForUsernamePrompt
            | ConnectionState::HandshakeComplete
            | ConnectionState::UsernameValidating => {
                self.handshake_sent_at = None;
                self.username_sent_at = None;
                self.set_state(ConnectionState::HandshakeComplete);
                self.events.push_back(ClientEvent::UsernamePrompt {
                    message: prompt.message,
                });
            }
            state => {
                log::debug!("Ignoring username prompt while {:?}", state);
            }
        }
    }

    pub fn handle_username_response(&mut self, response: UsernameResponse) {
        if self.state != ConnectionState::UsernameValidating {
            log::debug!("Ignoring username response while {:?}", self.state);
            return;
        }

        if response.is_accepted {
            log::info!("Username '{}' accepted", response.username);
            if !response.username.is_empty() {
                self.username = Some(response.username);
            }
        } else {
            log::info!("Username rejected: {}", response.message);
            self.username_sent_at = None;
            self.set_state(ConnectionState::HandshakeComplete);
            self.events.push_back(ClientEvent::UsernameRejected {
                message: response.message,
                suggestions: response.suggestions,
            });
        }
    }

    pub fn handle_reconnection_response(&mut self, response: ReconnectionResponse, now: Instant) {
        if self.state != ConnectionState::ReconnectingWithSession {
            log::debug!("Ignoring reconnection response while {:?}", self.state);
            return;
        }

        if response.is_successful {
            log::info!("Session resumed");
            if self.username.is_none() {
                self.username = self.sessions.session().map(|s| s.username.clone());
            }
            self.complete_connection(response.private_id, response.public_id, now);
        } else {
            log::warn!("Session resume rejected: {}", response.message);
            self.fall_back_to_handshake(now);
        }
    }

    pub fn handle_heartbeat(&mut self, heartbeat: Heartbeat) {
        if self.state == ConnectionState::Connected {
            self.send(Payload::HeartbeatAck(heartbeat));
        }
    }

    pub fn handle_heartbeat_ack(&mut self, now: Instant) {
        self.last_heartbeat_ack_at = Some(now);
        if self.state == ConnectionState::Connected {
            self.sessions.touch(now);
        }
    }

    /// Treats a failed socket send as loss of connectivity.
    pub fn handle_send_failure(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {}
            ConnectionState::ReconnectingWithSession => {
                if self.reconnect_sent_at.take().is_some() {
                    self.schedule.schedule_next(now);
                }
            }
            _ => self.lose_connection(now, DisconnectReason::SendFailed),
        }
    }

    /// Reports a connection that could not even be attempted, e.g. an
    /// unresolvable server address.
    pub fn fail(&mut self, reason: DisconnectReason) {
        self.tear_down();
        self.set_state(ConnectionState::Disconnected);
        self.events.push_back(ClientEvent::Disconnected { reason });
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.auto_reconnect_default = enabled;
        self.auto_reconnect = enabled;
    }

    pub fn set_session_reconnect(&mut self, enabled: bool) {
        self.sessions.set_enabled(enabled);
    }

    fn begin_handshake(&mut self, now: Instant) {
        self.clear_deadlines();
        self.private_id = None;
        self.public_id = None;
        self.set_state(ConnectionState::Connecting);
        self.send(Payload::HandshakeRequest(HandshakeRequest {
            client_name: self.client_name.clone(),
        }));
        self.handshake_sent_at = Some(now);
    }

    fn begin_session_resume(&mut self, now: Instant, session: &Session) {
        self.clear_deadlines();
        self.schedule.clear_deadline();
        self.set_state(ConnectionState::ReconnectingWithSession);
        log::info!("Resuming session for '{}'", session.username);
        self.send(Payload::ReconnectionRequest(ReconnectionRequest {
            username: session.username.clone(),
            session_token: session.session_token.clone(),
        }));
        self.reconnect_sent_at = Some(now);
    }

    fn fall_back_to_handshake(&mut self, now: Instant) {
        self.sessions.clear_session();
        self.reconnect_sent_at = None;
        self.schedule.reset();
        self.set_state(ConnectionState::Reconnecting);
        self.schedule.schedule_next(now);
    }

    fn complete_connection(&mut self, private_id: String, public_id: String, now: Instant) {
        self.clear_deadlines();
        self.schedule.reset();
        self.retrying = false;
        self.last_heartbeat_ack_at = Some(now);
        self.private_id = Some(private_id.clone());
        self.public_id = Some(public_id.clone());

        if let Some(username) = self.username.clone() {
            self.sessions.store_session(&username, &private_id, now);
        }

        log::info!("Connected as {} (public id {})", private_id, public_id);
        self.set_state(ConnectionState::Connected);
        self.events.push_back(ClientEvent::Connected {
            private_id,
            public_id,
        });
    }

    fn lose_connection(&mut self, now: Instant, reason: DisconnectReason) {
        self.clear_deadlines();
        self.private_id = None;
        self.public_id = None;

        if !self.retrying {
            self.events.push_back(ClientEvent::Disconnected { reason });
        }

        if !self.auto_reconnect {
            self.schedule.reset();
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        self.retrying = true;
        if self.sessions.should_resume(now) {
            self.set_state(ConnectionState::ReconnectingWithSession);
        } else {
            self.set_state(ConnectionState::Reconnecting);
        }
        let delay = self.schedule.schedule_next(now);
        log::info!("Reconnecting in {:?} ({})", delay, reason);
    }

    fn send_heartbeat(&mut self, now: Instant) {
        let client_id = self.private_id.clone().unwrap_or_default();
        self.send(Payload::Heartbeat(Heartbeat { client_id }));
        self.last_heartbeat_sent_at = Some(now);
    }

    /// Forgets identity, session and retry progress. Auto-reconnect stays off
    /// until the next `connect`.
    fn tear_down(&mut self) {
        self.sessions.clear_session();
        self.schedule.reset();
        self.clear_deadlines();
        self.outbox.clear();
        self.auto_reconnect = false;
        self.retrying = false;
        self.private_id = None;
        self.public_id = None;
    }

    fn clear_deadlines(&mut self) {
        self.handshake_sent_at = None;
        self.username_sent_at = None;
        self.reconnect_sent_at = None;
        self.last_heartbeat_sent_at = None;
        self.last_heartbeat_ack_at = None;
    }

    fn set_state(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }
        log::debug!("Connection state {:?} -> {:?}", from, to);
        self.state = to;
        self.events.push_back(ClientEvent::StateChanged { from, to });
    }

    pub fn drain_outbox(&mut self) -> Drain<'_, Envelope> {
        self.outbox.drain(..)
    }

    pub fn drain_events(&mut self) -> Drain<'_, ClientEvent> {
        self.events.drain(..)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn private_id(&self) -> Option<&str> {
        self.private_id.as_deref()
    }

    pub fn public_id(&self) -> Option<&str> {
        self.public_id.as_deref()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    pub fn schedule(&self) -> &ReconnectSchedule {
        &self.schedule
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Sequence number the next outbound packet will carry.
    pub fn next_outbound_sequence(&self) -> u32 {
        self.sequence_counter
    }
}

fn elapsed_since(at: Option<Instant>, now: Instant) -> Option<Duration> {
    at.map(|at| now.saturating_duration_since(at))
}
