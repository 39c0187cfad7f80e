use std::collections::VecDeque;
use std::collections::vec_deque::Drain;
use std::net::SocketAddr;
use std::time::Instant;

use glam::Vec3;

use pulse::net::resolve_server_addr;
use pulse::{
    ChatMessage, ClientPosition, Envelope, LobbyJoin, NetworkStats, Payload, PayloadKind,
    Transport, TransportError,
};

use super::config::ClientConfig;
use super::connection::{ClientConnection, ConnectionState};
use super::dispatcher::{DispatchTargets, PacketDispatcher};
use super::events::{ClientEvent, DisconnectReason};
use super::interpolation::{InterpolationConfig, InterpolationEngine, RemoteEntity};
use super::prediction::{ClientPrediction, Reconciliation};

/// Upper bound on datagrams processed per tick so a flood cannot stall a frame.
const MAX_DATAGRAMS_PER_TICK: usize = 256;

pub struct NetworkClient {
    config: ClientConfig,
    transport: Transport,
    server_addr: Option<SocketAddr>,
    connection: ClientConnection,
    dispatcher: PacketDispatcher,
    prediction: ClientPrediction,
    remotes: InterpolationEngine,
    events: VecDeque<ClientEvent>,
    stats: NetworkStats,
    epoch: Instant,
    last_reconciliation: Option<Reconciliation>,
}

impl NetworkClient {
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let transport = Transport::bind("0.0.0.0:0", config.inbox_capacity)?;
        log::info!("Client socket bound to {}", transport.local_addr());

        Ok(Self {
            connection: ClientConnection::new(&config),
            dispatcher: PacketDispatcher::new(),
            prediction: ClientPrediction::from_config(&config),
            remotes: InterpolationEngine::new(InterpolationConfig::from(&config)),
            transport,
            server_addr: None,
            events: VecDeque::new(),
            stats: NetworkStats::default(),
            epoch: Instant::now(),
            last_reconciliation: None,
            config,
        })
    }

    /// Connects to the configured host and port. Returns whether an attempt
    /// was started.
    ///
    /// Ignored while a connection is in progress or established; call
    /// [`disconnect`](Self::disconnect) first to switch servers. An address
    /// that does not resolve to a usable target is reported as a
    /// `Disconnected` event.
    pub fn connect(&mut self) -> bool {
        if !self.connection.can_connect() {
            log::warn!("Connect ignored while {:?}", self.connection.state());
            return false;
        }

        let addr = match resolve_server_addr(&self.config.host, self.config.port) {
            Ok(addr) => addr,
            Err(e) => {
                log::warn!("Cannot connect: {}", e);
                self.connection.fail(DisconnectReason::InvalidAddress);
                self.remotes.reset();
                self.last_reconciliation = None;
                self.collect_connection_events();
                return false;
            }
        };

        if self.server_addr != Some(addr) {
            self.remotes.reset();
        }
        self.server_addr = Some(addr);
        log::info!("Connecting to {}", addr);

        let now = Instant::now();
        self.connection.connect(now);
        self.flush_outbox(now);
        self.collect_connection_events();
        true
    }

    /// Points the client at a different server. Takes effect on the next
    /// [`connect`](Self::connect) that starts an attempt.
    pub fn set_server(&mut self, host: impl Into<String>, port: u16) {
        self.config.host = host.into();
        self.config.port = port;
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect();
        self.remotes.reset();
        self.last_reconciliation = None;
        self.collect_connection_events();
    }

    pub fn submit_username(&mut self, username: &str) -> bool {
        let now = Instant::now();
        let accepted = self.connection.submit_username(username, now);
        self.flush_outbox(now);
        self.collect_connection_events();
        accepted
    }

    /// Advances the client using the wall clock.
    pub fn update(&mut self, dt: f32) {
        self.tick(Instant::now(), dt);
    }

    /// One frame: receive and dispatch, run timers, smooth remote entities,
    /// then send whatever was queued.
    pub fn tick(&mut self, now: Instant, dt: f32) {
        self.process_incoming(now);
        self.connection.update(now);
        self.collect_connection_events();

        self.remotes.update(self.motion_time(now), dt);

        self.flush_outbox(now);
        self.collect_connection_events();
    }

    fn process_incoming(&mut self, now: Instant) {
        let motion_time = self.motion_time(now);

        for datagram in self.transport.drain(MAX_DATAGRAMS_PER_TICK) {
            if self.server_addr != Some(datagram.from) {
                self.stats.foreign_dropped += 1;
                log::debug!("Ignoring datagram from unknown peer {}", datagram.from);
                continue;
            }

            let envelope = match Envelope::deserialize(&datagram.data) {
                Ok(envelope) => envelope,
                Err(e) => {
                    self.stats.malformed_dropped += 1;
                    log::warn!("Dropping malformed datagram from {}: {}", datagram.from, e);
                    continue;
                }
            };

            self.stats.record_received(datagram.data.len());
            self.stats.record_sequence(envelope.seq);

            let reconciliation = self.dispatcher.dispatch(
                envelope,
                DispatchTargets {
                    connection: &mut self.connection,
                    prediction: &mut self.prediction,
                    remotes: &mut self.remotes,
                    events: &mut self.events,
                    now,
                    motion_time,
                },
            );
            if reconciliation.is_some() {
                self.last_reconciliation = reconciliation;
            }
            self.collect_connection_events();
        }

        self.stats.inbox_dropped = self.transport.inbox_dropped();
    }

    fn flush_outbox(&mut self, now: Instant) {
        let outgoing: Vec<Envelope> = self.connection.drain_outbox().collect();
        let Some(addr) = self.server_addr else {
            return;
        };

        for envelope in outgoing {
            match self.transport.send_envelope(&envelope, addr) {
                Ok(0) => log::debug!("Packet {} dropped by full socket buffer", envelope.seq),
                Ok(bytes) => self.stats.record_sent(bytes),
                Err(TransportError::Packet(e)) => {
                    log::warn!("Not sending packet {}: {}", envelope.seq, e);
                }
                Err(e) => {
                    self.stats.send_failures += 1;
                    log::warn!("Send to {} failed: {}", addr, e);
                    self.connection.handle_send_failure(now);
                    break;
                }
            }
        }
    }

    fn collect_connection_events(&mut self) {
        self.events.extend(self.connection.drain_events());
    }

    fn motion_time(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.epoch).as_secs_f64()
    }

    /// Reports the local player's movement. The server echoes it back for
    /// reconciliation and relays it to everyone else.
    pub fn send_position(&mut self, position: Vec3, velocity: Vec3) -> bool {
        let Some(client_id) = self.connected_private_id() else {
            return false;
        };
        let now = Instant::now();
        let timestamp = self.motion_time(now);
        self.send_now(
            Payload::ClientPosition(ClientPosition::new(client_id, position, velocity, timestamp)),
            now,
        );
        true
    }

    pub fn send_chat(&mut self, message: &str) -> bool {
        let Some(client_id) = self.connected_private_id() else {
            return false;
        };
        self.send_now(
            Payload::ChatMessage(ChatMessage {
                client_id,
                message: message.to_string(),
            }),
            Instant::now(),
        );
        true
    }

    pub fn send_lobby_join(&mut self, color_hex: &str) -> bool {
        let Some(public_id) = self
            .connection
            .public_id()
            .filter(|_| self.connection.is_connected())
            .map(str::to_string)
        else {
            return false;
        };
        self.send_now(
            Payload::LobbyJoin(LobbyJoin {
                public_id,
                color_hex: color_hex.to_string(),
                position: Some(self.prediction.position().into()),
                is_local_player: true,
            }),
            Instant::now(),
        );
        true
    }

    /// Applies a movement intent to the predicted local position.
    pub fn apply_local_input(&mut self, input: Vec3, dt: f32) -> Vec3 {
        let timestamp = self.motion_time(Instant::now());
        self.prediction.apply_input(input, dt, timestamp)
    }

    fn send_now(&mut self, payload: Payload, now: Instant) {
        self.connection.send(payload);
        self.flush_outbox(now);
        self.collect_connection_events();
    }

    fn connected_private_id(&self) -> Option<String> {
        if !self.connection.is_connected() {
            return None;
        }
        self.connection.private_id().map(str::to_string)
    }

    pub fn poll_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> Drain<'_, ClientEvent> {
        self.events.drain(..)
    }

    pub fn subscribe(&mut self, kind: PayloadKind) {
        self.dispatcher.subscribe(kind);
    }

    pub fn unsubscribe(&mut self, kind: PayloadKind) {
        self.dispatcher.unsubscribe(kind);
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.connection.set_auto_reconnect(enabled);
    }

    pub fn set_session_reconnect(&mut self, enabled: bool) {
        self.connection.set_session_reconnect(enabled);
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn private_id(&self) -> Option<&str> {
        self.connection.private_id()
    }

    pub fn public_id(&self) -> Option<&str> {
        self.connection.public_id()
    }

    pub fn username(&self) -> Option<&str> {
        self.connection.username()
    }

    pub fn connection(&self) -> &ClientConnection {
        &self.connection
    }

    pub fn dispatcher(&self) -> &PacketDispatcher {
        &self.dispatcher
    }

    pub fn predicted_position(&self) -> Vec3 {
        self.prediction.position()
    }

    pub fn predicted_velocity(&self) -> Vec3 {
        self.prediction.velocity()
    }

    pub fn last_reconciliation(&self) -> Option<Reconciliation> {
        self.last_reconciliation
    }

    pub fn remote_entity(&self, id: &str) -> Option<&RemoteEntity> {
        self.remotes.get(id)
    }

    pub fn remote_entities(&self) -> impl Iterator<Item = (&str, &RemoteEntity)> {
        self.remotes.entities()
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server_addr
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_address_reports_disconnect() {
        let mut client = NetworkClient::new(ClientConfig {
            host: "0.0.0.0".into(),
            ..Default::default()
        })
        .unwrap();

        assert!(!client.connect());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(
            client.poll_event(),
            Some(ClientEvent::Disconnected {
                reason: DisconnectReason::InvalidAddress
            })
        );
    }

    #[test]
    fn test_sends_require_connection() {
        let mut client = NetworkClient::new(ClientConfig::default()).unwrap();
        assert!(!client.send_position(Vec3::ZERO, Vec3::ZERO));
        assert!(!client.send_chat("hello"));
        assert!(!client.send_lobby_join("#00ff00"));
        assert!(!client.submit_username("Alice"));
    }

    #[test]
    fn test_local_input_moves_prediction() {
        let mut client = NetworkClient::new(ClientConfig::default()).unwrap();
        let position = client.apply_local_input(Vec3::X, 0.5);
        assert!((position - Vec3::new(2.5, 0.0, 0.0)).length() < 1e-5);
        assert_eq!(client.predicted_velocity(), Vec3::new(5.0, 0.0, 0.0));
    }
}
