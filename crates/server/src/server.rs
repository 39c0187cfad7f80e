use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use pulse::{
    ChatMessage, ClientPosition, HandshakeResponse, Heartbeat, LobbyJoin, NetworkEndpoint,
    NetworkStats, Payload, ReconnectionRequest, ReconnectionResponse, ServerStatus,
    UsernamePrompt, UsernameResponse, UsernameSubmission,
};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};
use crate::registry::{ClientPhase, ClientRegistry};
use crate::simulation::WorldBounds;
use crate::username::{UsernameError, suggest_usernames, validate_username};

const SERVER_ID: &str = "server";
const USERNAME_PROMPT: &str = "Enter a username (1-16 letters, digits or '_')";

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub uptime: Duration,
    pub client_count: usize,
    pub pending_count: usize,
    pub retained_count: usize,
    pub max_clients: usize,
    pub network_stats: NetworkStats,
}

pub struct DevServer {
    endpoint: NetworkEndpoint,
    registry: ClientRegistry,
    config: ServerConfig,
    bounds: WorldBounds,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    last_status: Instant,
    start_time: Instant,
    pending_events: VecDeque<ServerEvent>,
}

impl DevServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> io::Result<Self> {
        let endpoint = NetworkEndpoint::bind(bind_addr)?;
        let tick_duration = Duration::from_secs_f64(1.0 / config.tick_rate.max(1) as f64);
        let now = Instant::now();

        Ok(Self {
            endpoint,
            registry: ClientRegistry::new(
                config.max_clients,
                config.connection_timeout,
                config.session_timeout,
            ),
            bounds: WorldBounds::new(config.world_half_extent),
            tick_duration,
            last_tick_time: now,
            accumulator: Duration::ZERO,
            last_status: now,
            start_time: now,
            pending_events: VecDeque::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += delta;

        if let Err(e) = self.process_network(now) {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("Network error: {}", e),
            });
        }

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.tick(now);
        }
    }

    fn tick(&mut self, now: Instant) {
        for record in self.registry.cleanup_timed_out(now) {
            if record.phase != ClientPhase::Connected {
                continue;
            }
            let name = record.username.clone().unwrap_or_default();
            self.broadcast_status(&format!("{} lost connection", name));
            self.pending_events
                .push_back(ServerEvent::ClientDisconnected {
                    public_id: record.public_id,
                    reason: DisconnectReason::Timeout,
                });
        }

        if now.saturating_duration_since(self.last_status) >= self.config.status_interval {
            self.last_status = now;
            let stats = self.stats();
            log::info!(
                "Up {}s: {}/{} connected, {} pending, {} retained; {} packets in, {} out",
                stats.uptime.as_secs(),
                stats.client_count,
                stats.max_clients,
                stats.pending_count,
                stats.retained_count,
                stats.network_stats.packets_received,
                stats.network_stats.packets_sent
            );
        }
    }

    fn process_network(&mut self, now: Instant) -> io::Result<()> {
        let packets = self.endpoint.receive()?;

        for (envelope, addr) in packets {
            let Some(payload) = envelope.payload else {
                continue;
            };
            self.handle_payload(payload, addr, now);

            if let Some(client) = self.registry.get_mut(&addr) {
                client.touch(now);
            }
        }

        Ok(())
    }

    fn handle_payload(&mut self, payload: Payload, addr: SocketAddr, now: Instant) {
        match payload {
            Payload::HandshakeRequest(_) => self.handle_handshake_request(addr, now),
            Payload::UsernameSubmission(submission) => {
                self.handle_username_submission(addr, submission)
            }
            Payload::ReconnectionRequest(request) => {
                self.handle_reconnection_request(addr, request, now)
            }
            Payload::Heartbeat(heartbeat) => self.handle_heartbeat(addr, heartbeat),
            Payload::HeartbeatAck(_) => {}
            Payload::ClientPosition(update) => self.handle_position(addr, update),
            Payload::ChatMessage(chat) => self.handle_chat(addr, chat),
            Payload::LobbyJoin(join) => self.handle_lobby_join(addr, join),
            Payload::HandshakeResponse(_)
            | Payload::ServerStatus(_)
            | Payload::UsernamePrompt(_)
            | Payload::UsernameResponse(_)
            | Payload::ReconnectionResponse(_) => {
                log::debug!("Ignoring client-bound payload from {}", addr);
            }
        }
    }

    fn handle_handshake_request(&mut self, addr: SocketAddr, now: Instant) {
        self.pending_events
            .push_back(ServerEvent::ClientConnecting { addr });

        let record = match self.registry.get_or_create_pending(addr, now) {
            Ok(record) => record,
            Err(reason) => {
                self.send(
                    addr,
                    Payload::ServerStatus(ServerStatus {
                        client_id: SERVER_ID.to_string(),
                        message: reason.to_string(),
                    }),
                );
                self.pending_events.push_back(ServerEvent::ConnectionDenied {
                    addr,
                    reason: reason.to_string(),
                });
                return;
            }
        };

        // A repeated request from a connected client means our reply was lost.
        if record.is_connected() {
            let response = HandshakeResponse {
                private_id: record.private_id.clone(),
                public_id: record.public_id.clone(),
            };
            self.send(addr, Payload::HandshakeResponse(response));
            return;
        }

        self.send(addr, Payload::HandshakeResponse(HandshakeResponse::pending()));
        self.send(
            addr,
            Payload::UsernamePrompt(UsernamePrompt {
                message: USERNAME_PROMPT.to_string(),
            }),
        );
    }

    fn handle_username_submission(&mut self, addr: SocketAddr, submission: UsernameSubmission) {
        let awaiting = self
            .registry
            .get(&addr)
            .is_some_and(|c| c.phase == ClientPhase::AwaitingUsername);
        if !awaiting {
            log::debug!("Unexpected username submission from {}", addr);
            return;
        }

        let username = submission.username.trim().to_string();
        let verdict = validate_username(&username).and_then(|()| {
            if self.registry.is_username_taken(&username) {
                Err(UsernameError::Taken(username.clone()))
            } else {
                Ok(())
            }
        });

        if let Err(e) = verdict {
            log::info!("Rejected username '{}' from {}: {}", username, addr, e);
            let registry = &self.registry;
            let suggestions = suggest_usernames(&username, |name| registry.is_username_taken(name));
            self.send(
                addr,
                Payload::UsernameResponse(UsernameResponse {
                    username,
                    is_accepted: false,
                    message: e.to_string(),
                    suggestions,
                }),
            );
            return;
        }

        let Some(record) = self.registry.promote(&addr, &username) else {
            return;
        };
        let private_id = record.private_id.clone();
        let public_id = record.public_id.clone();

        self.send(
            addr,
            Payload::UsernameResponse(UsernameResponse {
                username: username.clone(),
                is_accepted: true,
                message: format!("Welcome, {}", username),
                suggestions: Vec::new(),
            }),
        );
        self.send(
            addr,
            Payload::HandshakeResponse(HandshakeResponse {
                private_id,
                public_id: public_id.clone(),
            }),
        );

        self.introduce_lobby_to(addr);
        self.broadcast_status(&format!("{} joined", username));
        self.pending_events.push_back(ServerEvent::ClientConnected {
            public_id,
            username,
            addr,
        });
    }

    fn handle_reconnection_request(
        &mut self,
        addr: SocketAddr,
        request: ReconnectionRequest,
        now: Instant,
    ) {
        if request.session_token.is_empty() {
            self.send(
                addr,
                Payload::ReconnectionResponse(ReconnectionResponse {
                    is_successful: false,
                    message: "Missing session token".to_string(),
                    ..Default::default()
                }),
            );
            return;
        }

        let Some((record, replaced)) = self.registry.resume(addr, &request.username, now) else {
            log::info!("No session to resume for '{}'", request.username);
            self.send(
                addr,
                Payload::ReconnectionResponse(ReconnectionResponse {
                    is_successful: false,
                    message: "Session not found or expired".to_string(),
                    ..Default::default()
                }),
            );
            return;
        };

        let private_id = record.private_id.clone();
        let public_id = record.public_id.clone();

        if let Some(old) = replaced {
            self.pending_events
                .push_back(ServerEvent::ClientDisconnected {
                    public_id: old.public_id,
                    reason: DisconnectReason::Replaced,
                });
        }

        self.send(
            addr,
            Payload::ReconnectionResponse(ReconnectionResponse {
                is_successful: true,
                message: format!("Welcome back, {}", request.username),
                private_id,
                public_id: public_id.clone(),
            }),
        );
        self.pending_events.push_back(ServerEvent::ClientResumed {
            public_id,
            username: request.username,
            addr,
        });
    }

    fn handle_heartbeat(&mut self, addr: SocketAddr, heartbeat: Heartbeat) {
        let known = self
            .registry
            .get(&addr)
            .is_some_and(|c| c.is_connected() && c.private_id == heartbeat.client_id);
        if known {
            self.send(addr, Payload::HeartbeatAck(heartbeat));
        }
    }

    fn handle_position(&mut self, addr: SocketAddr, update: ClientPosition) {
        let bounds = self.bounds;
        let Some(record) = self.registry.get_mut(&addr) else {
            return;
        };
        if !record.is_connected() || record.private_id != update.client_id {
            return;
        }
        if update.timestamp < record.last_position_timestamp {
            return;
        }

        record.last_position_timestamp = update.timestamp;
        if !bounds.contains(update.position()) {
            log::debug!("Clamping out-of-bounds position from {}", addr);
        }
        record.position = bounds.clamp(update.position());
        let echo = ClientPosition::new(
            record.public_id.clone(),
            record.position,
            update.velocity(),
            update.timestamp,
        );

        self.broadcast(Payload::ClientPosition(echo), None);
    }

    fn handle_chat(&mut self, addr: SocketAddr, chat: ChatMessage) {
        let Some(record) = self.registry.get(&addr).filter(|c| c.is_connected()) else {
            return;
        };
        if record.private_id != chat.client_id {
            return;
        }
        let relayed = ChatMessage {
            client_id: record.public_id.clone(),
            message: chat.message,
        };
        self.broadcast(Payload::ChatMessage(relayed), None);
    }

    fn handle_lobby_join(&mut self, addr: SocketAddr, join: LobbyJoin) {
        let bounds = self.bounds;
        let Some(record) = self.registry.get_mut(&addr).filter(|c| c.is_connected()) else {
            return;
        };
        if record.public_id != join.public_id {
            return;
        }

        record.color_hex = Some(join.color_hex.clone());
        if let Some(position) = join.position {
            record.position = bounds.clamp(position.into());
        }
        let public_id = record.public_id.clone();
        let position = record.position;

        let targets: Vec<SocketAddr> = self.registry.connected().map(|c| c.addr).collect();
        for target in targets {
            self.send(
                target,
                Payload::LobbyJoin(LobbyJoin {
                    public_id: public_id.clone(),
                    color_hex: join.color_hex.clone(),
                    position: Some(position.into()),
                    is_local_player: target == addr,
                }),
            );
        }
    }

    /// Tells a newly connected client about everyone already in the lobby.
    fn introduce_lobby_to(&mut self, addr: SocketAddr) {
        let others: Vec<LobbyJoin> = self
            .registry
            .connected()
            .filter(|c| c.addr != addr)
            .filter_map(|c| {
                c.color_hex.as_ref().map(|color| LobbyJoin {
                    public_id: c.public_id.clone(),
                    color_hex: color.clone(),
                    position: Some(c.position.into()),
                    is_local_player: false,
                })
            })
            .collect();

        for join in others {
            self.send(addr, Payload::LobbyJoin(join));
        }
    }

    fn broadcast_status(&mut self, message: &str) {
        self.broadcast(
            Payload::ServerStatus(ServerStatus {
                client_id: SERVER_ID.to_string(),
                message: message.to_string(),
            }),
            None,
        );
    }

    fn broadcast(&mut self, payload: Payload, except: Option<SocketAddr>) {
        let targets: Vec<SocketAddr> = self
            .registry
            .connected()
            .map(|c| c.addr)
            .filter(|addr| Some(*addr) != except)
            .collect();
        for target in targets {
            self.send(target, payload.clone());
        }
    }

    fn send(&mut self, addr: SocketAddr, payload: Payload) {
        if let Err(e) = self.endpoint.send_payload(payload, addr) {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("Failed to send to {}: {}", addr, e),
            });
        }
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            uptime: self.start_time.elapsed(),
            client_count: self.registry.connected_count(),
            pending_count: self.registry.total_count() - self.registry.connected_count(),
            retained_count: self.registry.retained_count(),
            max_clients: self.config.max_clients,
            network_stats: self.endpoint.stats().clone(),
        }
    }
}
