use std::collections::VecDeque;
use std::time::Instant;

use pulse::{ClientPosition, Envelope, Payload, PayloadKind};

use super::connection::ClientConnection;
use super::events::ClientEvent;
use super::interpolation::InterpolationEngine;
use super::prediction::{ClientPrediction, Reconciliation};

/// Everything a decoded packet can touch, borrowed for one dispatch.
pub struct DispatchTargets<'a> {
    pub connection: &'a mut ClientConnection,
    pub prediction: &'a mut ClientPrediction,
    pub remotes: &'a mut InterpolationEngine,
    pub events: &'a mut VecDeque<ClientEvent>,
    pub now: Instant,
    /// Current reading of the motion clock, in seconds.
    pub motion_time: f64,
}

#[derive(Debug, Default)]
pub struct PacketDispatcher {
    subscriptions: [bool; PayloadKind::COUNT],
    received: [u64; PayloadKind::COUNT],
    empty: u64,
}

impl PacketDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a `PacketReceived` event for every envelope of this kind.
    pub fn subscribe(&mut self, kind: PayloadKind) {
        self.subscriptions[kind.index()] = true;
    }

    pub fn unsubscribe(&mut self, kind: PayloadKind) {
        self.subscriptions[kind.index()] = false;
    }

    pub fn is_subscribed(&self, kind: PayloadKind) -> bool {
        self.subscriptions[kind.index()]
    }

    pub fn received_count(&self, kind: PayloadKind) -> u64 {
        self.received[kind.index()]
    }

    /// Envelopes that carried no payload this build understands.
    pub fn empty_count(&self) -> u64 {
        self.empty
    }

    /// Routes one envelope. Returns the reconciliation outcome when the
    /// packet was an echo of the local player's position.
    pub fn dispatch(
        &mut self,
        envelope: Envelope,
        targets: DispatchTargets<'_>,
    ) -> Option<Reconciliation> {
        let Some(kind) = envelope.kind() else {
            self.empty += 1;
            log::debug!("Envelope {} has no known payload", envelope.seq);
            return None;
        };

        self.received[kind.index()] += 1;
        if self.subscriptions[kind.index()] {
            targets
                .events
                .push_back(ClientEvent::PacketReceived(envelope.clone()));
        }

        let payload = envelope.payload?;
        let DispatchTargets {
            connection,
            prediction,
            remotes,
            events,
            now,
            motion_time,
        } = targets;

        match payload {
            Payload::HandshakeResponse(response) => {
                connection.handle_handshake_response(response, now);
            }
            Payload::UsernamePrompt(prompt) => connection.handle_username_prompt(prompt),
            Payload::UsernameResponse(response) => connection.handle_username_response(response),
            Payload::ReconnectionResponse(response) => {
                connection.handle_reconnection_response(response, now);
            }
            Payload::Heartbeat(heartbeat) => connection.handle_heartbeat(heartbeat),
            Payload::HeartbeatAck(_) => connection.handle_heartbeat_ack(now),
            Payload::ClientPosition(update) => {
                return route_position(update, connection, prediction, remotes, motion_time);
            }
            Payload::ServerStatus(status) => {
                events.push_back(ClientEvent::ServerMessage {
                    client_id: status.client_id,
                    message: status.message,
                });
            }
            Payload::ChatMessage(chat) => {
                events.push_back(ClientEvent::ChatMessage {
                    client_id: chat.client_id,
                    message: chat.message,
                });
            }
            Payload::LobbyJoin(join) => {
                events.push_back(ClientEvent::LobbyJoined {
                    position: join.position.map(Into::into).unwrap_or_default(),
                    public_id: join.public_id,
                    color_hex: join.color_hex,
                    is_local_player: join.is_local_player,
                });
            }
            Payload::HandshakeRequest(_)
            | Payload::UsernameSubmission(_)
            | Payload::ReconnectionRequest(_) => {
                log::debug!("Ignoring server-bound {:?} received from server", kind);
            }
        }

        None
    }
}

fn route_position(
    update: ClientPosition,
    connection: &ClientConnection,
    prediction: &mut ClientPrediction,
    remotes: &mut InterpolationEngine,
    motion_time: f64,
) -> Option<Reconciliation> {
    let is_local = !update.client_id.is_empty()
        && (connection.public_id() == Some(update.client_id.as_str())
            || connection.private_id() == Some(update.client_id.as_str()));

    if is_local {
        let result = prediction.reconcile(update.position(), update.timestamp);
        log::trace!("Reconciled local position: {:?}", result);
        return Some(result);
    }

    remotes.push_snapshot(
        &update.client_id,
        update.position(),
        update.velocity(),
        update.timestamp,
        motion_time,
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::config::ClientConfig;
    use crate::net::connection::ConnectionState;
    use glam::Vec3;
    use pulse::{
        ChatMessage, HandshakeRequest, HandshakeResponse, LobbyJoin, ServerStatus,
        UsernamePrompt, UsernameSubmission,
    };

    struct Harness {
        dispatcher: PacketDispatcher,
        connection: ClientConnection,
        prediction: ClientPrediction,
        remotes: InterpolationEngine,
        events: VecDeque<ClientEvent>,
        now: Instant,
    }

    impl Harness {
        fn new() -> Self {
            let config = ClientConfig::default();
            Self {
                dispatcher: PacketDispatcher::new(),
                connection: ClientConnection::new(&config),
                prediction: ClientPrediction::from_config(&config),
                remotes: InterpolationEngine::default(),
                events: VecDeque::new(),
                now: Instant::now(),
            }
        }

        fn dispatch(&mut self, payload: Payload) -> Option<Reconciliation> {
            self.dispatch_envelope(Envelope::new(1, payload))
        }

        fn dispatch_envelope(&mut self, envelope: Envelope) -> Option<Reconciliation> {
            self.dispatcher.dispatch(
                envelope,
                DispatchTargets {
                    connection: &mut self.connection,
                    prediction: &mut self.prediction,
                    remotes: &mut self.remotes,
                    events: &mut self.events,
                    now: self.now,
                    motion_time: 1.0,
                },
            )
        }

        fn connect(&mut self) {
            self.connection.connect(self.now);
            self.dispatch(Payload::HandshakeResponse(HandshakeResponse {
                private_id: "priv".into(),
                public_id: "pub".into(),
            }));
            assert!(self.connection.is_connected());
        }
    }

    #[test]
    fn test_connection_payloads_reach_state_machine() {
        let mut harness = Harness::new();
        harness.connection.connect(harness.now);

        harness.dispatch(Payload::HandshakeResponse(HandshakeResponse::pending()));
        assert_eq!(
            harness.connection.state(),
            ConnectionState::WaitingForUsernamePrompt
        );

        harness.dispatch(Payload::UsernamePrompt(UsernamePrompt {
            message: "name?".into(),
        }));
        assert_eq!(harness.connection.state(), ConnectionState::HandshakeComplete);
        assert_eq!(harness.dispatcher.received_count(PayloadKind::UsernamePrompt), 1);
    }

    #[test]
    fn test_server_bound_payloads_are_ignored() {
        let mut harness = Harness::new();
        harness.connection.connect(harness.now);
        harness.connection.drain_events().for_each(drop);

        harness.dispatch(Payload::HandshakeRequest(HandshakeRequest {
            client_name: "echo".into(),
        }));
        harness.dispatch(Payload::UsernameSubmission(UsernameSubmission {
            username: "echo".into(),
        }));

        assert_eq!(harness.connection.state(), ConnectionState::Connecting);
        assert!(harness.events.is_empty());
        assert_eq!(harness.connection.drain_events().count(), 0);
    }

    #[test]
    fn test_empty_envelope_is_a_no_op() {
        let mut harness = Harness::new();
        let result = harness.dispatch_envelope(Envelope {
            seq: 9,
            payload: None,
        });

        assert!(result.is_none());
        assert_eq!(harness.dispatcher.empty_count(), 1);
        assert!(harness.events.is_empty());
    }

    #[test]
    fn test_notifications_for_status_chat_and_lobby() {
        let mut harness = Harness::new();
        harness.dispatch(Payload::ServerStatus(ServerStatus {
            client_id: "server".into(),
            message: "welcome".into(),
        }));
        harness.dispatch(Payload::ChatMessage(ChatMessage {
            client_id: "pub-2".into(),
            message: "hi".into(),
        }));
        harness.dispatch(Payload::LobbyJoin(LobbyJoin {
            public_id: "pub-2".into(),
            color_hex: "#ff0000".into(),
            position: Some(Vec3::new(1.0, 2.0, 3.0).into()),
            is_local_player: false,
        }));

        let events: Vec<ClientEvent> = harness.events.drain(..).collect();
        assert_eq!(
            events,
            vec![
                ClientEvent::ServerMessage {
                    client_id: "server".into(),
                    message: "welcome".into(),
                },
                ClientEvent::ChatMessage {
                    client_id: "pub-2".into(),
                    message: "hi".into(),
                },
                ClientEvent::LobbyJoined {
                    public_id: "pub-2".into(),
                    color_hex: "#ff0000".into(),
                    position: Vec3::new(1.0, 2.0, 3.0),
                    is_local_player: false,
                },
            ]
        );
    }

    #[test]
    fn test_subscription_queues_packet_received() {
        let mut harness = Harness::new();
        harness.dispatcher.subscribe(PayloadKind::ChatMessage);
        assert!(harness.dispatcher.is_subscribed(PayloadKind::ChatMessage));
        assert!(!harness.dispatcher.is_subscribed(PayloadKind::ServerStatus));

        let chat = Envelope::new(
            4,
            Payload::ChatMessage(ChatMessage {
                client_id: "a".into(),
                message: "b".into(),
            }),
        );
        harness.dispatch_envelope(chat.clone());
        harness.dispatch(Payload::ServerStatus(ServerStatus::default()));

        assert_eq!(harness.events.front(), Some(&ClientEvent::PacketReceived(chat)));
        let received = harness
            .events
            .iter()
            .filter(|e| matches!(e, ClientEvent::PacketReceived(_)))
            .count();
        assert_eq!(received, 1);

        harness.dispatcher.unsubscribe(PayloadKind::ChatMessage);
        assert!(!harness.dispatcher.is_subscribed(PayloadKind::ChatMessage));
    }

    #[test]
    fn test_own_position_is_reconciled() {
        let mut harness = Harness::new();
        harness.connect();
        harness.prediction.apply_input(Vec3::X, 1.0, 1.0);

        let result = harness.dispatch(Payload::ClientPosition(ClientPosition::new(
            "pub",
            Vec3::new(5.6, 0.0, 0.0),
            Vec3::ZERO,
            1.0,
        )));

        assert!(matches!(result, Some(Reconciliation::Corrected { .. })));
        assert!(harness.remotes.is_empty());
    }

    #[test]
    fn test_other_positions_feed_interpolation() {
        let mut harness = Harness::new();
        harness.connect();

        let result = harness.dispatch(Payload::ClientPosition(ClientPosition::new(
            "someone-else",
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::X,
            0.5,
        )));

        assert!(result.is_none());
        let entity = harness.remotes.get("someone-else").unwrap();
        assert_eq!(entity.position(), Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(entity.snapshots().next().unwrap().timestamp, 1.0);
    }
}
