use std::fmt;

use glam::Vec3;

use pulse::Envelope;

use super::connection::ConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Manual,
    HandshakeTimeout,
    UsernameTimeout,
    HeartbeatTimeout,
    SendFailed,
    InvalidAddress,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Manual => "disconnected by client",
            Self::HandshakeTimeout => "handshake timed out",
            Self::UsernameTimeout => "username validation timed out",
            Self::HeartbeatTimeout => "server stopped acknowledging heartbeats",
            Self::SendFailed => "failed to send to server",
            Self::InvalidAddress => "invalid server address",
        };
        f.write_str(text)
    }
}

/// Notifications for the layers above the network client. Drained once per
/// frame with [`NetworkClient::drain_events`](super::NetworkClient::drain_events).
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected {
        private_id: String,
        public_id: String,
    },
    Disconnected {
        reason: DisconnectReason,
    },
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    UsernamePrompt {
        message: String,
    },
    UsernameRejected {
        message: String,
        suggestions: Vec<String>,
    },
    ServerMessage {
        client_id: String,
        message: String,
    },
    ChatMessage {
        client_id: String,
        message: String,
    },
    LobbyJoined {
        public_id: String,
        color_hex: String,
        position: Vec3,
        is_local_player: bool,
    },
    PacketReceived(Envelope),
}
