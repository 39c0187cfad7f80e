pub mod net;

pub use net::{
    ChatMessage, ClientPosition, DEFAULT_HOST, DEFAULT_PORT, Datagram, Envelope,
    HandshakeRequest, HandshakeResponse, Heartbeat, LobbyJoin, MAX_PACKET_SIZE, NetworkEndpoint,
    NetworkStats, PENDING_ID, PacketError, Payload, PayloadKind, ReconnectionRequest,
    ReconnectionResponse, ServerStatus, Transport, TransportError, UsernamePrompt,
    UsernameResponse, UsernameSubmission, Vector3,
};
