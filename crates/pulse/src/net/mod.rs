mod endpoint;
mod protocol;
mod stats;
mod transport;

pub use endpoint::NetworkEndpoint;
pub use protocol::sequence_greater_than;
pub use protocol::{
    ChatMessage, ClientPosition, DEFAULT_HOST, DEFAULT_PORT, Envelope, HandshakeRequest,
    HandshakeResponse, Heartbeat, LobbyJoin, MAX_PACKET_SIZE, PENDING_ID, PacketError, Payload,
    PayloadKind, ReconnectionRequest, ReconnectionResponse, ServerStatus, UsernamePrompt,
    UsernameResponse, UsernameSubmission, Vector3,
};
pub use stats::{NetworkStats, hash_with_time, rand_u64, random_hex_id, unix_nanos};
pub use transport::{
    DEFAULT_INBOX_CAPACITY, Datagram, Transport, TransportError, resolve_server_addr,
};
