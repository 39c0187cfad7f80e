use glam::Vec3;
use prost::Message;

pub const MAX_PACKET_SIZE: usize = 1200;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9999;

/// Id value the server puts in both fields of a phase-one `HandshakeResponse`.
pub const PENDING_ID: &str = "pending";

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Clone, Copy, PartialEq, Message)]
pub struct Vector3 {
    #[prost(float, tag = "1")]
    pub x: f32,
    #[prost(float, tag = "2")]
    pub y: f32,
    #[prost(float, tag = "3")]
    pub z: f32,
}

impl From<Vec3> for Vector3 {
    fn from(v: Vec3) -> Self {
        Self {
            x: v.x,
            y: v.y,
            z: v.z,
        }
    }
}

impl From<Vector3> for Vec3 {
    fn from(v: Vector3) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct HandshakeRequest {
    #[prost(string, tag = "1")]
    pub client_name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct HandshakeResponse {
    #[prost(string, tag = "1")]
    pub private_id: String,
    #[prost(string, tag = "2")]
    pub public_id: String,
}

impl HandshakeResponse {
    pub fn pending() -> Self {
        Self {
            private_id: PENDING_ID.to_string(),
            public_id: PENDING_ID.to_string(),
        }
    }

    /// Phase-one acknowledgement: transport accepted, identity deferred.
    pub fn is_pending(&self) -> bool {
        self.private_id == PENDING_ID && self.public_id == PENDING_ID
    }
}

/// Shared by `heartbeat` and `heartbeat_ack`.
#[derive(Clone, PartialEq, Message)]
pub struct Heartbeat {
    #[prost(string, tag = "1")]
    pub client_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientPosition {
    #[prost(string, tag = "1")]
    pub client_id: String,
    #[prost(message, optional, tag = "2")]
    pub position: Option<Vector3>,
    #[prost(message, optional, tag = "3")]
    pub velocity: Option<Vector3>,
    #[prost(double, tag = "4")]
    pub timestamp: f64,
}

impl ClientPosition {
    pub fn new(
        client_id: impl Into<String>,
        position: Vec3,
        velocity: Vec3,
        timestamp: f64,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            position: Some(position.into()),
            velocity: Some(velocity.into()),
            timestamp,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position.map(Vec3::from).unwrap_or(Vec3::ZERO)
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity.map(Vec3::from).unwrap_or(Vec3::ZERO)
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ChatMessage {
    #[prost(string, tag = "1")]
    pub client_id: String,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct LobbyJoin {
    #[prost(string, tag = "1")]
    pub public_id: String,
    #[prost(string, tag = "2")]
    pub color_hex: String,
    #[prost(message, optional, tag = "3")]
    pub position: Option<Vector3>,
    #[prost(bool, tag = "4")]
    pub is_local_player: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct ServerStatus {
    #[prost(string, tag = "1")]
    pub client_id: String,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct UsernamePrompt {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct UsernameSubmission {
    #[prost(string, tag = "1")]
    pub username: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct UsernameResponse {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(bool, tag = "2")]
    pub is_accepted: bool,
    #[prost(string, tag = "3")]
    pub message: String,
    #[prost(string, repeated, tag = "4")]
    pub suggestions: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ReconnectionRequest {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, tag = "2")]
    pub session_token: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ReconnectionResponse {
    #[prost(bool, tag = "1")]
    pub is_successful: bool,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(string, tag = "3")]
    pub private_id: String,
    #[prost(string, tag = "4")]
    pub public_id: String,
}

/// Payload carried by an [`Envelope`]. Tags 2..=14 of the envelope message.
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Payload {
    #[prost(message, tag = "2")]
    HandshakeRequest(HandshakeRequest),
    #[prost(message, tag = "3")]
    HandshakeResponse(HandshakeResponse),
    #[prost(message, tag = "4")]
    Heartbeat(Heartbeat),
    #[prost(message, tag = "5")]
    HeartbeatAck(Heartbeat),
    #[prost(message, tag = "6")]
    ClientPosition(ClientPosition),
    #[prost(message, tag = "7")]
    ChatMessage(ChatMessage),
    #[prost(message, tag = "8")]
    LobbyJoin(LobbyJoin),
    #[prost(message, tag = "9")]
    ServerStatus(ServerStatus),
    #[prost(message, tag = "10")]
    UsernamePrompt(UsernamePrompt),
    #[prost(message, tag = "11")]
    UsernameSubmission(UsernameSubmission),
    #[prost(message, tag = "12")]
    UsernameResponse(UsernameResponse),
    #[prost(message, tag = "13")]
    ReconnectionRequest(ReconnectionRequest),
    #[prost(message, tag = "14")]
    ReconnectionResponse(ReconnectionResponse),
}

/// Fieldless tag of a [`Payload`], usable as a table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    HandshakeRequest,
    HandshakeResponse,
    Heartbeat,
    HeartbeatAck,
    ClientPosition,
    ChatMessage,
    LobbyJoin,
    ServerStatus,
    UsernamePrompt,
    UsernameSubmission,
    UsernameResponse,
    ReconnectionRequest,
    ReconnectionResponse,
}

impl PayloadKind {
    pub const COUNT: usize = 13;

    pub const ALL: [PayloadKind; Self::COUNT] = [
        Self::HandshakeRequest,
        Self::HandshakeResponse,
        Self::Heartbeat,
        Self::HeartbeatAck,
        Self::ClientPosition,
        Self::ChatMessage,
        Self::LobbyJoin,
        Self::ServerStatus,
        Self::UsernamePrompt,
        Self::UsernameSubmission,
        Self::UsernameResponse,
        Self::ReconnectionRequest,
        Self::ReconnectionResponse,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::HandshakeRequest(_) => PayloadKind::HandshakeRequest,
            Self::HandshakeResponse(_) => PayloadKind::HandshakeResponse,
            Self::Heartbeat(_) => PayloadKind::Heartbeat,
            Self::HeartbeatAck(_) => PayloadKind::HeartbeatAck,
            Self::ClientPosition(_) => PayloadKind::ClientPosition,
            Self::ChatMessage(_) => PayloadKind::ChatMessage,
            Self::LobbyJoin(_) => PayloadKind::LobbyJoin,
            Self::ServerStatus(_) => PayloadKind::ServerStatus,
            Self::UsernamePrompt(_) => PayloadKind::UsernamePrompt,
            Self::UsernameSubmission(_) => PayloadKind::UsernameSubmission,
            Self::UsernameResponse(_) => PayloadKind::UsernameResponse,
            Self::ReconnectionRequest(_) => PayloadKind::ReconnectionRequest,
            Self::ReconnectionResponse(_) => PayloadKind::ReconnectionResponse,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(uint32, tag = "1")]
    pub seq: u32,
    #[prost(oneof = "Payload", tags = "2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14")]
    pub payload: Option<Payload>,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("encoding failed: {0}")]
    Encode(#[from] prost::EncodeError),
    #[error("decoding failed: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("packet of {size} bytes exceeds the {limit} byte limit", limit = MAX_PACKET_SIZE)]
    TooLarge { size: usize },
}

impl Envelope {
    pub fn new(seq: u32, payload: Payload) -> Self {
        Self {
            seq,
            payload: Some(payload),
        }
    }

    pub fn kind(&self) -> Option<PayloadKind> {
        self.payload.as_ref().map(Payload::kind)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        let size = self.encoded_len();
        if size > MAX_PACKET_SIZE {
            return Err(PacketError::TooLarge { size });
        }

        let mut buf = Vec::with_capacity(size);
        self.encode(&mut buf)?;
        Ok(buf)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(PacketError::TooLarge { size: data.len() });
        }
        Ok(Self::decode(data)?)
    }
}
