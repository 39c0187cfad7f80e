use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnecting {
        addr: SocketAddr,
    },
    ClientConnected {
        public_id: String,
        username: String,
        addr: SocketAddr,
    },
    ClientResumed {
        public_id: String,
        username: String,
        addr: SocketAddr,
    },
    ClientDisconnected {
        public_id: String,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Timeout,
    Replaced,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Replaced => "replaced by a resumed session",
        }
    }
}
