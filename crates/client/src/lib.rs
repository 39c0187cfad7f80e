pub mod net;

pub use net::{
    ClientConfig, ClientConnection, ClientEvent, ClientPrediction, ConnectionState,
    DisconnectReason, InterpolationEngine, NetworkClient, PacketDispatcher, Reconciliation,
    RemoteEntity, SessionManager,
};
