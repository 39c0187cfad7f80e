pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod interpolation;
pub mod prediction;
pub mod schedule;
pub mod session;

pub use client::NetworkClient;
pub use config::{ClientConfig, ConfigError};
pub use connection::{ClientConnection, ConnectionState};
pub use dispatcher::{DispatchTargets, PacketDispatcher};
pub use events::{ClientEvent, DisconnectReason};
pub use interpolation::{InterpolationConfig, InterpolationEngine, MovementSnapshot, RemoteEntity};
pub use prediction::{ClientPrediction, LocalMovementRecord, Reconciliation};
pub use schedule::ReconnectSchedule;
pub use session::{Session, SessionManager};
