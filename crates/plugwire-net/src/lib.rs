//! Channel network: the channel layer bound to live host connections.
//!
//! Tracks which channels each remote advertised, sends and broadcasts
//! packets, correlates requests with responses, and hands inbound packets
//! from the network threads to the game-logic thread in arrival order.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod network;
pub mod transaction;

pub use config::NetworkConfig;
pub use dispatch::{
    Delivery, DispatchQueue, DispatchReport, FailureHook, HandlerFailure, Inbound, ResponseArrival,
};
pub use error::{NetError, Result};
pub use handshake::{
    is_version_compatible, normalize_channels, Advertisement, HandshakeConfig, ADVERTISE_OPCODE,
};
pub use network::{ChannelNetwork, Ingested};
pub use transaction::{Expected, PendingRequest, TransactionManager, TransactionState};
