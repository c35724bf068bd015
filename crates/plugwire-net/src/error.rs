use std::time::Duration;

use plugwire_channel::ChannelError;
use plugwire_frame::{BufError, FrameError, Opcode};
use plugwire_transport::{ConnectionId, TransportError};

/// Errors raised by the channel network.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Registry, codec or responder error.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Payload encoding/decoding error.
    #[error("codec error: {0}")]
    Buf(#[from] BufError),

    /// The host transport refused the frame.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Advertisement JSON could not be encoded or parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The capability advertisement was rejected.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The connection is not known to the network.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The remote did not advertise the channel.
    #[error("channel '{channel}' not supported by {connection}")]
    UnsupportedChannel {
        connection: ConnectionId,
        channel: String,
    },

    /// The opcode carries the other kind of frame.
    #[error("opcode {opcode} on '{channel}' expects a {expected} frame, got {found}")]
    FrameKindMismatch {
        channel: String,
        opcode: Opcode,
        expected: &'static str,
        found: &'static str,
    },

    /// Too many requests are in flight on the connection.
    #[error("too many pending requests on {connection} (max {max})")]
    TooManyPending { connection: ConnectionId, max: usize },

    /// The request timeout cannot be represented as a deadline.
    #[error("request timeout {0:?} is out of range")]
    InvalidTimeout(Duration),

    /// No response arrived before the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection closed while the request was pending.
    #[error("connection {0} closed")]
    ConnectionClosed(ConnectionId),

    /// The request was cancelled locally.
    #[error("request cancelled")]
    Cancelled,
}

impl NetError {
    /// True for the failure outcomes of a transaction.
    pub fn is_transaction_failure(&self) -> bool {
        matches!(
            self,
            NetError::Timeout(_) | NetError::ConnectionClosed(_) | NetError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, NetError>;
