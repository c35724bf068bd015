use crate::traits::ConnectionId;

/// Errors raised by a host transport when handing over a frame.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has been closed by either side.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// The host refused the frame (backpressure, policy).
    #[error("send rejected on {connection}: {reason}")]
    Rejected {
        connection: ConnectionId,
        reason: String,
    },

    /// An I/O error occurred in the host transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
