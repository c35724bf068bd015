use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, TransportError};

/// Identity of a host connection.
///
/// Assigned by the host; the channel layer only uses it as a key for the
/// auxiliary state it attaches to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Raw byte send primitive supplied by the host for one connection.
///
/// Each call carries one complete channel frame. Implementations must keep
/// the order of calls made from a single thread.
pub trait RawSender: Send + Sync {
    /// Hand one frame to the transport.
    fn send_raw(&self, frame: Bytes) -> Result<()>;

    /// Whether the transport still accepts frames.
    fn is_open(&self) -> bool {
        true
    }
}

/// Opaque connection handle: identity plus the host's send primitive.
///
/// Cheap to clone; clones share the same sender.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    sender: Arc<dyn RawSender>,
}

impl Connection {
    pub fn new(id: ConnectionId, sender: Arc<dyn RawSender>) -> Self {
        Self { id, sender }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Send one encoded frame.
    pub fn send_raw(&self, frame: Bytes) -> Result<()> {
        if !self.sender.is_open() {
            return Err(TransportError::Closed(self.id));
        }
        self.sender.send_raw(frame)
    }

    pub fn is_open(&self) -> bool {
        self.sender.is_open()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("open", &self.sender.is_open())
            .finish()
    }
}
