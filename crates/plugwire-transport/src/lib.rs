//! Host connection abstraction for the plugwire channel layer.
//!
//! The channel layer never owns a connection. The host hands it a
//! [`Connection`]: an identity plus a [`RawSender`] that puts complete
//! channel frames on the wire. Everything below that (handshake, compression,
//! encryption, outer framing) belongs to the host.
//!
//! [`memory`] provides linked in-memory endpoints for loopback tooling and
//! tests.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{link, MemoryEndpoint};
pub use traits::{Connection, ConnectionId, RawSender};
