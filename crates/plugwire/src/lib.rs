//! Plugin network channels for game-server hosts.
//!
//! Plugins define their own binary packet types, register them on
//! namespaced channels, and exchange them over the connection the host
//! already maintains, optionally as request/response pairs.
//!
//! # Crate Structure
//!
//! - [`transport`]: Host connection handle and raw send primitive
//! - [`frame`]: Buffers, the `Packet` codec contract and the frame header
//! - [`channel`]: Channel ids, registry, bindings and handlers
//! - [`net`]: Connections, advertisements, transactions and dispatch (behind `net` feature)

/// Re-export transport types.
pub mod transport {
    pub use plugwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use plugwire_frame::*;
}

/// Re-export channel registry types.
pub mod channel {
    pub use plugwire_channel::*;
}

/// Re-export network types (requires `net` feature).
#[cfg(feature = "net")]
pub mod net {
    pub use plugwire_net::*;
}

/// The types most plugins and hosts need.
pub mod prelude {
    pub use plugwire_channel::{
        ChannelError, ChannelId, ChannelRegistry, HandlerResult, PacketContext, Responder,
    };
    pub use plugwire_frame::{BufError, ChannelBuf, Packet};
    pub use plugwire_transport::{Connection, ConnectionId, RawSender};

    #[cfg(feature = "net")]
    pub use plugwire_net::{ChannelNetwork, NetError, NetworkConfig, PendingRequest};
}
