//! Plugin channel registry.
//!
//! Plugins register namespaced channels and bind packet codecs and handlers
//! to per-channel opcodes while the registry is open. The host seals the
//! registry when networking starts; from then on the tables are immutable
//! and read without locking.

pub mod binding;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod id;
pub mod registry;

pub use binding::{ChannelBinding, Handler, HandlerError, HandlerResult, OpcodeEntry};
pub use codec::{AnyPacket, PacketCodec};
pub use config::RegistryConfig;
pub use context::{ErasedResponder, PacketContext, Responder};
pub use error::{ChannelError, Result};
pub use id::ChannelId;
pub use registry::{ChannelBinder, ChannelRegistry};

pub use plugwire_frame::{Opcode, TransactionId};
