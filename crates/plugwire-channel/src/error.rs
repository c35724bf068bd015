use plugwire_frame::{BufError, FrameError, Opcode, TransactionId};
use plugwire_transport::TransportError;

use crate::id::ChannelId;

/// Errors raised by channel registration, packet codecs and responders.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The id is not a valid `<namespace>:<path>` channel id.
    #[error("invalid channel id '{id}': {reason}")]
    InvalidId { id: String, reason: &'static str },

    /// The id is in the namespace reserved for the channel layer.
    #[error("channel id '{0}' is in a reserved namespace")]
    ReservedChannel(String),

    /// A channel with this id is already registered.
    #[error("channel '{0}' is already registered")]
    DuplicateChannel(ChannelId),

    /// The opcode is already bound on this channel.
    #[error("opcode {opcode} is already bound on channel '{channel}'")]
    DuplicateOpcode { channel: ChannelId, opcode: Opcode },

    /// The packet type is already bound to another opcode on this channel.
    #[error("packet type {packet} is already bound on channel '{channel}'")]
    DuplicatePacketType {
        channel: ChannelId,
        packet: &'static str,
    },

    /// No channel with this id was registered.
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    /// No codec is bound to this opcode.
    #[error("unknown opcode {opcode} on channel '{channel}'")]
    UnknownOpcode { channel: String, opcode: Opcode },

    /// The packet type has no opcode on this channel.
    #[error("packet type {packet} is not bound on channel '{channel}'")]
    UnregisteredPacket {
        channel: ChannelId,
        packet: &'static str,
    },

    /// The registry is sealed; registration is over.
    #[error("channel registration is closed")]
    RegistrationClosed,

    /// The registry holds the maximum number of channels.
    #[error("too many channels (max {max})")]
    TooManyChannels { max: usize },

    /// A packet or handler does not match the type bound to the opcode.
    #[error("packet type mismatch (expected {expected}, found {found})")]
    PacketTypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Decoding left bytes in the payload.
    #[error("packet decode left {remaining} trailing bytes")]
    TrailingBytes { remaining: usize },

    /// The request was already answered.
    #[error("transaction {0} was already responded to")]
    AlreadyResponded(TransactionId),

    /// Packet encoding/decoding failed.
    #[error("codec error: {0}")]
    Buf(#[from] BufError),

    /// Frame encoding failed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The host transport refused the frame.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
