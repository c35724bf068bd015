//! Buffers, packet codecs and channel-frame headers.
//!
//! Every plugin message travels in a frame:
//! - the channel id (`<namespace>:<path>`, VarInt-prefixed UTF-8)
//! - a 1-byte opcode selecting the packet type within the channel
//! - a 1-byte flags field (request / response)
//! - a 4-byte transaction id for requests and responses
//! - the codec-defined payload, up to the end of the frame
//!
//! The outer length prefix belongs to the host transport.

pub mod buf;
pub mod channel;
pub mod codec;
pub mod error;
pub mod packet;

pub use buf::{ChannelBuf, DEFAULT_MAX_CAPACITY, DEFAULT_MAX_STRING_LEN};
pub use channel::{is_reserved, namespace_of, REGISTER_CHANNEL, RESERVED_NAMESPACE};
pub use codec::{
    begin_frame, decode_frame, decode_header, encode_frame, encode_header, finish_frame, Frame,
    FrameConfig, FrameHeader, FrameKind, Opcode, TransactionId, DEFAULT_MAX_FRAME, FLAG_REQUEST,
    FLAG_RESPONSE,
};
pub use error::{BufError, FrameError, FrameResult, Result};
pub use packet::Packet;
