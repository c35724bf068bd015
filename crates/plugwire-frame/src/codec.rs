use bytes::Bytes;

use crate::buf::{ChannelBuf, DEFAULT_MAX_STRING_LEN};
use crate::error::{BufError, FrameError, FrameResult};

/// Flags bit 0: the frame opens a transaction.
pub const FLAG_REQUEST: u8 = 0b0000_0001;

/// Flags bit 1: the frame answers a transaction.
pub const FLAG_RESPONSE: u8 = 0b0000_0010;

/// Default maximum frame size: 2 MiB.
pub const DEFAULT_MAX_FRAME: usize = 2 * 1024 * 1024;

/// Per-connection transaction identifier.
pub type TransactionId = u32;

/// Opcode identifying a packet type within one channel.
pub type Opcode = u8;

/// What a frame carries besides its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Fire-and-forget packet.
    Message,
    /// Request expecting one response with the same id.
    Request(TransactionId),
    /// Response to the request with this id.
    Response(TransactionId),
}

impl FrameKind {
    pub fn flags(self) -> u8 {
        match self {
            FrameKind::Message => 0,
            FrameKind::Request(_) => FLAG_REQUEST,
            FrameKind::Response(_) => FLAG_RESPONSE,
        }
    }

    pub fn transaction(self) -> Option<TransactionId> {
        match self {
            FrameKind::Message => None,
            FrameKind::Request(id) | FrameKind::Response(id) => Some(id),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameKind::Message => "message",
            FrameKind::Request(_) => "request",
            FrameKind::Response(_) => "response",
        }
    }
}

/// Routing header of a channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub channel: String,
    pub opcode: Opcode,
    pub kind: FrameKind,
}

impl FrameHeader {
    pub fn new(channel: impl Into<String>, opcode: Opcode, kind: FrameKind) -> Self {
        Self {
            channel: channel.into(),
            opcode,
            kind,
        }
    }
}

/// A decoded frame: header plus a buffer positioned at the payload.
#[derive(Debug)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: ChannelBuf,
}

impl Frame {
    pub fn payload_len(&self) -> usize {
        self.payload.readable()
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum encoded frame size in bytes. Default: 2 MiB.
    pub max_frame_size: usize,
    /// Maximum string length accepted by payload buffers.
    pub max_string_len: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME,
            max_string_len: DEFAULT_MAX_STRING_LEN,
        }
    }
}

impl FrameConfig {
    /// An empty buffer sized for one outgoing frame.
    pub fn new_buf(&self) -> ChannelBuf {
        ChannelBuf::with_limits(self.max_frame_size, self.max_string_len)
    }
}

/// Write the frame header.
///
/// Wire format:
/// ```text
/// ┌────────────────────┬──────────┬─────────┬──────────────────┬──────────┐
/// │ Channel id         │ Opcode   │ Flags   │ Transaction id   │ Payload  │
/// │ VarInt len + UTF-8 │ (1B)     │ (1B)    │ (4B BE, only for │ (rest)   │
/// │                    │          │         │ request/response)│          │
/// └────────────────────┴──────────┴─────────┴──────────────────┴──────────┘
/// ```
pub fn encode_header(header: &FrameHeader, dst: &mut ChannelBuf) -> FrameResult<()> {
    if header.channel.is_empty() {
        return Err(FrameError::EmptyChannel);
    }
    dst.write_string(&header.channel)?;
    dst.write_u8(header.opcode)?;
    dst.write_u8(header.kind.flags())?;
    if let Some(id) = header.kind.transaction() {
        dst.write_u32(id)?;
    }
    Ok(())
}

/// Read the frame header, leaving `src` positioned at the payload.
pub fn decode_header(src: &mut ChannelBuf) -> FrameResult<FrameHeader> {
    let channel = src.read_string()?;
    if channel.is_empty() {
        return Err(FrameError::EmptyChannel);
    }
    let opcode = src.read_u8()?;
    let flags = src.read_u8()?;
    let kind = match flags {
        0 => FrameKind::Message,
        FLAG_REQUEST => FrameKind::Request(src.read_u32()?),
        FLAG_RESPONSE => FrameKind::Response(src.read_u32()?),
        other => return Err(FrameError::InvalidFlags(other)),
    };
    Ok(FrameHeader {
        channel,
        opcode,
        kind,
    })
}

/// Start an outgoing frame: a buffer holding the header, ready for payload.
pub fn begin_frame(header: &FrameHeader, config: &FrameConfig) -> FrameResult<ChannelBuf> {
    let mut buf = config.new_buf();
    encode_header(header, &mut buf).map_err(|err| match err {
        FrameError::Buf(err) => oversize(err, config),
        other => other,
    })?;
    Ok(buf)
}

/// Finish an outgoing frame started with [`begin_frame`].
pub fn finish_frame(buf: ChannelBuf, config: &FrameConfig) -> FrameResult<Bytes> {
    let size = buf.write_index();
    if size > config.max_frame_size {
        return Err(FrameError::FrameTooLarge {
            size,
            max: config.max_frame_size,
        });
    }
    Ok(buf.freeze())
}

/// Encode a complete frame from a header and an already encoded payload.
pub fn encode_frame(header: &FrameHeader, payload: &[u8], config: &FrameConfig) -> FrameResult<Bytes> {
    let mut buf = begin_frame(header, config)?;
    buf.write_raw(payload).map_err(|err| oversize(err, config))?;
    finish_frame(buf, config)
}

/// Decode a received frame.
pub fn decode_frame(bytes: &[u8], config: &FrameConfig) -> FrameResult<Frame> {
    if bytes.len() > config.max_frame_size {
        return Err(FrameError::FrameTooLarge {
            size: bytes.len(),
            max: config.max_frame_size,
        });
    }
    let mut payload =
        ChannelBuf::from_slice_with_limits(bytes, config.max_frame_size, config.max_string_len);
    let header = decode_header(&mut payload)?;
    Ok(Frame { header, payload })
}

fn oversize(err: BufError, config: &FrameConfig) -> FrameError {
    match err {
        BufError::Overflow { needed, .. } => FrameError::FrameTooLarge {
            size: needed,
            max: config.max_frame_size,
        },
        other => FrameError::Buf(other),
    }
}
