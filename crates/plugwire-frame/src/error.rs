/// Errors raised by [`ChannelBuf`](crate::ChannelBuf) reads and writes.
#[derive(Debug, thiserror::Error)]
pub enum BufError {
    /// A read needed more bytes than the buffer holds.
    #[error("buffer underflow ({needed} bytes needed, {remaining} remaining)")]
    Underflow { needed: usize, remaining: usize },

    /// A write would grow the buffer beyond its hard limit.
    #[error("buffer overflow ({needed} bytes needed, max {max})")]
    Overflow { needed: usize, max: usize },

    /// A length prefix is negative or larger than allowed.
    #[error("malformed length prefix {length} (max {max})")]
    MalformedLength { length: i64, max: usize },

    /// A VarInt used more than 5 groups.
    #[error("VarInt longer than 5 bytes")]
    VarIntTooLong,

    /// A VarLong used more than 10 groups.
    #[error("VarLong longer than 10 bytes")]
    VarLongTooLong,

    /// A string is not valid UTF-8.
    #[error("invalid UTF-8 in string: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A boolean byte was neither 0 nor 1.
    #[error("invalid boolean byte 0x{0:02x}")]
    InvalidBool(u8),
}

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header or payload could not be read or written.
    #[error("frame buffer error: {0}")]
    Buf(#[from] BufError),

    /// The flags byte has unknown bits or both request and response set.
    #[error("invalid frame flags 0b{0:08b}")]
    InvalidFlags(u8),

    /// The frame is larger than the configured maximum.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The channel id field is empty.
    #[error("frame has an empty channel id")]
    EmptyChannel,
}

pub type Result<T> = std::result::Result<T, BufError>;
pub type FrameResult<T> = std::result::Result<T, FrameError>;
