use std::fmt;

use plugwire_channel::ChannelError;
use plugwire_frame::FrameError;
use plugwire_net::NetError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn hex_error(context: &str, err: hex::FromHexError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

/// Every frame codec failure means the input bytes are bad.
pub fn frame_error(context: &str, err: FrameError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    CliError::new(channel_code(&err), format!("{context}: {err}"))
}

fn channel_code(err: &ChannelError) -> i32 {
    match err {
        ChannelError::InvalidId { .. } | ChannelError::ReservedChannel(_) => USAGE,
        ChannelError::Frame(_) | ChannelError::Buf(_) | ChannelError::TrailingBytes { .. } => {
            DATA_INVALID
        }
        ChannelError::Transport(_) => FAILURE,
        _ => INTERNAL,
    }
}

pub fn net_error(context: &str, err: NetError) -> CliError {
    let code = match &err {
        NetError::Timeout(_) => TIMEOUT,
        NetError::Handshake(_) | NetError::Json(_) | NetError::Frame(_) | NetError::Buf(_) => {
            DATA_INVALID
        }
        NetError::UnsupportedChannel { .. } | NetError::InvalidTimeout(_) => USAGE,
        NetError::ConnectionClosed(_) | NetError::Cancelled | NetError::Transport(_) => FAILURE,
        NetError::Channel(inner) => channel_code(inner),
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use plugwire_transport::ConnectionId;

    use super::*;

    #[test]
    fn timeout_maps_to_timeout_code() {
        let err = net_error("ping failed", NetError::Timeout(Duration::from_millis(50)));
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("ping failed: "));
    }

    #[test]
    fn out_of_range_timeout_is_usage() {
        let err = net_error("ping failed", NetError::InvalidTimeout(Duration::MAX));
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn closed_connection_is_plain_failure() {
        let err = net_error("ping failed", NetError::ConnectionClosed(ConnectionId::new(3)));
        assert_eq!(err.code, FAILURE);
    }

    #[test]
    fn bad_channel_id_is_usage() {
        let err = channel_error(
            "encode failed",
            ChannelError::InvalidId {
                id: "nocolon".into(),
                reason: "missing ':'",
            },
        );
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn frame_errors_are_data_invalid() {
        assert_eq!(
            frame_error("decode failed", FrameError::InvalidFlags(3)).code,
            DATA_INVALID
        );
    }
}
