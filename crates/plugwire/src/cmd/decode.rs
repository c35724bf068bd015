use plugwire_frame::{decode_frame, is_reserved, FrameConfig};
use serde::Serialize;
use tracing::debug;

use crate::cmd::{parse_hex, DecodeArgs};
use crate::exit::{frame_error, hex_error, CliResult, SUCCESS};
use crate::output::{payload_preview, print_report, OutputFormat, Report};

#[derive(Debug, Serialize)]
pub struct FrameReport {
    pub channel: String,
    pub reserved: bool,
    pub opcode: u8,
    pub kind: &'static str,
    pub transaction: Option<u32>,
    pub frame_size: usize,
    pub payload_size: usize,
    pub payload: String,
}

impl Report for FrameReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("channel", self.channel.clone()),
            ("opcode", self.opcode.to_string()),
            ("kind", self.kind.to_string()),
            (
                "txn",
                self.transaction
                    .map_or_else(|| "-".to_string(), |id| id.to_string()),
            ),
            ("size", self.payload_size.to_string()),
            ("payload", self.payload.clone()),
        ]
    }
}

pub fn inspect(bytes: &[u8]) -> CliResult<FrameReport> {
    let frame = decode_frame(bytes, &FrameConfig::default())
        .map_err(|err| frame_error("decode failed", err))?;
    let payload = frame.payload.remaining_slice();
    debug!(
        channel = %frame.header.channel,
        opcode = frame.header.opcode,
        payload = payload.len(),
        "decoded frame"
    );

    Ok(FrameReport {
        reserved: is_reserved(&frame.header.channel),
        opcode: frame.header.opcode,
        kind: frame.header.kind.name(),
        transaction: frame.header.kind.transaction(),
        frame_size: bytes.len(),
        payload_size: payload.len(),
        payload: payload_preview(payload),
        channel: frame.header.channel,
    })
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex).map_err(|err| hex_error("invalid frame hex", err))?;
    let report = inspect(&bytes)?;
    print_report(&report, format);
    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use plugwire_frame::{encode_frame, FrameHeader, FrameKind};

    use super::*;
    use crate::exit::DATA_INVALID;

    #[test]
    fn inspects_a_request_frame() {
        let header = FrameHeader::new("myplugin:chat", 3, FrameKind::Request(9));
        let bytes = encode_frame(&header, b"hi", &FrameConfig::default()).unwrap();

        let report = inspect(&bytes).unwrap();
        assert_eq!(report.channel, "myplugin:chat");
        assert!(!report.reserved);
        assert_eq!(report.opcode, 3);
        assert_eq!(report.kind, "request");
        assert_eq!(report.transaction, Some(9));
        assert_eq!(report.payload_size, 2);
        assert_eq!(report.payload, "hi");
        assert_eq!(report.frame_size, bytes.len());
    }

    #[test]
    fn truncated_frame_is_data_invalid() {
        let header = FrameHeader::new("myplugin:chat", 0, FrameKind::Response(1));
        let bytes = encode_frame(&header, &[], &FrameConfig::default()).unwrap();
        let err = inspect(&bytes[..bytes.len() - 2]).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
    }
}
