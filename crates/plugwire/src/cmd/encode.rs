use plugwire_channel::ChannelId;
use plugwire_frame::{encode_frame, FrameConfig, FrameHeader, FrameKind};
use serde::Serialize;

use crate::cmd::{parse_hex, EncodeArgs};
use crate::exit::{channel_error, frame_error, hex_error, CliResult, SUCCESS};
use crate::output::{print_report, OutputFormat, Report};

#[derive(Debug, Serialize)]
pub struct EncodedReport {
    pub channel: String,
    pub kind: &'static str,
    pub size: usize,
    pub frame: String,
}

impl Report for EncodedReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("channel", self.channel.clone()),
            ("kind", self.kind.to_string()),
            ("size", self.size.to_string()),
            ("frame", self.frame.clone()),
        ]
    }
}

pub fn build(args: &EncodeArgs) -> CliResult<EncodedReport> {
    // Reserved ids are allowed here so register-channel frames can be crafted.
    let channel =
        ChannelId::parse(&args.channel).map_err(|err| channel_error("bad --channel", err))?;
    let kind = match (args.request, args.response) {
        (Some(id), _) => FrameKind::Request(id),
        (None, Some(id)) => FrameKind::Response(id),
        (None, None) => FrameKind::Message,
    };
    let payload = match &args.data {
        Some(data) => parse_hex(data).map_err(|err| hex_error("invalid --data hex", err))?,
        None => Vec::new(),
    };

    let header = FrameHeader::new(channel.as_str(), args.opcode, kind);
    let bytes = encode_frame(&header, &payload, &FrameConfig::default())
        .map_err(|err| frame_error("encode failed", err))?;

    Ok(EncodedReport {
        channel: channel.to_string(),
        kind: kind.name(),
        size: bytes.len(),
        frame: hex::encode(&bytes),
    })
}

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let report = build(&args)?;
    match format {
        // Pretty output is the bare hex so it can be piped into `decode`.
        OutputFormat::Pretty => println!("{}", report.frame),
        _ => print_report(&report, format),
    }
    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::decode::inspect;
    use crate::exit::{DATA_INVALID, USAGE};

    fn args(channel: &str) -> EncodeArgs {
        EncodeArgs {
            channel: channel.to_string(),
            opcode: 0,
            request: None,
            response: None,
            data: None,
        }
    }

    #[test]
    fn message_layout() {
        let report = build(&EncodeArgs {
            data: Some("ff".into()),
            ..args("a:b")
        })
        .unwrap();
        // len 3, "a:b", opcode 0, flags 0, payload ff
        assert_eq!(report.frame, "03613a620000ff");
        assert_eq!(report.kind, "message");
        assert_eq!(report.size, 7);
    }

    #[test]
    fn response_carries_transaction() {
        let report = build(&EncodeArgs {
            opcode: 2,
            response: Some(0x0102_0304),
            ..args("myplugin:ping")
        })
        .unwrap();
        let decoded = inspect(&hex::decode(&report.frame).unwrap()).unwrap();
        assert_eq!(decoded.kind, "response");
        assert_eq!(decoded.transaction, Some(0x0102_0304));
        assert_eq!(decoded.opcode, 2);
        assert_eq!(decoded.payload_size, 0);
    }

    #[test]
    fn invalid_inputs() {
        assert_eq!(build(&args("NoColon")).unwrap_err().code, USAGE);
        let bad_hex = EncodeArgs {
            data: Some("xyz".into()),
            ..args("a:b")
        };
        assert_eq!(build(&bad_hex).unwrap_err().code, DATA_INVALID);
    }
}
