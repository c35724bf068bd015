use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod ping;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse a hex-encoded channel frame and print its header.
    Decode(DecodeArgs),
    /// Build a channel frame and print it as hex.
    Encode(EncodeArgs),
    /// Run a request/response round trip between two in-memory networks.
    Ping(PingArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Ping(args) => ping::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Frame bytes as hex (whitespace and a leading 0x are ignored).
    pub hex: String,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Channel id, `<namespace>:<path>`.
    #[arg(long, short = 'c')]
    pub channel: String,
    /// Opcode within the channel.
    #[arg(long, short = 'o', default_value = "0")]
    pub opcode: u8,
    /// Mark the frame as a request with this transaction id.
    #[arg(long, value_name = "TXN", conflicts_with = "response")]
    pub request: Option<u32>,
    /// Mark the frame as a response with this transaction id.
    #[arg(long, value_name = "TXN", conflicts_with = "request")]
    pub response: Option<u32>,
    /// Payload bytes as hex.
    #[arg(long, value_name = "HEX")]
    pub data: Option<String>,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Nonce carried by the ping.
    #[arg(long, default_value = "42")]
    pub nonce: u64,
    /// Request timeout (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
    /// Make the remote side ignore the request, forcing a timeout.
    #[arg(long)]
    pub drop: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Decode a hex argument, tolerating whitespace and a `0x` prefix.
pub(crate) fn parse_hex(input: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = compact
        .strip_prefix("0x")
        .or_else(|| compact.strip_prefix("0X"))
        .unwrap_or(&compact);
    hex::decode(digits)
}

/// Parse `500ms` / `2s` / `2` (seconds).
pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
