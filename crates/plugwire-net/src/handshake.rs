use std::collections::HashSet;

use plugwire_channel::ChannelId;
use serde::{Deserialize, Serialize};

use crate::error::{NetError, Result};

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;

/// Opcode used on the register channel for advertisements.
pub const ADVERTISE_OPCODE: u8 = 0;

/// Channel listing one side sends on `plugwire:register`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Advertisement {
    /// Protocol name. Must be `plugwire` by default.
    pub protocol: String,
    /// Protocol version string, `<major>.<minor>`.
    pub version: String,
    /// Channel ids registered by the sender.
    pub channels: Vec<String>,
}

/// Configuration for capability advertisements.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Expected protocol name.
    pub protocol_name: String,
    /// Local protocol version.
    pub protocol_version: String,
    /// Maximum channel ids accepted in one advertisement.
    pub max_advertised_channels: usize,
    /// Maximum advertisement payload size in bytes.
    pub max_handshake_payload: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_name: "plugwire".to_string(),
            protocol_version: "1.0".to_string(),
            max_advertised_channels: 1024,
            max_handshake_payload: 64 * 1024,
        }
    }
}

impl Advertisement {
    /// Advertisement for the locally registered channels.
    pub fn local(config: &HandshakeConfig, channels: &[ChannelId]) -> Self {
        Self {
            protocol: config.protocol_name.clone(),
            version: config.protocol_version.clone(),
            channels: channels.iter().map(ToString::to_string).collect(),
        }
    }

    /// Serialize to the JSON payload carried on the register channel.
    pub fn encode(&self, config: &HandshakeConfig) -> Result<Vec<u8>> {
        validate_protocol_name(&self.protocol)?;
        validate_version(&self.version)?;
        let payload = serde_json::to_vec(self)?;
        check_payload_size(payload.len(), config)?;
        Ok(payload)
    }

    /// Parse and validate a remote advertisement, returning its channel set.
    pub fn decode(payload: &[u8], config: &HandshakeConfig) -> Result<Vec<ChannelId>> {
        check_payload_size(payload.len(), config)?;
        let adv: Advertisement = serde_json::from_slice(payload)?;

        validate_protocol_name(&adv.protocol)?;
        validate_version(&adv.version)?;

        if adv.protocol != config.protocol_name {
            return Err(NetError::Handshake(format!(
                "unknown protocol '{}' (expected '{}')",
                adv.protocol, config.protocol_name
            )));
        }

        if !is_version_compatible(&config.protocol_version, &adv.version)? {
            return Err(NetError::Handshake(format!(
                "incompatible version '{}' (local '{}')",
                adv.version, config.protocol_version
            )));
        }

        normalize_channels(&adv.channels, config.max_advertised_channels)
    }
}

fn check_payload_size(len: usize, config: &HandshakeConfig) -> Result<()> {
    if len > config.max_handshake_payload {
        return Err(NetError::Handshake(format!(
            "advertisement too large: {} (max {})",
            len, config.max_handshake_payload
        )));
    }
    Ok(())
}

/// Validate advertised ids, collapsing duplicates and keeping first-seen order.
pub fn normalize_channels(channels: &[String], max: usize) -> Result<Vec<ChannelId>> {
    if channels.len() > max {
        return Err(NetError::Handshake(format!(
            "too many channels in advertisement: {} (max {})",
            channels.len(),
            max
        )));
    }

    let mut seen = HashSet::with_capacity(channels.len());
    let mut out = Vec::with_capacity(channels.len());

    for raw in channels {
        let id = ChannelId::parse(raw)
            .map_err(|err| NetError::Handshake(format!("bad channel id: {err}")))?;
        if id.is_reserved() {
            return Err(NetError::Handshake(format!(
                "reserved channel '{id}' must not be advertised"
            )));
        }
        if seen.insert(id.clone()) {
            out.push(id);
        }
    }

    Ok(out)
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(NetError::Handshake(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(NetError::Handshake(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    let _ = parse_version(version)?;
    Ok(())
}

/// Advertisements interoperate when the major versions match.
pub fn is_version_compatible(local: &str, remote: &str) -> Result<bool> {
    let (local_major, _) = parse_version(local)?;
    let (remote_major, _) = parse_version(remote)?;
    Ok(local_major == remote_major)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let invalid = |what: &str| NetError::Handshake(format!("invalid version '{version}': {what}"));

    let (major, minor) = version
        .split_once('.')
        .ok_or_else(|| invalid("expected '<major>.<minor>'"))?;
    if minor.contains('.') {
        return Err(invalid("expected '<major>.<minor>'"));
    }

    let major = major
        .parse::<u16>()
        .map_err(|_| invalid("non-numeric major"))?;
    let minor = minor
        .parse::<u16>()
        .map_err(|_| invalid("non-numeric minor"))?;

    Ok((major, minor))
}
