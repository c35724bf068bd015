use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use plugwire_frame::channel::{is_reserved, namespace_of};

use crate::error::{ChannelError, Result};

const DEFAULT_MAX_ID_LEN: usize = 256;

/// Namespaced, case-sensitive channel identifier: `<namespace>:<path>`.
///
/// The namespace allows `a-z 0-9 _ . -`; the path additionally allows `/`.
/// Both parts must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(Arc<str>);

impl ChannelId {
    /// Parse and validate a channel id.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::parse_with_max(raw, DEFAULT_MAX_ID_LEN)
    }

    /// Parse with an explicit length limit.
    pub fn parse_with_max(raw: &str, max_len: usize) -> Result<Self> {
        validate(raw, max_len)?;
        Ok(Self(Arc::from(raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> &str {
        namespace_of(&self.0).unwrap_or_default()
    }

    pub fn path(&self) -> &str {
        self.0.split_once(':').map(|(_, path)| path).unwrap_or_default()
    }

    /// True for ids in the namespace owned by the channel layer.
    pub fn is_reserved(&self) -> bool {
        is_reserved(&self.0)
    }
}

fn validate(raw: &str, max_len: usize) -> Result<()> {
    let invalid = |reason| ChannelError::InvalidId {
        id: raw.to_string(),
        reason,
    };

    if raw.is_empty() {
        return Err(invalid("empty"));
    }
    if raw.len() > max_len {
        return Err(invalid("too long"));
    }
    let (namespace, path) = raw.split_once(':').ok_or_else(|| invalid("missing ':'"))?;
    if namespace.is_empty() {
        return Err(invalid("empty namespace"));
    }
    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    if !namespace.bytes().all(is_namespace_byte) {
        return Err(invalid("namespace allows only [a-z0-9_.-]"));
    }
    if !path.bytes().all(|b| is_namespace_byte(b) || b == b'/') {
        return Err(invalid("path allows only [a-z0-9_.-/]"));
    }
    Ok(())
}

fn is_namespace_byte(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'_' | b'.' | b'-')
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ChannelId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for ChannelId {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for ChannelId {
    type Error = ChannelError;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}
