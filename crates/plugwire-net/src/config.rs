use std::time::Duration;

use plugwire_frame::FrameConfig;

use crate::handshake::HandshakeConfig;

/// Configuration for a [`ChannelNetwork`](crate::ChannelNetwork).
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Timeout used when a request does not name one. Default: 10s.
    pub default_request_timeout: Duration,
    /// Maximum requests in flight per connection. Default: 1024.
    pub max_pending_per_connection: usize,
    /// Frame limits for inbound and outbound frames.
    pub frame: FrameConfig,
    /// Capability advertisement settings.
    pub handshake: HandshakeConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            default_request_timeout: Duration::from_secs(10),
            max_pending_per_connection: 1024,
            frame: FrameConfig::default(),
            handshake: HandshakeConfig::default(),
        }
    }
}

impl NetworkConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.default_request_timeout = timeout;
        self
    }

    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending_per_connection = max;
        self
    }

    pub fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }
}
