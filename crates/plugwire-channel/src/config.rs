/// Limits applied while plugins register channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Maximum number of channels in one registry.
    pub max_channels: usize,
    /// Maximum length of a channel id in bytes.
    pub max_channel_id_len: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_channels: 1024,
            max_channel_id_len: 256,
        }
    }
}
