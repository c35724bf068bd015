//! Reserved channel ids.
//!
//! The `plugwire` namespace belongs to the channel layer itself. Plugins
//! cannot register channels in it.

/// Namespace reserved for the channel layer.
pub const RESERVED_NAMESPACE: &str = "plugwire";

/// Channel carrying the capability advertisement (list of registered channels).
pub const REGISTER_CHANNEL: &str = "plugwire:register";

/// Returns the namespace part of a `<namespace>:<path>` id, if any.
pub fn namespace_of(channel: &str) -> Option<&str> {
    channel.split_once(':').map(|(namespace, _)| namespace)
}

/// Returns true if the channel id is in the reserved namespace.
pub fn is_reserved(channel: &str) -> bool {
    namespace_of(channel) == Some(RESERVED_NAMESPACE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_namespace() {
        assert!(is_reserved(REGISTER_CHANNEL));
        assert!(is_reserved("plugwire:anything"));
        assert!(!is_reserved("myplugin:plugwire"));
        assert!(!is_reserved("plugwire"));
    }

    #[test]
    fn namespace_split() {
        assert_eq!(namespace_of("myplugin:ping"), Some("myplugin"));
        assert_eq!(namespace_of("no-colon"), None);
    }
}
