use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use plugwire_frame::{Opcode, Packet};
use tracing::{debug, info};

use crate::binding::{ChannelBinding, Handler, HandlerResult};
use crate::codec::PacketCodec;
use crate::config::RegistryConfig;
use crate::context::{PacketContext, Responder};
use crate::error::{ChannelError, Result};
use crate::id::ChannelId;

#[derive(Default)]
struct OpenTable {
    bindings: HashMap<ChannelId, ChannelBinding>,
}

type SealedTable = HashMap<ChannelId, Arc<ChannelBinding>>;

/// Registry of plugin channels.
///
/// Starts open: plugins register channels and bind opcodes. [`seal`] freezes
/// the table; afterwards every registration call fails with
/// [`ChannelError::RegistrationClosed`] and [`lookup`] reads the frozen table
/// without taking a lock.
///
/// [`seal`]: ChannelRegistry::seal
/// [`lookup`]: ChannelRegistry::lookup
pub struct ChannelRegistry {
    open: Mutex<Option<OpenTable>>,
    sealed: OnceLock<SealedTable>,
    config: RegistryConfig,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            open: Mutex::new(Some(OpenTable::default())),
            sealed: OnceLock::new(),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a new channel and return a binder for its opcodes.
    pub fn register(&self, channel: &str) -> Result<ChannelBinder<'_>> {
        let id = ChannelId::parse_with_max(channel, self.config.max_channel_id_len)?;
        if id.is_reserved() {
            return Err(ChannelError::ReservedChannel(id.to_string()));
        }

        let mut guard = self.lock_open();
        let table = guard.as_mut().ok_or(ChannelError::RegistrationClosed)?;
        if table.bindings.contains_key(&id) {
            return Err(ChannelError::DuplicateChannel(id));
        }
        if table.bindings.len() >= self.config.max_channels {
            return Err(ChannelError::TooManyChannels {
                max: self.config.max_channels,
            });
        }
        table
            .bindings
            .insert(id.clone(), ChannelBinding::new(id.clone()));
        debug!(channel = %id, "channel registered");

        Ok(ChannelBinder { registry: self, id })
    }

    /// Bind packet type `P` to `opcode` with its first handler.
    pub fn bind<P, F>(&self, channel: &str, opcode: Opcode, handler: F) -> Result<()>
    where
        P: Packet,
        F: Fn(&P, &PacketContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.bind_with(
            channel,
            opcode,
            PacketCodec::of::<P>(),
            None,
            Some(Handler::message(handler)),
        )
    }

    /// Bind packet type `P` to `opcode` without a handler, for send-only use.
    pub fn bind_codec<P: Packet>(&self, channel: &str, opcode: Opcode) -> Result<()> {
        self.bind_with(channel, opcode, PacketCodec::of::<P>(), None, None)
    }

    /// Bind a request/response pair to `opcode` with its first handler.
    pub fn bind_request<Req, Resp, F>(&self, channel: &str, opcode: Opcode, handler: F) -> Result<()>
    where
        Req: Packet,
        Resp: Packet,
        F: Fn(&Req, Responder<Resp>, &PacketContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.bind_with(
            channel,
            opcode,
            PacketCodec::of::<Req>(),
            Some(PacketCodec::of::<Resp>()),
            Some(Handler::request(handler)),
        )
    }

    /// Bind a request/response pair without a handler, for the requesting side.
    pub fn bind_request_codec<Req: Packet, Resp: Packet>(
        &self,
        channel: &str,
        opcode: Opcode,
    ) -> Result<()> {
        self.bind_with(
            channel,
            opcode,
            PacketCodec::of::<Req>(),
            Some(PacketCodec::of::<Resp>()),
            None,
        )
    }

    /// Bind a codec, an optional response codec and an optional handler.
    pub fn bind_with(
        &self,
        channel: &str,
        opcode: Opcode,
        codec: PacketCodec,
        response: Option<PacketCodec>,
        handler: Option<Handler>,
    ) -> Result<()> {
        let mut guard = self.lock_open();
        let table = guard.as_mut().ok_or(ChannelError::RegistrationClosed)?;
        let binding = table
            .bindings
            .get_mut(channel)
            .ok_or_else(|| ChannelError::UnknownChannel(channel.to_string()))?;

        binding.insert(opcode, codec, response)?;
        if let Some(handler) = handler {
            binding.add_handler(opcode, handler)?;
        }
        debug!(
            channel,
            opcode,
            packet = codec.type_name(),
            request = response.is_some(),
            "opcode bound"
        );
        Ok(())
    }

    /// Append another handler to an already bound opcode.
    pub fn add_handler(&self, channel: &str, opcode: Opcode, handler: Handler) -> Result<()> {
        let mut guard = self.lock_open();
        let table = guard.as_mut().ok_or(ChannelError::RegistrationClosed)?;
        table
            .bindings
            .get_mut(channel)
            .ok_or_else(|| ChannelError::UnknownChannel(channel.to_string()))?
            .add_handler(opcode, handler)
    }

    /// Close registration. Returns `false` if the registry was already sealed.
    pub fn seal(&self) -> bool {
        let mut guard = self.lock_open();
        let Some(table) = guard.take() else {
            return false;
        };

        let sealed: SealedTable = table
            .bindings
            .into_iter()
            .map(|(id, binding)| (id, Arc::new(binding)))
            .collect();
        let count = sealed.len();
        // Set while the open lock is held so no caller sees neither table.
        let _ = self.sealed.set(sealed);
        drop(guard);

        info!(channels = count, "channel registry sealed");
        true
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.get().is_some()
    }

    /// Binding for `channel`. Only answers once the registry is sealed.
    pub fn lookup(&self, channel: &str) -> Option<&Arc<ChannelBinding>> {
        self.sealed.get()?.get(channel)
    }

    /// Whether `channel` is registered, sealed or not.
    pub fn contains(&self, channel: &str) -> bool {
        match self.sealed.get() {
            Some(table) => table.contains_key(channel),
            None => self
                .lock_open()
                .as_ref()
                .is_some_and(|table| table.bindings.contains_key(channel)),
        }
    }

    /// Registered channel ids, sorted.
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = match self.sealed.get() {
            Some(table) => table.keys().cloned().collect(),
            None => self
                .lock_open()
                .as_ref()
                .map(|table| table.bindings.keys().cloned().collect())
                .unwrap_or_default(),
        };
        ids.sort();
        ids
    }

    fn lock_open(&self) -> MutexGuard<'_, Option<OpenTable>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("sealed", &self.is_sealed())
            .field("channels", &self.channels())
            .finish()
    }
}

/// Registration-phase handle for one channel, returned by
/// [`ChannelRegistry::register`].
#[derive(Debug, Clone)]
pub struct ChannelBinder<'a> {
    registry: &'a ChannelRegistry,
    id: ChannelId,
}

impl ChannelBinder<'_> {
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn bind<P, F>(&self, opcode: Opcode, handler: F) -> Result<&Self>
    where
        P: Packet,
        F: Fn(&P, &PacketContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.bind(self.id.as_str(), opcode, handler)?;
        Ok(self)
    }

    pub fn bind_codec<P: Packet>(&self, opcode: Opcode) -> Result<&Self> {
        self.registry.bind_codec::<P>(self.id.as_str(), opcode)?;
        Ok(self)
    }

    pub fn bind_request<Req, Resp, F>(&self, opcode: Opcode, handler: F) -> Result<&Self>
    where
        Req: Packet,
        Resp: Packet,
        F: Fn(&Req, Responder<Resp>, &PacketContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry
            .bind_request(self.id.as_str(), opcode, handler)?;
        Ok(self)
    }

    pub fn bind_request_codec<Req: Packet, Resp: Packet>(&self, opcode: Opcode) -> Result<&Self> {
        self.registry
            .bind_request_codec::<Req, Resp>(self.id.as_str(), opcode)?;
        Ok(self)
    }

    pub fn add_handler(&self, opcode: Opcode, handler: Handler) -> Result<&Self> {
        self.registry
            .add_handler(self.id.as_str(), opcode, handler)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use super::*;

    #[test]
    fn register_and_lookup_after_seal() {
        let registry = ChannelRegistry::new();
        registry
            .register("myplugin:chat")
            .unwrap()
            .bind_codec::<String>(0)
            .unwrap()
            .bind::<Vec<u8>, _>(1, |_, _| Ok(()))
            .unwrap();

        assert!(registry.contains("myplugin:chat"));
        assert!(registry.lookup("myplugin:chat").is_none());

        assert!(registry.seal());
        let binding = registry.lookup("myplugin:chat").unwrap();
        assert_eq!(binding.opcodes().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(binding.entry(1).unwrap().handlers().len(), 1);
        assert!(registry.lookup("myplugin:other").is_none());
    }

    #[test]
    fn duplicate_channel_rejected() {
        let registry = ChannelRegistry::new();
        registry.register("myplugin:chat").unwrap();
        let err = registry.register("myplugin:chat").unwrap_err();
        assert!(matches!(err, ChannelError::DuplicateChannel(id) if id.as_str() == "myplugin:chat"));
    }

    #[test]
    fn invalid_and_reserved_ids_rejected() {
        let registry = ChannelRegistry::new();
        assert!(matches!(
            registry.register("MyPlugin:Chat"),
            Err(ChannelError::InvalidId { .. })
        ));
        assert!(matches!(
            registry.register("plugwire:register"),
            Err(ChannelError::ReservedChannel(_))
        ));
        assert!(matches!(
            registry.register("plugwire:anything"),
            Err(ChannelError::ReservedChannel(_))
        ));
    }

    #[test]
    fn bind_on_unknown_channel() {
        let registry = ChannelRegistry::new();
        let err = registry.bind_codec::<String>("myplugin:nope", 0).unwrap_err();
        assert!(matches!(err, ChannelError::UnknownChannel(_)));
    }

    #[test]
    fn duplicate_opcode_rejected() {
        let registry = ChannelRegistry::new();
        let chat = registry.register("myplugin:chat").unwrap();
        chat.bind_codec::<String>(3).unwrap();
        let err = chat.bind_codec::<Vec<u8>>(3).unwrap_err();
        assert!(matches!(err, ChannelError::DuplicateOpcode { opcode: 3, .. }));
    }

    #[test]
    fn registration_closed_after_seal() {
        let registry = ChannelRegistry::new();
        registry.register("myplugin:chat").unwrap();
        assert!(registry.seal());
        assert!(!registry.seal());
        assert!(registry.is_sealed());

        assert!(matches!(
            registry.register("myplugin:late"),
            Err(ChannelError::RegistrationClosed)
        ));
        assert!(matches!(
            registry.bind_codec::<String>("myplugin:chat", 0),
            Err(ChannelError::RegistrationClosed)
        ));
        assert!(matches!(
            registry.add_handler("myplugin:chat", 0, Handler::message::<String, _>(|_, _| Ok(()))),
            Err(ChannelError::RegistrationClosed)
        ));
        assert_eq!(registry.channels().len(), 1);
    }

    #[test]
    fn channel_limit() {
        let registry = ChannelRegistry::with_config(RegistryConfig {
            max_channels: 2,
            ..RegistryConfig::default()
        });
        registry.register("a:one").unwrap();
        registry.register("a:two").unwrap();
        assert!(matches!(
            registry.register("a:three"),
            Err(ChannelError::TooManyChannels { max: 2 })
        ));
    }

    #[test]
    fn channels_sorted() {
        let registry = ChannelRegistry::new();
        for id in ["b:x", "a:y", "a:x"] {
            registry.register(id).unwrap();
        }
        let ids: Vec<String> = registry.channels().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["a:x", "a:y", "b:x"]);
    }

    #[test]
    fn sealed_lookup_from_many_threads() {
        let registry = Arc::new(ChannelRegistry::new());
        registry
            .register("myplugin:chat")
            .unwrap()
            .bind_codec::<String>(0)
            .unwrap();
        registry.seal();

        let (tx, rx) = mpsc::channel();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let tx = tx.clone();
                thread::spawn(move || {
                    let found = registry
                        .lookup("myplugin:chat")
                        .map(|binding| binding.opcode_of::<String>().is_ok())
                        .unwrap_or(false);
                    tx.send(found).unwrap();
                })
            })
            .collect();
        drop(tx);
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(rx.iter().all(|found| found));
    }
}
