use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use plugwire_frame::{Opcode, Packet};

use crate::codec::PacketCodec;
use crate::context::{ErasedResponder, PacketContext, Responder};
use crate::error::{ChannelError, Result};
use crate::id::ChannelId;

/// Error type returned by packet handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by packet handlers.
pub type HandlerResult = std::result::Result<(), HandlerError>;

type MessageFn = dyn Fn(&dyn Any, &PacketContext) -> HandlerResult + Send + Sync;
type RequestFn = dyn Fn(&dyn Any, ErasedResponder, &PacketContext) -> HandlerResult + Send + Sync;

#[derive(Clone)]
enum HandlerFn {
    Message(Arc<MessageFn>),
    Request(Arc<RequestFn>),
}

/// A packet handler with its packet type erased.
#[derive(Clone)]
pub struct Handler {
    packet_type: TypeId,
    packet_name: &'static str,
    response_type: Option<TypeId>,
    call: HandlerFn,
}

impl Handler {
    /// Handler for fire-and-forget packets of type `P`.
    pub fn message<P, F>(f: F) -> Self
    where
        P: Packet,
        F: Fn(&P, &PacketContext) -> HandlerResult + Send + Sync + 'static,
    {
        let call = move |packet: &dyn Any, ctx: &PacketContext| -> HandlerResult {
            match packet.downcast_ref::<P>() {
                Some(packet) => f(packet, ctx),
                None => Err(mismatch::<P>().into()),
            }
        };
        Self {
            packet_type: TypeId::of::<P>(),
            packet_name: type_name::<P>(),
            response_type: None,
            call: HandlerFn::Message(Arc::new(call)),
        }
    }

    /// Handler for requests of type `Req` answered with `Resp`.
    pub fn request<Req, Resp, F>(f: F) -> Self
    where
        Req: Packet,
        Resp: Packet,
        F: Fn(&Req, Responder<Resp>, &PacketContext) -> HandlerResult + Send + Sync + 'static,
    {
        let call = move |packet: &dyn Any,
                         responder: ErasedResponder,
                         ctx: &PacketContext|
              -> HandlerResult {
            if responder.response_type() != TypeId::of::<Resp>() {
                return Err(mismatch::<Resp>().into());
            }
            match packet.downcast_ref::<Req>() {
                Some(packet) => f(packet, Responder::new(responder), ctx),
                None => Err(mismatch::<Req>().into()),
            }
        };
        Self {
            packet_type: TypeId::of::<Req>(),
            packet_name: type_name::<Req>(),
            response_type: Some(TypeId::of::<Resp>()),
            call: HandlerFn::Request(Arc::new(call)),
        }
    }

    pub fn packet_name(&self) -> &'static str {
        self.packet_name
    }

    pub fn is_request(&self) -> bool {
        matches!(self.call, HandlerFn::Request(_))
    }

    /// Run the handler. Request handlers need the request's responder.
    pub fn invoke(
        &self,
        packet: &dyn Any,
        ctx: &PacketContext,
        responder: Option<&ErasedResponder>,
    ) -> HandlerResult {
        match (&self.call, responder) {
            (HandlerFn::Message(f), _) => f(packet, ctx),
            (HandlerFn::Request(f), Some(responder)) => f(packet, responder.clone(), ctx),
            (HandlerFn::Request(_), None) => {
                Err("request handler invoked without a transaction".into())
            }
        }
    }
}

fn mismatch<P>() -> ChannelError {
    ChannelError::PacketTypeMismatch {
        expected: type_name::<P>(),
        found: "another packet type",
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("packet", &self.packet_name)
            .field("request", &self.is_request())
            .finish()
    }
}

/// Codec and handlers bound to one opcode.
#[derive(Debug, Clone)]
pub struct OpcodeEntry {
    codec: PacketCodec,
    response: Option<PacketCodec>,
    handlers: Vec<Handler>,
}

impl OpcodeEntry {
    pub fn codec(&self) -> &PacketCodec {
        &self.codec
    }

    /// Response codec when the opcode carries requests.
    pub fn response_codec(&self) -> Option<&PacketCodec> {
        self.response.as_ref()
    }

    pub fn is_request(&self) -> bool {
        self.response.is_some()
    }

    /// Handlers in registration order.
    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }
}

/// Everything registered for one channel.
pub struct ChannelBinding {
    id: ChannelId,
    entries: BTreeMap<Opcode, OpcodeEntry>,
    by_type: HashMap<TypeId, Opcode>,
}

impl ChannelBinding {
    pub(crate) fn new(id: ChannelId) -> Self {
        Self {
            id,
            entries: BTreeMap::new(),
            by_type: HashMap::new(),
        }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn entry(&self, opcode: Opcode) -> Option<&OpcodeEntry> {
        self.entries.get(&opcode)
    }

    /// Bound opcodes in ascending order.
    pub fn opcodes(&self) -> impl Iterator<Item = Opcode> + '_ {
        self.entries.keys().copied()
    }

    /// Opcode bound to packet type `P`.
    pub fn opcode_of<P: 'static>(&self) -> Result<Opcode> {
        self.by_type
            .get(&TypeId::of::<P>())
            .copied()
            .ok_or_else(|| ChannelError::UnregisteredPacket {
                channel: self.id.clone(),
                packet: type_name::<P>(),
            })
    }

    pub(crate) fn insert(
        &mut self,
        opcode: Opcode,
        codec: PacketCodec,
        response: Option<PacketCodec>,
    ) -> Result<()> {
        if self.entries.contains_key(&opcode) {
            return Err(ChannelError::DuplicateOpcode {
                channel: self.id.clone(),
                opcode,
            });
        }
        if self.by_type.contains_key(&codec.type_id()) {
            return Err(ChannelError::DuplicatePacketType {
                channel: self.id.clone(),
                packet: codec.type_name(),
            });
        }
        self.by_type.insert(codec.type_id(), opcode);
        self.entries.insert(
            opcode,
            OpcodeEntry {
                codec,
                response,
                handlers: Vec::new(),
            },
        );
        Ok(())
    }

    pub(crate) fn add_handler(&mut self, opcode: Opcode, handler: Handler) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&opcode)
            .ok_or_else(|| ChannelError::UnknownOpcode {
                channel: self.id.to_string(),
                opcode,
            })?;

        if handler.packet_type != entry.codec.type_id() {
            return Err(ChannelError::PacketTypeMismatch {
                expected: entry.codec.type_name(),
                found: handler.packet_name,
            });
        }
        let bound_response = entry.response.map(|codec| codec.type_id());
        if handler.response_type != bound_response {
            let expected = match &entry.response {
                Some(codec) => codec.type_name(),
                None => "a message handler",
            };
            return Err(ChannelError::PacketTypeMismatch {
                expected,
                found: if handler.is_request() {
                    "a request handler"
                } else {
                    "a message handler"
                },
            });
        }

        entry.handlers.push(handler);
        Ok(())
    }
}

impl fmt::Debug for ChannelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBinding")
            .field("id", &self.id)
            .field("opcodes", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
