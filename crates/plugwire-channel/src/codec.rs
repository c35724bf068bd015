use std::any::{type_name, Any, TypeId};
use std::fmt;

use plugwire_frame::{ChannelBuf, Packet};

use crate::error::{ChannelError, Result};

/// A decoded packet whose concrete type is known only to its codec.
pub type AnyPacket = Box<dyn Any + Send>;

type DecodeFn = fn(&mut ChannelBuf) -> plugwire_frame::Result<AnyPacket>;
type EncodeFn = fn(&dyn Any, &mut ChannelBuf) -> Result<()>;

/// Type-erased encode/decode pair for one packet type.
///
/// Created once per binding with [`PacketCodec::of`]; the function pointers
/// are monomorphized for the packet type so the registry can store codecs
/// for unrelated types side by side.
#[derive(Clone, Copy)]
pub struct PacketCodec {
    type_id: TypeId,
    type_name: &'static str,
    decode: DecodeFn,
    encode: EncodeFn,
}

impl PacketCodec {
    pub fn of<P: Packet>() -> Self {
        Self {
            type_id: TypeId::of::<P>(),
            type_name: type_name::<P>(),
            decode: decode_erased::<P>,
            encode: encode_erased::<P>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn accepts<P: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<P>()
    }

    /// Decode one packet that must consume the whole remaining payload.
    pub fn decode(&self, payload: &mut ChannelBuf) -> Result<AnyPacket> {
        let packet = (self.decode)(payload)?;
        if !payload.is_exhausted() {
            return Err(ChannelError::TrailingBytes {
                remaining: payload.readable(),
            });
        }
        Ok(packet)
    }

    /// Encode `packet`, which must be of this codec's type.
    pub fn encode(&self, packet: &dyn Any, dst: &mut ChannelBuf) -> Result<()> {
        (self.encode)(packet, dst)
    }
}

fn decode_erased<P: Packet>(src: &mut ChannelBuf) -> plugwire_frame::Result<AnyPacket> {
    Ok(Box::new(P::read(src)?))
}

fn encode_erased<P: Packet>(packet: &dyn Any, dst: &mut ChannelBuf) -> Result<()> {
    let packet = packet
        .downcast_ref::<P>()
        .ok_or(ChannelError::PacketTypeMismatch {
            expected: type_name::<P>(),
            found: "another packet type",
        })?;
    packet.write(dst)?;
    Ok(())
}

impl fmt::Debug for PacketCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PacketCodec").field(&self.type_name).finish()
    }
}
