use crate::buf::ChannelBuf;
use crate::error::Result;

/// A packet transmitted over a plugin channel.
///
/// `read` builds the packet from the payload bytes and must consume exactly
/// what `write` produced. The payload carries no length prefix of its own;
/// the surrounding frame delimits it.
pub trait Packet: Send + 'static {
    /// Decode a packet from the buffer.
    fn read(buf: &mut ChannelBuf) -> Result<Self>
    where
        Self: Sized;

    /// Encode this packet into the buffer.
    fn write(&self, buf: &mut ChannelBuf) -> Result<()>;
}

/// Packet with no payload.
impl Packet for () {
    fn read(_buf: &mut ChannelBuf) -> Result<Self> {
        Ok(())
    }

    fn write(&self, _buf: &mut ChannelBuf) -> Result<()> {
        Ok(())
    }
}

/// Opaque payload: takes every remaining byte.
impl Packet for Vec<u8> {
    fn read(buf: &mut ChannelBuf) -> Result<Self> {
        let len = buf.readable();
        buf.read_raw(len)
    }

    fn write(&self, buf: &mut ChannelBuf) -> Result<()> {
        buf.write_raw(self)
    }
}

/// A single VarInt-prefixed UTF-8 string.
impl Packet for String {
    fn read(buf: &mut ChannelBuf) -> Result<Self> {
        buf.read_string()
    }

    fn write(&self, buf: &mut ChannelBuf) -> Result<()> {
        buf.write_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Move {
        entity: i32,
        x: f64,
        z: f64,
        sprinting: bool,
        label: String,
    }

    impl Packet for Move {
        fn read(buf: &mut ChannelBuf) -> Result<Self> {
            Ok(Self {
                entity: buf.read_var_int()?,
                x: buf.read_f64()?,
                z: buf.read_f64()?,
                sprinting: buf.read_bool()?,
                label: buf.read_string()?,
            })
        }

        fn write(&self, buf: &mut ChannelBuf) -> Result<()> {
            buf.write_var_int(self.entity)?;
            buf.write_f64(self.x)?;
            buf.write_f64(self.z)?;
            buf.write_bool(self.sprinting)?;
            buf.write_string(&self.label)
        }
    }

    #[test]
    fn decode_consumes_exactly_what_encode_wrote() {
        let packet = Move {
            entity: 90_210,
            x: 12.5,
            z: -3.0,
            sprinting: true,
            label: "north".to_string(),
        };

        let mut buf = ChannelBuf::new();
        packet.write(&mut buf).unwrap();
        let written = buf.write_index();

        let decoded = Move::read(&mut buf).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(buf.read_index(), written);
    }

    #[test]
    fn opaque_payload_takes_remainder() {
        let mut buf = ChannelBuf::from_slice(b"rest of frame");
        let payload = Vec::<u8>::read(&mut buf).unwrap();
        assert_eq!(payload, b"rest of frame");
        assert!(buf.is_exhausted());
    }

    #[test]
    fn string_packet_is_length_prefixed() {
        let mut buf = ChannelBuf::new();
        "hey".to_string().write(&mut buf).unwrap();
        assert_eq!(buf.as_slice(), &[3, b'h', b'e', b'y']);
        assert_eq!(String::read(&mut buf).unwrap(), "hey");
    }
}
