use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::error::{BufError, Result};

/// Default hard limit on buffer capacity: 2 MiB.
pub const DEFAULT_MAX_CAPACITY: usize = 2 * 1024 * 1024;

/// Default maximum string length in bytes.
pub const DEFAULT_MAX_STRING_LEN: usize = 32767;

const MIN_GROWTH: usize = 64;
const VAR_INT_MAX_GROUPS: usize = 5;
const VAR_LONG_MAX_GROUPS: usize = 10;

/// Growable, position-tracked byte buffer used by packet codecs.
///
/// Writes append at the write cursor (the end of the written data), reads
/// advance the read cursor. `read_index <= write_index <= capacity` always
/// holds. A failed read leaves the read cursor where it was.
///
/// Fixed-width integers and floats are big-endian. VarInts use 7 bits per
/// byte, least significant group first, high bit set on every byte but the
/// last.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelBuf {
    data: BytesMut,
    read: usize,
    marked: usize,
    max_capacity: usize,
    max_string_len: usize,
}

impl ChannelBuf {
    /// Create an empty buffer with default limits.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_CAPACITY, DEFAULT_MAX_STRING_LEN)
    }

    /// Create an empty buffer with explicit limits.
    pub fn with_limits(max_capacity: usize, max_string_len: usize) -> Self {
        Self {
            data: BytesMut::new(),
            read: 0,
            marked: 0,
            max_capacity,
            max_string_len,
        }
    }

    /// Wrap received bytes for reading. The write cursor sits at the end.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buf = Self::new();
        buf.max_capacity = buf.max_capacity.max(bytes.len());
        buf.data.extend_from_slice(bytes);
        buf
    }

    /// Same as [`ChannelBuf::from_slice`] with explicit limits.
    pub fn from_slice_with_limits(bytes: &[u8], max_capacity: usize, max_string_len: usize) -> Self {
        let mut buf = Self::with_limits(max_capacity.max(bytes.len()), max_string_len);
        buf.data.extend_from_slice(bytes);
        buf
    }

    pub fn read_index(&self) -> usize {
        self.read
    }

    pub fn write_index(&self) -> usize {
        self.data.len()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Bytes left to read.
    pub fn readable(&self) -> usize {
        self.data.len() - self.read
    }

    /// Bytes that can still be written before hitting `max_capacity`.
    pub fn writable(&self) -> usize {
        self.max_capacity.saturating_sub(self.data.len())
    }

    pub fn is_exhausted(&self) -> bool {
        self.readable() == 0
    }

    /// All written bytes, regardless of the read cursor.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// The unread bytes.
    pub fn remaining_slice(&self) -> &[u8] {
        &self.data[self.read..]
    }

    /// Remember the current read cursor.
    pub fn mark_read(&mut self) {
        self.marked = self.read;
    }

    /// Move the read cursor back to the last mark (0 if never marked).
    pub fn reset_read(&mut self) {
        self.read = self.marked.min(self.data.len());
    }

    /// Discard all content and reset both cursors.
    pub fn clear(&mut self) {
        self.data.clear();
        self.read = 0;
        self.marked = 0;
    }

    /// Consume the buffer, returning every written byte.
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    // ---- write side ----

    fn ensure_writable(&mut self, additional: usize) -> Result<()> {
        let needed = self
            .data
            .len()
            .checked_add(additional)
            .ok_or(BufError::Overflow {
                needed: usize::MAX,
                max: self.max_capacity,
            })?;
        if needed > self.max_capacity {
            return Err(BufError::Overflow {
                needed,
                max: self.max_capacity,
            });
        }
        if needed > self.data.capacity() {
            let target = (self.data.capacity() * 2)
                .max(needed)
                .max(MIN_GROWTH)
                .min(self.max_capacity);
            self.data.reserve(target - self.data.len());
        }
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.ensure_writable(1)?;
        self.data.put_u8(value);
        Ok(())
    }

    pub fn write_i8(&mut self, value: i8) -> Result<()> {
        self.write_u8(value as u8)
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(u8::from(value))
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_raw(&value.to_be_bytes())
    }

    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        self.write_raw(&value.to_be_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_raw(&value.to_be_bytes())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_raw(&value.to_be_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_raw(&value.to_be_bytes())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_raw(&value.to_be_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_raw(&value.to_be_bytes())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_raw(&value.to_be_bytes())
    }

    pub fn write_var_int(&mut self, value: i32) -> Result<()> {
        self.ensure_writable(var_int_size(value))?;
        let mut value = value as u32;
        loop {
            if value & !0x7F == 0 {
                self.data.put_u8(value as u8);
                return Ok(());
            }
            self.data.put_u8((value & 0x7F) as u8 | 0x80);
            value >>= 7;
        }
    }

    pub fn write_var_long(&mut self, value: i64) -> Result<()> {
        self.ensure_writable(var_long_size(value))?;
        let mut value = value as u64;
        loop {
            if value & !0x7F == 0 {
                self.data.put_u8(value as u8);
                return Ok(());
            }
            self.data.put_u8((value & 0x7F) as u8 | 0x80);
            value >>= 7;
        }
    }

    /// Write a VarInt length prefix followed by UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        if value.len() > self.max_string_len {
            return Err(BufError::MalformedLength {
                length: value.len() as i64,
                max: self.max_string_len,
            });
        }
        self.write_prefixed(value.as_bytes())
    }

    /// Write a VarInt length prefix followed by the bytes.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_prefixed(value)
    }

    /// Write bytes with no length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.ensure_writable(value.len())?;
        self.data.put_slice(value);
        Ok(())
    }

    pub fn write_uuid(&mut self, value: Uuid) -> Result<()> {
        let (most, least) = value.as_u64_pair();
        self.ensure_writable(16)?;
        self.data.put_u64(most);
        self.data.put_u64(least);
        Ok(())
    }

    fn write_prefixed(&mut self, value: &[u8]) -> Result<()> {
        let len = i32::try_from(value.len()).map_err(|_| BufError::MalformedLength {
            length: value.len() as i64,
            max: i32::MAX as usize,
        })?;
        self.ensure_writable(var_int_size(len) + value.len())?;
        self.write_var_int(len)?;
        self.data.put_slice(value);
        Ok(())
    }

    // ---- read side ----

    /// Run a multi-step read, restoring the read cursor if any step fails.
    fn atomic<T>(&mut self, read: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let start = self.read;
        let result = read(self);
        if result.is_err() {
            self.read = start;
        }
        result
    }

    fn take(&mut self, len: usize) -> Result<&[u8]> {
        let remaining = self.readable();
        if len > remaining {
            return Err(BufError::Underflow {
                needed: len,
                remaining,
            });
        }
        let start = self.read;
        self.read += len;
        Ok(&self.data[start..start + len])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.data.get(self.read).copied() {
            None => Err(BufError::Underflow {
                needed: 1,
                remaining: 0,
            }),
            Some(0) => {
                self.read += 1;
                Ok(false)
            }
            Some(1) => {
                self.read += 1;
                Ok(true)
            }
            Some(other) => Err(BufError::InvalidBool(other)),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    pub fn read_var_int(&mut self) -> Result<i32> {
        self.atomic(|buf| {
            let mut value: u32 = 0;
            for group in 0..VAR_INT_MAX_GROUPS {
                let byte = buf.read_u8()?;
                value |= u32::from(byte & 0x7F) << (7 * group);
                if byte & 0x80 == 0 {
                    return Ok(value as i32);
                }
            }
            Err(BufError::VarIntTooLong)
        })
    }

    pub fn read_var_long(&mut self) -> Result<i64> {
        self.atomic(|buf| {
            let mut value: u64 = 0;
            for group in 0..VAR_LONG_MAX_GROUPS {
                let byte = buf.read_u8()?;
                value |= u64::from(byte & 0x7F) << (7 * group);
                if byte & 0x80 == 0 {
                    return Ok(value as i64);
                }
            }
            Err(BufError::VarLongTooLong)
        })
    }

    /// Read a VarInt-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let max = self.max_string_len;
        self.atomic(|buf| {
            let len = buf.read_length(max)?;
            let bytes = buf.take(len)?;
            Ok(std::str::from_utf8(bytes)?.to_owned())
        })
    }

    /// Read a VarInt-prefixed byte array.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        self.atomic(|buf| {
            let len = buf.read_length(usize::MAX)?;
            Ok(buf.take(len)?.to_vec())
        })
    }

    /// Read exactly `len` bytes with no length prefix.
    pub fn read_raw(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.take(len)?.to_vec())
    }

    /// Advance the read cursor by `len` bytes.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    pub fn read_uuid(&mut self) -> Result<Uuid> {
        self.atomic(|buf| {
            let most = buf.read_u64()?;
            let least = buf.read_u64()?;
            Ok(Uuid::from_u64_pair(most, least))
        })
    }

    /// Decode a length prefix bounded by `max` and by the readable bytes.
    fn read_length(&mut self, max: usize) -> Result<usize> {
        let raw = self.read_var_int()?;
        let bound = max.min(self.readable());
        if raw < 0 || raw as usize > bound {
            return Err(BufError::MalformedLength {
                length: i64::from(raw),
                max: bound,
            });
        }
        Ok(raw as usize)
    }
}

impl Default for ChannelBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChannelBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBuf")
            .field("read_index", &self.read)
            .field("write_index", &self.data.len())
            .field("capacity", &self.data.capacity())
            .field("max_capacity", &self.max_capacity)
            .finish()
    }
}

/// Number of bytes `value` occupies as a VarInt.
pub fn var_int_size(value: i32) -> usize {
    let value = value as u32;
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Number of bytes `value` occupies as a VarLong.
pub fn var_long_size(value: i64) -> usize {
    let bits = 64 - (value as u64).leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}
