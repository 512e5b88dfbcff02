//! # Binary Cursor
//!
//! Forward-only reader and writer over byte buffers, built on the
//! [`bytes`] traits.
//!
//! [`Cursor`] borrows the datagram it reads from, so slices handed out by
//! `read_bytes` and friends point straight into the received buffer. Reads
//! go through [`Buf`] on the unread tail once the length has been checked.
//! [`Writer`] appends to a [`BytesMut`] through [`BufMut`] and mirrors every
//! read with a write.
//!
//! ## Wire Primitives
//! - Fixed width integers of 8/16/24/32/64 bits, signed and unsigned, in
//!   both byte orders
//! - IEEE-754 single precision floats
//! - Unsigned varints: 7 payload bits per byte, high bit set means "more
//!   follows", least significant group first
//! - Length-prefixed UTF-8 strings and raw byte ranges
//!
//! Every read past the end fails with [`ProtocolError::BufferUnderrun`];
//! the cursor position is left untouched when that happens.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Maximum number of groups accepted for a 32-bit varint
const VAR_U32_MAX_GROUPS: u32 = 5;

/// Render bytes as lowercase hex pairs joined by `separator`
pub fn hex_dump(bytes: &[u8], separator: &str) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(separator)
}

macro_rules! read_fixed {
    ($($name:ident => $ty:ty, $get:ident;)*) => {
        $(
            #[inline]
            pub fn $name(&mut self) -> Result<$ty> {
                self.ensure(std::mem::size_of::<$ty>())?;
                Ok(self.rest.$get())
            }
        )*
    };
}

macro_rules! write_fixed {
    ($($name:ident => $ty:ty, $put:ident;)*) => {
        $(
            #[inline]
            pub fn $name(&mut self, value: $ty) {
                self.buf.$put(value);
            }
        )*
    };
}

/// Read cursor over a borrowed byte buffer
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    /// Unread tail of `buf`
    rest: &'a [u8],
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, rest: buf }
    }

    /// Point the cursor at a new buffer, starting from its first byte
    pub fn reset(&mut self, buf: &'a [u8]) {
        self.buf = buf;
        self.rest = buf;
    }

    pub fn position(&self) -> usize {
        self.buf.len() - self.rest.len()
    }

    pub fn remaining(&self) -> usize {
        self.rest.remaining()
    }

    pub fn is_eof(&self) -> bool {
        !self.rest.has_remaining()
    }

    #[inline]
    fn ensure(&self, needed: usize) -> Result<()> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(ProtocolError::BufferUnderrun { needed, remaining });
        }
        Ok(())
    }

    #[inline]
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        Ok(head)
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.rest[0])
    }

    pub fn peek_bytes(&self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        Ok(&self.rest[..len])
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    /// Consume and return everything up to the end of the buffer
    pub fn read_remaining(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.rest)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.ensure(len)?;
        self.rest.advance(len);
        Ok(())
    }

    read_fixed! {
        read_u8 => u8, get_u8;
        read_i8 => i8, get_i8;
        read_u16_be => u16, get_u16;
        read_u16_le => u16, get_u16_le;
        read_i16_be => i16, get_i16;
        read_i16_le => i16, get_i16_le;
        read_u32_be => u32, get_u32;
        read_u32_le => u32, get_u32_le;
        read_i32_be => i32, get_i32;
        read_i32_le => i32, get_i32_le;
        read_u64_be => u64, get_u64;
        read_u64_le => u64, get_u64_le;
        read_i64_be => i64, get_i64;
        read_i64_le => i64, get_i64_le;
        read_f32_be => f32, get_f32;
        read_f32_le => f32, get_f32_le;
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u24_le(&mut self) -> Result<u32> {
        self.ensure(3)?;
        Ok(self.rest.get_uint_le(3) as u32)
    }

    pub fn read_u24_be(&mut self) -> Result<u32> {
        self.ensure(3)?;
        Ok(self.rest.get_uint(3) as u32)
    }

    pub fn read_i24_le(&mut self) -> Result<i32> {
        Ok(sign_extend_24(self.read_u24_le()?))
    }

    pub fn read_i24_be(&mut self) -> Result<i32> {
        Ok(sign_extend_24(self.read_u24_be()?))
    }

    /// Read an unsigned varint that must fit 32 bits (length prefixes)
    pub fn read_var_u32(&mut self) -> Result<u32> {
        let start = self.rest;
        let mut out: u32 = 0;
        for group in 0..VAR_U32_MAX_GROUPS {
            let byte = match self.read_u8() {
                Ok(b) => b,
                Err(e) => {
                    self.rest = start;
                    return Err(e);
                }
            };
            let payload = u32::from(byte & 0x7f);
            let shift = 7 * group;
            if shift == 28 && payload > 0x0f {
                self.rest = start;
                return Err(ProtocolError::VarIntOverflow);
            }
            out |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(out);
            }
        }
        self.rest = start;
        Err(ProtocolError::VarIntOverflow)
    }

    /// Read an unsigned varint of any width up to 128 bits.
    ///
    /// Protocol fields routinely carry 64-bit identifiers, and a 10-group
    /// varint can hold 70 bits; anything that would lose bits past 128 is
    /// rejected with `VarIntOverflow`.
    pub fn read_var_u128(&mut self) -> Result<u128> {
        let start = self.rest;
        let mut out: u128 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = match self.read_u8() {
                Ok(b) => b,
                Err(e) => {
                    self.rest = start;
                    return Err(e);
                }
            };
            let payload = u128::from(byte & 0x7f);
            if shift >= 128 || (shift > 121 && payload >> (128 - shift) != 0) {
                self.rest = start;
                return Err(ProtocolError::VarIntOverflow);
            }
            out |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(out);
            }
            shift += 7;
        }
    }

    pub fn read_str(&mut self, len: usize) -> Result<&'a str> {
        let bytes = self.peek_bytes(len)?;
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
        self.rest.advance(len);
        Ok(text)
    }

    /// Varint length followed by UTF-8 bytes
    pub fn read_var_str(&mut self) -> Result<&'a str> {
        let start = self.rest;
        let len = self.read_var_u32()? as usize;
        self.read_str(len).inspect_err(|_| self.rest = start)
    }

    /// Varint length followed by raw bytes
    pub fn read_var_bytes(&mut self) -> Result<&'a [u8]> {
        let start = self.rest;
        let len = self.read_var_u32()? as usize;
        self.take(len).inspect_err(|_| self.rest = start)
    }

    /// Big-endian u16 length followed by UTF-8 bytes
    pub fn read_short_str(&mut self) -> Result<&'a str> {
        let start = self.rest;
        let len = self.read_u16_be()? as usize;
        self.read_str(len).inspect_err(|_| self.rest = start)
    }

    /// Hex dump of up to `len` bytes; stops at the end of the buffer
    pub fn read_hex(&mut self, len: usize, separator: &str) -> String {
        let len = len.min(self.remaining());
        let out = hex_dump(&self.rest[..len], separator);
        self.rest.advance(len);
        out
    }
}

#[inline]
fn sign_extend_24(v: u32) -> i32 {
    ((v << 8) as i32) >> 8
}

/// Write cursor appending to an owned buffer
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf.into()
    }

    /// Finish writing and hand the buffer out without copying
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    write_fixed! {
        write_u8 => u8, put_u8;
        write_i8 => i8, put_i8;
        write_u16_be => u16, put_u16;
        write_u16_le => u16, put_u16_le;
        write_i16_be => i16, put_i16;
        write_i16_le => i16, put_i16_le;
        write_u32_be => u32, put_u32;
        write_u32_le => u32, put_u32_le;
        write_i32_be => i32, put_i32;
        write_i32_le => i32, put_i32_le;
        write_u64_be => u64, put_u64;
        write_u64_le => u64, put_u64_le;
        write_i64_be => i64, put_i64;
        write_i64_le => i64, put_i64_le;
        write_f32_be => f32, put_f32;
        write_f32_le => f32, put_f32_le;
    }

    /// Writes the low 24 bits
    pub fn write_u24_le(&mut self, value: u32) {
        self.buf.put_uint_le(u64::from(value & 0x00ff_ffff), 3);
    }

    /// Writes the low 24 bits
    pub fn write_u24_be(&mut self, value: u32) {
        self.buf.put_uint(u64::from(value & 0x00ff_ffff), 3);
    }

    pub fn write_i24_le(&mut self, value: i32) {
        self.write_u24_le(value as u32);
    }

    pub fn write_i24_be(&mut self, value: i32) {
        self.write_u24_be(value as u32);
    }

    pub fn write_var_u32(&mut self, value: u32) {
        self.write_var_u128(u128::from(value));
    }

    pub fn write_var_u128(&mut self, mut value: u128) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }

    /// Unsigned varint from a signed value. Negative input is written as a
    /// single zero byte.
    pub fn write_var_uint(&mut self, value: i128) {
        match u128::try_from(value) {
            Ok(v) => self.write_var_u128(v),
            Err(_) => self.buf.put_u8(0),
        }
    }

    pub fn write_str(&mut self, text: &str) {
        self.buf.put_slice(text.as_bytes());
    }

    pub fn write_var_str(&mut self, text: &str) -> Result<()> {
        self.write_var_bytes(text.as_bytes())
    }

    pub fn write_var_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| ProtocolError::ValueOutOfRange(format!("length {}", bytes.len())))?;
        self.write_var_u32(len);
        self.buf.put_slice(bytes);
        Ok(())
    }

    pub fn write_short_str(&mut self, text: &str) -> Result<()> {
        let len = u16::try_from(text.len())
            .map_err(|_| ProtocolError::ValueOutOfRange(format!("length {}", text.len())))?;
        self.write_u16_be(len);
        self.buf.put_slice(text.as_bytes());
        Ok(())
    }
}

impl AsRef<[u8]> for Writer {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl From<Writer> for Vec<u8> {
    fn from(writer: Writer) -> Self {
        writer.buf.into()
    }
}

impl From<Writer> for Bytes {
    fn from(writer: Writer) -> Self {
        writer.freeze()
    }
}
