//! Hand-rolled protobuf wire codec.
//!
//! ```text
//! ┌─────────┬───────────────────────────────┐
//! │ Wire 0  │ varint (uint32, int32, bool)  │
//! │ Wire 1  │ fixed64                       │
//! │ Wire 2  │ length-delimited (str, bytes) │
//! │ Wire 5  │ fixed32 (fixed32, float)      │
//! └─────────┴───────────────────────────────┘
//! ```
//!
//! Encoding is proto3: fields equal to their default are not written, and
//! [`ProtoSize`] skips them the same way, so `calculate_size` is exact.
//! Every message is declared once with [`proto_message!`] in
//! [`messages`], which expands to the struct, [`ProtoMessage`] and
//! [`ProtoDecodable`].

pub mod messages;

use log::trace;

use crate::error::DecodeError;

/// Longest legal varint encoding of a u64.
pub const MAX_VARINT_LEN: usize = 10;

// ───────────────────────────────────────────────────────────────
// Varint primitives
// ───────────────────────────────────────────────────────────────

/// Encoded length of `value` as a varint.
#[inline]
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

pub fn encode_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Write a varint into a fixed slice.  Returns bytes written.
pub fn encode_varint_to(out: &mut [u8], mut value: u64) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        out[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    out[i] = value as u8;
    i + 1
}

/// Parse a varint prefix of `data`.  Returns `(value, consumed)`.
pub fn parse_varint(data: &[u8]) -> Result<(u64, usize), DecodeError> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(DecodeError::BadVarint);
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if data.len() >= MAX_VARINT_LEN {
        Err(DecodeError::BadVarint)
    } else {
        Err(DecodeError::Truncated)
    }
}

#[inline]
fn tag_len(field_id: u32) -> usize {
    varint_len(u64::from(field_id) << 3)
}

// ───────────────────────────────────────────────────────────────
// Size calculation
// ───────────────────────────────────────────────────────────────

/// Accumulates the exact encoded size of a message.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtoSize {
    total: usize,
}

impl ProtoSize {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_size(&self) -> usize {
        self.total
    }

    pub fn add_uint32(&mut self, field_id: u32, value: u32) {
        if value != 0 {
            self.total += tag_len(field_id) + varint_len(u64::from(value));
        }
    }

    pub fn add_int32(&mut self, field_id: u32, value: i32) {
        if value != 0 {
            // Negative int32 is sign-extended to ten bytes.
            self.total += tag_len(field_id) + varint_len(value as i64 as u64);
        }
    }

    pub fn add_bool(&mut self, field_id: u32, value: bool) {
        if value {
            self.total += tag_len(field_id) + 1;
        }
    }

    pub fn add_fixed32(&mut self, field_id: u32, value: u32) {
        if value != 0 {
            self.total += tag_len(field_id) + 4;
        }
    }

    pub fn add_float(&mut self, field_id: u32, value: f32) {
        if value != 0.0 {
            self.total += tag_len(field_id) + 4;
        }
    }

    pub fn add_length(&mut self, field_id: u32, len: usize) {
        if len != 0 {
            self.add_length_force(field_id, len);
        }
    }

    /// Repeated elements are written even when empty.
    pub fn add_length_force(&mut self, field_id: u32, len: usize) {
        self.total += tag_len(field_id) + varint_len(len as u64) + len;
    }
}

// ───────────────────────────────────────────────────────────────
// Encoding
// ───────────────────────────────────────────────────────────────

/// Appends encoded fields to the tail of a byte buffer.
pub struct ProtoWriteBuffer<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> ProtoWriteBuffer<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    fn encode_tag(&mut self, field_id: u32, wire_type: u8) {
        encode_varint(self.buf, (u64::from(field_id) << 3) | u64::from(wire_type));
    }

    pub fn encode_uint32(&mut self, field_id: u32, value: u32) {
        if value != 0 {
            self.encode_tag(field_id, 0);
            encode_varint(self.buf, u64::from(value));
        }
    }

    pub fn encode_int32(&mut self, field_id: u32, value: i32) {
        if value != 0 {
            self.encode_tag(field_id, 0);
            encode_varint(self.buf, value as i64 as u64);
        }
    }

    pub fn encode_bool(&mut self, field_id: u32, value: bool) {
        if value {
            self.encode_tag(field_id, 0);
            self.buf.push(1);
        }
    }

    pub fn encode_fixed32(&mut self, field_id: u32, value: u32) {
        if value != 0 {
            self.encode_tag(field_id, 5);
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    pub fn encode_float(&mut self, field_id: u32, value: f32) {
        if value != 0.0 {
            self.encode_tag(field_id, 5);
            self.buf.extend_from_slice(&value.to_bits().to_le_bytes());
        }
    }

    pub fn encode_bytes(&mut self, field_id: u32, value: &[u8]) {
        if !value.is_empty() {
            self.encode_bytes_force(field_id, value);
        }
    }

    pub fn encode_bytes_force(&mut self, field_id: u32, value: &[u8]) {
        self.encode_tag(field_id, 2);
        encode_varint(self.buf, value.len() as u64);
        self.buf.extend_from_slice(value);
    }

    pub fn encode_string(&mut self, field_id: u32, value: &str) {
        self.encode_bytes(field_id, value.as_bytes());
    }

    pub fn written(&self) -> usize {
        self.buf.len()
    }
}

// ───────────────────────────────────────────────────────────────
// Message traits
// ───────────────────────────────────────────────────────────────

/// An encodable catalog message.
pub trait ProtoMessage {
    /// Wire message type tag.
    const MESSAGE_TYPE: u8;
    /// Reservation hint only; the real size comes from `calculate_size`.
    const ESTIMATED_SIZE: u8;
    const NAME: &'static str;

    fn calculate_size(&self, size: &mut ProtoSize);

    /// Write fields in ascending tag order.
    fn encode(&self, buf: &mut ProtoWriteBuffer<'_>);

    fn encoded_size(&self) -> usize {
        let mut size = ProtoSize::new();
        self.calculate_size(&mut size);
        size.get_size()
    }

    /// Encode into a fresh vector.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_size());
        self.encode(&mut ProtoWriteBuffer::new(&mut out));
        out
    }
}

/// Field-by-field decoding.  Each hook returns `false` for field ids it
/// does not know; those fields are skipped and parsing continues.
pub trait ProtoDecodable: Default {
    fn decode_varint(&mut self, _field_id: u32, _value: u64) -> bool {
        false
    }

    fn decode_length(&mut self, _field_id: u32, _value: &[u8]) -> bool {
        false
    }

    fn decode_32bit(&mut self, _field_id: u32, _value: u32) -> bool {
        false
    }

    fn decode_64bit(&mut self, _field_id: u32, _value: u64) -> bool {
        false
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        msg.merge(data)?;
        Ok(msg)
    }

    fn merge(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let mut i = 0;
        while i < data.len() {
            let (tag, n) = parse_varint(&data[i..])?;
            i += n;
            let field_id = (tag >> 3) as u32;
            let known = match tag & 0x7 {
                0 => {
                    let (value, n) = parse_varint(&data[i..])?;
                    i += n;
                    self.decode_varint(field_id, value)
                }
                1 => {
                    let raw = data.get(i..i + 8).ok_or(DecodeError::Truncated)?;
                    i += 8;
                    let mut b = [0u8; 8];
                    b.copy_from_slice(raw);
                    self.decode_64bit(field_id, u64::from_le_bytes(b))
                }
                2 => {
                    let (len, n) = parse_varint(&data[i..])?;
                    i += n;
                    let len = usize::try_from(len).map_err(|_| DecodeError::Truncated)?;
                    let end = i.checked_add(len).ok_or(DecodeError::Truncated)?;
                    let value = data.get(i..end).ok_or(DecodeError::Truncated)?;
                    i = end;
                    self.decode_length(field_id, value)
                }
                5 => {
                    let raw = data.get(i..i + 4).ok_or(DecodeError::Truncated)?;
                    i += 4;
                    let mut b = [0u8; 4];
                    b.copy_from_slice(raw);
                    self.decode_32bit(field_id, u32::from_le_bytes(b))
                }
                w => return Err(DecodeError::BadWireType(w as u8)),
            };
            if !known {
                trace!("proto: skipped unknown field {} (wire {})", field_id, tag & 0x7);
            }
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Catalog macro
// ───────────────────────────────────────────────────────────────

macro_rules! proto_field_type {
    (uint32) => { u32 };
    (int32) => { i32 };
    (bool) => { bool };
    (fixed32) => { u32 };
    (float) => { f32 };
    (string) => { String };
    (bytes) => { Vec<u8> };
    (repeated_string) => { Vec<String> };
}

macro_rules! proto_field_size {
    (uint32, $s:ident, $id:literal, $v:expr) => { $s.add_uint32($id, $v) };
    (int32, $s:ident, $id:literal, $v:expr) => { $s.add_int32($id, $v) };
    (bool, $s:ident, $id:literal, $v:expr) => { $s.add_bool($id, $v) };
    (fixed32, $s:ident, $id:literal, $v:expr) => { $s.add_fixed32($id, $v) };
    (float, $s:ident, $id:literal, $v:expr) => { $s.add_float($id, $v) };
    (string, $s:ident, $id:literal, $v:expr) => { $s.add_length($id, $v.len()) };
    (bytes, $s:ident, $id:literal, $v:expr) => { $s.add_length($id, $v.len()) };
    (repeated_string, $s:ident, $id:literal, $v:expr) => {
        for item in &$v {
            $s.add_length_force($id, item.len());
        }
    };
}

macro_rules! proto_field_encode {
    (uint32, $b:ident, $id:literal, $v:expr) => { $b.encode_uint32($id, $v) };
    (int32, $b:ident, $id:literal, $v:expr) => { $b.encode_int32($id, $v) };
    (bool, $b:ident, $id:literal, $v:expr) => { $b.encode_bool($id, $v) };
    (fixed32, $b:ident, $id:literal, $v:expr) => { $b.encode_fixed32($id, $v) };
    (float, $b:ident, $id:literal, $v:expr) => { $b.encode_float($id, $v) };
    (string, $b:ident, $id:literal, $v:expr) => { $b.encode_string($id, &$v) };
    (bytes, $b:ident, $id:literal, $v:expr) => { $b.encode_bytes($id, &$v) };
    (repeated_string, $b:ident, $id:literal, $v:expr) => {
        for item in &$v {
            $b.encode_bytes_force($id, item.as_bytes());
        }
    };
}

/// One decode arm: assign when the wire type fits the field kind.
macro_rules! proto_field_decode {
    (varint, uint32, $f:expr, $v:ident) => {{ $f = $v as u32; true }};
    (varint, int32, $f:expr, $v:ident) => {{ $f = $v as i32; true }};
    (varint, bool, $f:expr, $v:ident) => {{ $f = $v != 0; true }};
    (fixed32, fixed32, $f:expr, $v:ident) => {{ $f = $v; true }};
    (fixed32, float, $f:expr, $v:ident) => {{ $f = f32::from_bits($v); true }};
    (length, string, $f:expr, $v:ident) => {{ $f = String::from_utf8_lossy($v).into_owned(); true }};
    (length, bytes, $f:expr, $v:ident) => {{ $f = $v.to_vec(); true }};
    (length, repeated_string, $f:expr, $v:ident) => {{
        $f.push(String::from_utf8_lossy($v).into_owned());
        true
    }};
    ($wire:ident, $kind:ident, $f:expr, $v:ident) => {{
        let _ = &$f;
        false
    }};
}

/// Declare a catalog message: struct, encoder, sizer and decoder.
macro_rules! proto_message {
    (
        $(#[$meta:meta])*
        $name:ident = $msg_type:literal, estimated $est:literal {
            $( $id:literal => $field:ident : $kind:ident ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name {
            $( pub $field: proto_field_type!($kind), )*
        }

        impl $crate::proto::ProtoMessage for $name {
            const MESSAGE_TYPE: u8 = $msg_type;
            const ESTIMATED_SIZE: u8 = $est;
            const NAME: &'static str = stringify!($name);

            #[allow(unused_variables)]
            fn calculate_size(&self, size: &mut $crate::proto::ProtoSize) {
                $( proto_field_size!($kind, size, $id, self.$field); )*
            }

            #[allow(unused_variables)]
            fn encode(&self, buf: &mut $crate::proto::ProtoWriteBuffer<'_>) {
                $( proto_field_encode!($kind, buf, $id, self.$field); )*
            }
        }

        #[allow(unused_variables, clippy::match_single_binding)]
        impl $crate::proto::ProtoDecodable for $name {
            fn decode_varint(&mut self, field_id: u32, value: u64) -> bool {
                match field_id {
                    $( $id => proto_field_decode!(varint, $kind, self.$field, value), )*
                    _ => false,
                }
            }

            fn decode_length(&mut self, field_id: u32, value: &[u8]) -> bool {
                match field_id {
                    $( $id => proto_field_decode!(length, $kind, self.$field, value), )*
                    _ => false,
                }
            }

            fn decode_32bit(&mut self, field_id: u32, value: u32) -> bool {
                match field_id {
                    $( $id => proto_field_decode!(fixed32, $kind, self.$field, value), )*
                    _ => false,
                }
            }
        }
    };
}

pub(crate) use {
    proto_field_decode, proto_field_encode, proto_field_size, proto_field_type, proto_message,
};
