//! # Object Graph Codec
//!
//! Self-describing encoding of typed values over the buffer primitives.
//!
//! Every top-level value is framed as `[null-flag:1][type-tag][payload]`.
//! The type tag is either `0x00` plus a 16-bit registry code, or `0x01`
//! plus a length-prefixed type-name string for types registered without a
//! code. Collections are a 4-byte count followed by that many items.
//!
//! ## The capability pair
//! [`Wire`] is the serialize/deserialize capability every message type
//! implements explicitly. Container types (`Vec`, `HashMap`, `HashSet`,
//! `Option`) compose structurally by recursing into their element
//! implementations. Types that prefer a derived encoding can opt into the
//! serde bridge ([`encode_with_serde`]/[`decode_with_serde`]) from their
//! `Wire` implementation; there is no implicit fallback path.
//!
//! ## Round-trip law
//! For any value `v` of a registered type,
//! `take_object(put_object(v)) == v` under value equality of `v`'s type.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::buffer::{ReadBuffer, WriteBuffer};
use crate::core::registry::CodecRegistry;
use crate::error::{ProtocolError, Result};

/// Null sentinel: `true` means "no value follows".
const NULL_FLAG: bool = true;
/// Tag byte introducing a 16-bit registry code.
const TAG_CODE: u8 = 0x00;
/// Tag byte introducing a length-prefixed full type name.
const TAG_NAME: u8 = 0x01;

/// Serialize/deserialize capability pair.
///
/// Implementations write through an [`ObjectWriter`] so nested values can
/// recurse into the tagged object form where they need to.
pub trait Wire: Sized {
    fn encode(&self, writer: &mut ObjectWriter<'_>) -> Result<()>;
    fn decode(reader: &mut ObjectReader<'_>) -> Result<Self>;
}

/// Object-safe erasure of [`Wire`] for values travelling through queues and
/// event channels. Implemented for every eligible `Wire` type via a blanket
/// impl; never implement it by hand.
pub trait Message: fmt::Debug + Send + Sync + 'static {
    fn encode_message(&self, writer: &mut ObjectWriter<'_>) -> Result<()>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn message_type_name(&self) -> &'static str;
}

impl<T> Message for T
where
    T: Wire + fmt::Debug + Send + Sync + 'static,
{
    fn encode_message(&self, writer: &mut ObjectWriter<'_>) -> Result<()> {
        self.encode(writer)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn message_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl dyn Message {
    /// Whether the erased value is a `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Borrow the erased value as a `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Recover the concrete type from a boxed message, or hand the box back.
pub fn downcast_message<T: 'static>(
    message: Box<dyn Message>,
) -> std::result::Result<Box<T>, Box<dyn Message>> {
    if message.is::<T>() {
        // Checked above; downcast cannot fail.
        Ok(message
            .into_any()
            .downcast::<T>()
            .unwrap_or_else(|_| unreachable!()))
    } else {
        Err(message)
    }
}

/// Writer pairing a [`WriteBuffer`] with a registry handle so tagged
/// objects and typed primitives share one output stream.
pub struct ObjectWriter<'a> {
    registry: &'a CodecRegistry,
    buf: WriteBuffer,
}

impl<'a> ObjectWriter<'a> {
    pub fn new(registry: &'a CodecRegistry) -> Self {
        Self {
            registry,
            buf: WriteBuffer::new(),
        }
    }

    pub fn with_capacity(registry: &'a CodecRegistry, capacity: usize) -> Self {
        Self {
            registry,
            buf: WriteBuffer::with_capacity(capacity),
        }
    }

    pub fn registry(&self) -> &CodecRegistry {
        self.registry
    }

    /// Write a tagged, possibly-null object.
    pub fn put_object(&mut self, value: Option<&dyn Message>) -> Result<()> {
        let Some(message) = value else {
            self.buf.put_bool(NULL_FLAG);
            return Ok(());
        };

        self.buf.put_bool(!NULL_FLAG);

        let entry = self
            .registry
            .entry_of(message.as_any().type_id())
            .ok_or_else(|| ProtocolError::NotRegistered(message.message_type_name()))?;

        match entry.code() {
            Some(code) => {
                self.buf.put_u8(TAG_CODE);
                self.buf.put_u16(code);
            }
            None => {
                self.buf.put_u8(TAG_NAME);
                self.buf.put_str(entry.type_name());
            }
        }

        entry.encode(message, self)
    }

    /// Write a tagged non-null object.
    pub fn put_message(&mut self, message: &dyn Message) -> Result<()> {
        self.put_object(Some(message))
    }

    /// Write a count followed by that many tagged objects, preserving order.
    pub fn put_object_list(&mut self, items: &[Box<dyn Message>]) -> Result<()> {
        self.buf.put_u32(items.len() as u32);
        for item in items {
            self.put_object(Some(item.as_ref()))?;
        }
        Ok(())
    }

    /// Write a count followed by that many tagged key/value pairs.
    pub fn put_object_map(&mut self, pairs: &[(Box<dyn Message>, Box<dyn Message>)]) -> Result<()> {
        self.buf.put_u32(pairs.len() as u32);
        for (key, value) in pairs {
            self.put_object(Some(key.as_ref()))?;
            self.put_object(Some(value.as_ref()))?;
        }
        Ok(())
    }

    /// Write a typed value without a tag.
    pub fn put_wire<T: Wire>(&mut self, value: &T) -> Result<()> {
        value.encode(self)
    }

    // Primitive passthroughs.

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn put_i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.put_u64(value);
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub fn put_f32(&mut self, value: f32) {
        self.buf.put_f32(value);
    }

    pub fn put_f64(&mut self, value: f64) {
        self.buf.put_f64(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_bool(value);
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_bytes(bytes);
    }

    pub fn put_str(&mut self, value: &str) {
        self.buf.put_str(value);
    }

    pub fn put_timestamp(&mut self, value: SystemTime) {
        self.buf.put_timestamp(value);
    }

    pub fn put_duration(&mut self, value: Duration) {
        self.buf.put_duration(value);
    }

    pub fn put_addr(&mut self, addr: SocketAddr) {
        self.buf.put_addr(addr);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish writing and return the encoded bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buf.into_vec()
    }

    /// Finish writing and return the encoded bytes without copying.
    pub fn finish_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Reader pairing a [`ReadBuffer`] with a registry handle.
pub struct ObjectReader<'a> {
    registry: &'a CodecRegistry,
    buf: ReadBuffer,
}

impl<'a> ObjectReader<'a> {
    pub fn new(registry: &'a CodecRegistry, data: impl Into<Bytes>) -> Self {
        Self {
            registry,
            buf: ReadBuffer::new(data),
        }
    }

    pub fn registry(&self) -> &CodecRegistry {
        self.registry
    }

    /// Read a tagged, possibly-null object.
    ///
    /// A full-name tag resolves through the registry's name index; the
    /// resolution never assigns a compact code (no implicit promotion).
    pub fn take_object(&mut self) -> Result<Option<Box<dyn Message>>> {
        if self.buf.take_bool()? {
            return Ok(None);
        }

        let entry = match self.buf.take_u8()? {
            TAG_CODE => {
                let code = self.buf.take_u16()?;
                self.registry
                    .entry_for_code(code)
                    .ok_or(ProtocolError::UnknownTypeCode(code))?
            }
            TAG_NAME => {
                let name = self.buf.take_str()?;
                self.registry
                    .entry_for_name(&name)
                    .ok_or(ProtocolError::UnknownTypeName(name))?
            }
            other => {
                return Err(ProtocolError::Decode(format!(
                    "invalid type tag {other:#04x}"
                )))
            }
        };

        entry.decode(self).map(Some)
    }

    /// Read a tagged object and downcast it to `T`.
    pub fn take_message<T: Message>(&mut self) -> Result<T> {
        let message = self
            .take_object()?
            .ok_or_else(|| ProtocolError::Decode("unexpected null object".into()))?;
        let name = message.message_type_name();
        match downcast_message::<T>(message) {
            Ok(value) => Ok(*value),
            Err(_) => Err(ProtocolError::Decode(format!(
                "expected {}, found {name}",
                std::any::type_name::<T>()
            ))),
        }
    }

    /// Read a count followed by that many tagged objects.
    pub fn take_object_list(&mut self) -> Result<Vec<Box<dyn Message>>> {
        let count = self.buf.take_u32()? as usize;
        let mut items = Vec::with_capacity(count.min(PREALLOC_LIMIT));
        for _ in 0..count {
            let item = self
                .take_object()?
                .ok_or_else(|| ProtocolError::Decode("null element in object list".into()))?;
            items.push(item);
        }
        Ok(items)
    }

    /// Read a count followed by that many tagged key/value pairs.
    pub fn take_object_map(&mut self) -> Result<Vec<(Box<dyn Message>, Box<dyn Message>)>> {
        let count = self.buf.take_u32()? as usize;
        let mut pairs = Vec::with_capacity(count.min(PREALLOC_LIMIT));
        for _ in 0..count {
            let key = self
                .take_object()?
                .ok_or_else(|| ProtocolError::Decode("null key in object map".into()))?;
            let value = self
                .take_object()?
                .ok_or_else(|| ProtocolError::Decode("null value in object map".into()))?;
            pairs.push((key, value));
        }
        Ok(pairs)
    }

    /// Read a typed value without a tag.
    pub fn take_wire<T: Wire>(&mut self) -> Result<T> {
        T::decode(self)
    }

    // Primitive passthroughs.

    pub fn take_u8(&mut self) -> Result<u8> {
        self.buf.take_u8()
    }

    pub fn take_i8(&mut self) -> Result<i8> {
        self.buf.take_i8()
    }

    pub fn take_u16(&mut self) -> Result<u16> {
        self.buf.take_u16()
    }

    pub fn take_i16(&mut self) -> Result<i16> {
        self.buf.take_i16()
    }

    pub fn take_u32(&mut self) -> Result<u32> {
        self.buf.take_u32()
    }

    pub fn take_i32(&mut self) -> Result<i32> {
        self.buf.take_i32()
    }

    pub fn take_u64(&mut self) -> Result<u64> {
        self.buf.take_u64()
    }

    pub fn take_i64(&mut self) -> Result<i64> {
        self.buf.take_i64()
    }

    pub fn take_f32(&mut self) -> Result<f32> {
        self.buf.take_f32()
    }

    pub fn take_f64(&mut self) -> Result<f64> {
        self.buf.take_f64()
    }

    pub fn take_bool(&mut self) -> Result<bool> {
        self.buf.take_bool()
    }

    pub fn take_bytes(&mut self) -> Result<Bytes> {
        self.buf.take_bytes()
    }

    pub fn take_str(&mut self) -> Result<String> {
        self.buf.take_str()
    }

    pub fn take_timestamp(&mut self) -> Result<SystemTime> {
        self.buf.take_timestamp()
    }

    pub fn take_duration(&mut self) -> Result<Duration> {
        self.buf.take_duration()
    }

    pub fn take_addr(&mut self) -> Result<SocketAddr> {
        self.buf.take_addr()
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}

/// Cap on pre-allocation from untrusted counts; growth past this is gradual.
const PREALLOC_LIMIT: usize = 1024;

/// Serde bridge: encode a value as a length-prefixed bincode blob.
///
/// The explicit opt-in adapter for types that prefer a derived encoding
/// over a hand-written one; call it from the type's `Wire::encode`.
pub fn encode_with_serde<T: Serialize>(value: &T, writer: &mut ObjectWriter<'_>) -> Result<()> {
    let bytes = bincode::serialize(value)?;
    writer.put_bytes(&bytes);
    Ok(())
}

/// Serde bridge: decode a value from a length-prefixed bincode blob.
pub fn decode_with_serde<T: DeserializeOwned>(reader: &mut ObjectReader<'_>) -> Result<T> {
    let bytes = reader.take_bytes()?;
    Ok(bincode::deserialize(&bytes)?)
}

// Wire for the primitive types the buffer knows natively.

macro_rules! wire_primitive {
    ($ty:ty, $put:ident, $take:ident) => {
        impl Wire for $ty {
            fn encode(&self, writer: &mut ObjectWriter<'_>) -> Result<()> {
                writer.$put(*self);
                Ok(())
            }

            fn decode(reader: &mut ObjectReader<'_>) -> Result<Self> {
                reader.$take()
            }
        }
    };
}

wire_primitive!(u8, put_u8, take_u8);
wire_primitive!(i8, put_i8, take_i8);
wire_primitive!(u16, put_u16, take_u16);
wire_primitive!(i16, put_i16, take_i16);
wire_primitive!(u32, put_u32, take_u32);
wire_primitive!(i32, put_i32, take_i32);
wire_primitive!(u64, put_u64, take_u64);
wire_primitive!(i64, put_i64, take_i64);
wire_primitive!(f32, put_f32, take_f32);
wire_primitive!(f64, put_f64, take_f64);
wire_primitive!(bool, put_bool, take_bool);
wire_primitive!(SystemTime, put_timestamp, take_timestamp);
wire_primitive!(Duration, put_duration, take_duration);
wire_primitive!(SocketAddr, put_addr, take_addr);

impl Wire for String {
    fn encode(&self, writer: &mut ObjectWriter<'_>) -> Result<()> {
        writer.put_str(self);
        Ok(())
    }

    fn decode(reader: &mut ObjectReader<'_>) -> Result<Self> {
        reader.take_str()
    }
}

// Structural container codecs, synthesized from the element codec.

impl<T: Wire> Wire for Vec<T> {
    fn encode(&self, writer: &mut ObjectWriter<'_>) -> Result<()> {
        writer.put_u32(self.len() as u32);
        for item in self {
            item.encode(writer)?;
        }
        Ok(())
    }

    fn decode(reader: &mut ObjectReader<'_>) -> Result<Self> {
        let count = reader.take_u32()? as usize;
        let mut items = Vec::with_capacity(count.min(PREALLOC_LIMIT));
        for _ in 0..count {
            items.push(T::decode(reader)?);
        }
        Ok(items)
    }
}

impl<T: Wire + Eq + Hash> Wire for HashSet<T> {
    fn encode(&self, writer: &mut ObjectWriter<'_>) -> Result<()> {
        writer.put_u32(self.len() as u32);
        for item in self {
            item.encode(writer)?;
        }
        Ok(())
    }

    fn decode(reader: &mut ObjectReader<'_>) -> Result<Self> {
        let count = reader.take_u32()? as usize;
        let mut items = HashSet::with_capacity(count.min(PREALLOC_LIMIT));
        for _ in 0..count {
            items.insert(T::decode(reader)?);
        }
        Ok(items)
    }
}

impl<K: Wire + Eq + Hash, V: Wire> Wire for HashMap<K, V> {
    fn encode(&self, writer: &mut ObjectWriter<'_>) -> Result<()> {
        writer.put_u32(self.len() as u32);
        for (key, value) in self {
            key.encode(writer)?;
            value.encode(writer)?;
        }
        Ok(())
    }

    fn decode(reader: &mut ObjectReader<'_>) -> Result<Self> {
        let count = reader.take_u32()? as usize;
        let mut map = HashMap::with_capacity(count.min(PREALLOC_LIMIT));
        for _ in 0..count {
            let key = K::decode(reader)?;
            let value = V::decode(reader)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<T: Wire> Wire for Option<T> {
    fn encode(&self, writer: &mut ObjectWriter<'_>) -> Result<()> {
        match self {
            None => {
                writer.put_bool(NULL_FLAG);
                Ok(())
            }
            Some(value) => {
                writer.put_bool(!NULL_FLAG);
                value.encode(writer)
            }
        }
    }

    fn decode(reader: &mut ObjectReader<'_>) -> Result<Self> {
        if reader.take_bool()? {
            return Ok(None);
        }
        Ok(Some(T::decode(reader)?))
    }
}
