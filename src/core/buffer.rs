//! # Buffer Primitives
//!
//! Append-only write buffer and consuming read buffer for the wire format.
//!
//! All numeric types use little-endian fixed-width encoding. Strings and
//! byte slices are length-prefixed with a 4-byte count followed by the raw
//! bytes. Timestamps travel as unix milliseconds, durations as millisecond
//! counts, socket addresses as length-prefixed IP octets plus a 16-bit port.
//!
//! Reading past the available length is always an error
//! ([`ProtocolError::Underflow`]), never silently zero-filled.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, SystemTime};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::utils::time;

/// Append-only byte buffer with length-prefixed writes for primitive types.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    buf: BytesMut,
}

impl WriteBuffer {
    /// Create an empty write buffer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Create a write buffer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn put_i16(&mut self, value: i16) {
        self.buf.put_i16_le(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    pub fn put_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    pub fn put_f64(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Append a 4-byte count followed by the raw bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.buf.put_slice(bytes);
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn put_str(&mut self, value: &str) {
        self.put_bytes(value.as_bytes());
    }

    /// Append a timestamp as unix milliseconds.
    pub fn put_timestamp(&mut self, value: SystemTime) {
        self.put_i64(time::to_unix_millis(value));
    }

    /// Append a duration as a millisecond count.
    pub fn put_duration(&mut self, value: Duration) {
        self.put_u64(value.as_millis() as u64);
    }

    /// Append a socket address: length-prefixed IP octets, then the port.
    pub fn put_addr(&mut self, addr: SocketAddr) {
        match addr.ip() {
            IpAddr::V4(ip) => self.put_bytes(&ip.octets()),
            IpAddr::V6(ip) => self.put_bytes(&ip.octets()),
        }
        self.put_u16(addr.port());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Freeze the buffer into an immutable byte sequence.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Consume the buffer into a plain byte vector.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Consuming byte buffer; every `take` fails on underflow.
#[derive(Debug)]
pub struct ReadBuffer {
    buf: Bytes,
}

impl ReadBuffer {
    /// Wrap a byte sequence for consumption.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { buf: data.into() }
    }

    /// Number of unconsumed bytes.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn check(&self, needed: usize) -> Result<()> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(ProtocolError::Underflow { needed, remaining });
        }
        Ok(())
    }

    /// Consume and return the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<Bytes> {
        self.check(n)?;
        Ok(self.buf.split_to(n))
    }

    pub fn take_u8(&mut self) -> Result<u8> {
        self.check(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn take_i8(&mut self) -> Result<i8> {
        self.check(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn take_u16(&mut self) -> Result<u16> {
        self.check(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn take_i16(&mut self) -> Result<i16> {
        self.check(2)?;
        Ok(self.buf.get_i16_le())
    }

    pub fn take_u32(&mut self) -> Result<u32> {
        self.check(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn take_i32(&mut self) -> Result<i32> {
        self.check(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn take_u64(&mut self) -> Result<u64> {
        self.check(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn take_i64(&mut self) -> Result<i64> {
        self.check(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn take_f32(&mut self) -> Result<f32> {
        self.check(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn take_f64(&mut self) -> Result<f64> {
        self.check(8)?;
        Ok(self.buf.get_f64_le())
    }

    pub fn take_bool(&mut self) -> Result<bool> {
        Ok(self.take_u8()? == 1)
    }

    /// Consume a 4-byte count followed by that many raw bytes.
    pub fn take_bytes(&mut self) -> Result<Bytes> {
        let count = self.take_u32()? as usize;
        self.take(count)
    }

    /// Consume a length-prefixed UTF-8 string.
    pub fn take_str(&mut self) -> Result<String> {
        let bytes = self.take_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ProtocolError::Decode(format!("invalid UTF-8 string: {e}")))
    }

    /// Consume a unix-millisecond timestamp.
    pub fn take_timestamp(&mut self) -> Result<SystemTime> {
        Ok(time::from_unix_millis(self.take_i64()?))
    }

    /// Consume a millisecond duration.
    pub fn take_duration(&mut self) -> Result<Duration> {
        Ok(Duration::from_millis(self.take_u64()?))
    }

    /// Consume a socket address.
    pub fn take_addr(&mut self) -> Result<SocketAddr> {
        let octets = self.take_bytes()?;
        let ip = match octets.len() {
            4 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&octets);
                IpAddr::V4(Ipv4Addr::from(raw))
            }
            16 => {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(&octets);
                IpAddr::V6(Ipv6Addr::from(raw))
            }
            other => {
                return Err(ProtocolError::Decode(format!(
                    "invalid IP address length: {other}"
                )))
            }
        };
        let port = self.take_u16()?;
        Ok(SocketAddr::new(ip, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_roundtrip() {
        let mut w = WriteBuffer::new();
        w.put_u8(0xAB);
        w.put_u16(0xBEEF);
        w.put_u32(0xDEAD_BEEF);
        w.put_u64(u64::MAX - 1);
        w.put_i32(-42);
        w.put_i64(i64::MIN);
        w.put_f64(6.25);
        w.put_bool(true);

        let mut r = ReadBuffer::new(w.freeze());
        assert_eq!(r.take_u8().unwrap(), 0xAB);
        assert_eq!(r.take_u16().unwrap(), 0xBEEF);
        assert_eq!(r.take_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.take_u64().unwrap(), u64::MAX - 1);
        assert_eq!(r.take_i32().unwrap(), -42);
        assert_eq!(r.take_i64().unwrap(), i64::MIN);
        assert_eq!(r.take_f64().unwrap(), 6.25);
        assert!(r.take_bool().unwrap());
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn little_endian_layout() {
        let mut w = WriteBuffer::new();
        w.put_u32(0x0403_0201);
        assert_eq!(w.into_vec(), vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn string_is_length_prefixed() {
        let mut w = WriteBuffer::new();
        w.put_str("abc");
        let bytes = w.into_vec();
        assert_eq!(&bytes[..4], &[3, 0, 0, 0]);
        assert_eq!(&bytes[4..], b"abc");
    }

    #[test]
    fn underflow_is_an_error() {
        let mut r = ReadBuffer::new(vec![1u8, 2]);
        let err = r.take_u32().unwrap_err();
        match err {
            ProtocolError::Underflow { needed, remaining } => {
                assert_eq!(needed, 4);
                assert_eq!(remaining, 2);
            }
            other => panic!("expected underflow, got {other:?}"),
        }
        // The failed read consumed nothing.
        assert_eq!(r.take_u8().unwrap(), 1);
    }

    #[test]
    fn hostile_length_prefix_is_an_error() {
        let mut w = WriteBuffer::new();
        w.put_u32(u32::MAX);
        w.put_u8(0);
        let mut r = ReadBuffer::new(w.freeze());
        assert!(matches!(
            r.take_bytes(),
            Err(ProtocolError::Underflow { .. })
        ));
    }

    #[test]
    fn timestamp_duration_roundtrip() {
        let now = SystemTime::now();
        let mut w = WriteBuffer::new();
        w.put_timestamp(now);
        w.put_duration(Duration::from_millis(1500));

        let mut r = ReadBuffer::new(w.freeze());
        let decoded = r.take_timestamp().unwrap();
        // Encoding truncates to millisecond precision.
        let delta = now
            .duration_since(decoded)
            .unwrap_or_else(|e| e.duration());
        assert!(delta < Duration::from_millis(1));
        assert_eq!(r.take_duration().unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn addr_roundtrip() {
        for addr in ["127.0.0.1:9000", "[::1]:80"] {
            let addr: SocketAddr = addr.parse().unwrap();
            let mut w = WriteBuffer::new();
            w.put_addr(addr);
            let mut r = ReadBuffer::new(w.freeze());
            assert_eq!(r.take_addr().unwrap(), addr);
        }
    }
}
