//! # Wire Codec Primitives
//!
//! Little-endian integer access, CompactSize (var_int) integers, and
//! length-prefixed strings, as used by every Bitcoin wire payload.

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use thiserror::Error;

/// Errors from payload encoding or decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// The payload ended before the field was complete.
    #[error("payload exhausted at offset {offset}")]
    UnexpectedEnd { offset: usize },

    /// A CompactSize or string exceeded its sanity bound.
    #[error("field length {length} exceeds limit {limit}")]
    OversizedField { length: u64, limit: u64 },

    /// Trailing bytes remained after the last field.
    #[error("{0} undecoded trailing bytes")]
    TrailingBytes(usize),

    /// A string field was not valid UTF-8.
    #[error("invalid string encoding")]
    BadString,
}

/// Upper bound on decoded collection lengths, a denial-of-service guard.
pub const MAX_COLLECTION: u64 = 50_000;

/// Sequential reader over a payload slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// Fail unless every byte of the payload was consumed.
    pub fn finish(self) -> Result<(), MessageError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(MessageError::TrailingBytes(n)),
        }
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], MessageError> {
        if self.remaining() < count {
            return Err(MessageError::UnexpectedEnd { offset: self.pos });
        }
        let slice = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, MessageError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16, MessageError> {
        Ok(LittleEndian::read_u16(self.read_bytes(2)?))
    }

    pub fn read_u16_be(&mut self) -> Result<u16, MessageError> {
        Ok(BigEndian::read_u16(self.read_bytes(2)?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, MessageError> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, MessageError> {
        Ok(LittleEndian::read_u64(self.read_bytes(8)?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, MessageError> {
        Ok(LittleEndian::read_i32(self.read_bytes(4)?))
    }

    pub fn read_i64_le(&mut self) -> Result<i64, MessageError> {
        Ok(LittleEndian::read_i64(self.read_bytes(8)?))
    }

    /// CompactSize: 1, 3, 5, or 9 bytes depending on magnitude.
    pub fn read_var_int(&mut self) -> Result<u64, MessageError> {
        match self.read_u8()? {
            0xff => self.read_u64_le(),
            0xfe => self.read_u32_le().map(u64::from),
            0xfd => self.read_u16_le().map(u64::from),
            byte => Ok(u64::from(byte)),
        }
    }

    /// CompactSize bounded by `MAX_COLLECTION`, for element counts.
    pub fn read_count(&mut self) -> Result<usize, MessageError> {
        let count = self.read_var_int()?;
        if count > MAX_COLLECTION {
            return Err(MessageError::OversizedField {
                length: count,
                limit: MAX_COLLECTION,
            });
        }
        Ok(count as usize)
    }

    /// CompactSize-prefixed UTF-8 string.
    pub fn read_var_string(&mut self) -> Result<String, MessageError> {
        let length = self.read_count()?;
        let bytes = self.read_bytes(length)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| MessageError::BadString)
    }

    /// 16-byte address field: IPv4 is carried v4-mapped.
    pub fn read_ip(&mut self) -> Result<IpAddr, MessageError> {
        let bytes: [u8; 16] = self.read_bytes(16)?.try_into().expect("fixed slice");
        let v6 = Ipv6Addr::from(bytes);
        Ok(match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        })
    }

    pub fn read_hash(&mut self) -> Result<[u8; 32], MessageError> {
        Ok(self.read_bytes(32)?.try_into().expect("fixed slice"))
    }
}

/// Append-only writer extensions for payload buffers.
///
/// `Vec<u8>` writes are infallible, so these helpers drop the `io::Result`
/// plumbing that `byteorder` carries for general writers.
pub trait WriteExt {
    fn put_u8(&mut self, value: u8);
    fn put_u16_le(&mut self, value: u16);
    fn put_u16_be(&mut self, value: u16);
    fn put_u32_le(&mut self, value: u32);
    fn put_u64_le(&mut self, value: u64);
    fn put_i32_le(&mut self, value: i32);
    fn put_i64_le(&mut self, value: i64);
    fn put_bytes(&mut self, bytes: &[u8]);
    fn put_var_int(&mut self, value: u64);
    fn put_var_string(&mut self, value: &str);
    fn put_ip(&mut self, ip: &IpAddr);
}

impl WriteExt for Vec<u8> {
    fn put_u8(&mut self, value: u8) {
        WriteBytesExt::write_u8(self, value).expect("vec write");
    }

    fn put_u16_le(&mut self, value: u16) {
        WriteBytesExt::write_u16::<LittleEndian>(self, value).expect("vec write");
    }

    fn put_u16_be(&mut self, value: u16) {
        WriteBytesExt::write_u16::<BigEndian>(self, value).expect("vec write");
    }

    fn put_u32_le(&mut self, value: u32) {
        WriteBytesExt::write_u32::<LittleEndian>(self, value).expect("vec write");
    }

    fn put_u64_le(&mut self, value: u64) {
        WriteBytesExt::write_u64::<LittleEndian>(self, value).expect("vec write");
    }

    fn put_i32_le(&mut self, value: i32) {
        WriteBytesExt::write_i32::<LittleEndian>(self, value).expect("vec write");
    }

    fn put_i64_le(&mut self, value: i64) {
        WriteBytesExt::write_i64::<LittleEndian>(self, value).expect("vec write");
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        Write::write_all(self, bytes).expect("vec write");
    }

    fn put_var_int(&mut self, value: u64) {
        match value {
            0..=0xfc => self.put_u8(value as u8),
            0xfd..=0xffff => {
                self.put_u8(0xfd);
                self.put_u16_le(value as u16);
            }
            0x1_0000..=0xffff_ffff => {
                self.put_u8(0xfe);
                self.put_u32_le(value as u32);
            }
            _ => {
                self.put_u8(0xff);
                self.put_u64_le(value);
            }
        }
    }

    fn put_var_string(&mut self, value: &str) {
        self.put_var_int(value.len() as u64);
        self.put_bytes(value.as_bytes());
    }

    fn put_ip(&mut self, ip: &IpAddr) {
        let v6 = match ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => *v6,
        };
        self.put_bytes(&v6.octets());
    }
}

/// Convenience constructor for the common v4-mapped test case.
pub fn ipv4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(a, b, c, d))
}
