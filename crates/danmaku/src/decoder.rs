//! Segment payload decoder.
//!
//! A segment reply is a sequence of tagged fields; field 1 repeats and holds
//! one length-delimited danmaku element per occurrence. Integers are base-128
//! varints, strings are UTF-8 behind a varint length prefix. The reader works
//! on a borrowed buffer with an explicit cursor and keeps no state between
//! calls, so segments can be decoded concurrently.

use crate::error::{DanmakuError, Result};
use crate::record::CommentRecord;

/// Maximum encoded size of a 64-bit varint.
const MAX_VARINT_LEN: usize = 10;

/// Field number of the repeated element list in a segment reply.
const REPLY_ELEMS: u32 = 1;

/// Field numbers of a danmaku element.
mod elem {
    pub const ID: u32 = 1;
    pub const PROGRESS: u32 = 2;
    pub const MODE: u32 = 3;
    pub const FONT_SIZE: u32 = 4;
    pub const COLOR: u32 = 5;
    pub const MID_HASH: u32 = 6;
    pub const CONTENT: u32 = 7;
    pub const CTIME: u32 = 8;
    pub const WEIGHT: u32 = 9;
    pub const ACTION: u32 = 10;
    pub const POOL: u32 = 11;
    pub const ID_STR: u32 = 12;
    pub const ATTR: u32 = 13;
    pub const ANIMATION: u32 = 22;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    fn from_key(key: u64, offset: usize) -> Result<Self> {
        match key & 0x07 {
            0 => Ok(Self::Varint),
            1 => Ok(Self::Fixed64),
            2 => Ok(Self::LengthDelimited),
            5 => Ok(Self::Fixed32),
            3 | 4 => Err(DanmakuError::decode(offset, "group wire types are not supported")),
            other => Err(DanmakuError::decode(
                offset,
                format!("invalid wire type {other}"),
            )),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Varint => 0,
            Self::Fixed64 => 1,
            Self::LengthDelimited => 2,
            Self::Fixed32 => 5,
        }
    }
}

/// Cursor over a borrowed payload.
pub struct WireReader<'a> {
    buffer: &'a [u8],
    pos: usize,
    /// Absolute offset of `buffer[0]` within the outermost payload
    base: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self::with_base(buffer, 0)
    }

    fn with_base(buffer: &'a [u8], base: usize) -> Self {
        Self {
            buffer,
            pos: 0,
            base,
        }
    }

    /// Absolute offset of the cursor.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let start = self.offset();
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let byte = *self
                .buffer
                .get(self.pos)
                .ok_or_else(|| DanmakuError::decode(start, "truncated varint"))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DanmakuError::decode(start, "varint longer than 10 bytes"))
    }

    /// Read a field key, returning the field number and wire type.
    pub fn read_key(&mut self) -> Result<(u32, WireType)> {
        let start = self.offset();
        let key = self.read_varint()?;
        let wire_type = WireType::from_key(key, start)?;
        let field = u32::try_from(key >> 3)
            .map_err(|_| DanmakuError::decode(start, "field number out of range"))?;
        if field == 0 {
            return Err(DanmakuError::decode(start, "field number 0 is reserved"));
        }
        Ok((field, wire_type))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(DanmakuError::decode(
                self.offset(),
                format!(
                    "declared length {len} exceeds remaining {} bytes",
                    self.remaining()
                ),
            ));
        }
        let slice = &self.buffer[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a length-prefixed byte run.
    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let start = self.offset();
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| DanmakuError::decode(start, "length prefix out of range"))?;
        self.take(len)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let start = self.offset();
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DanmakuError::decode(start, format!("invalid UTF-8 in string field: {e}")))
    }

    /// Read a length-delimited sub-message as a nested reader.
    pub fn read_message(&mut self) -> Result<WireReader<'a>> {
        let bytes = self.read_bytes()?;
        let base = self.offset() - bytes.len();
        Ok(WireReader::with_base(bytes, base))
    }

    /// Skip over a field value of the given wire type.
    pub fn skip(&mut self, wire_type: WireType) -> Result<()> {
        match wire_type {
            WireType::Varint => self.read_varint().map(|_| ()),
            WireType::Fixed64 => self.take(8).map(|_| ()),
            WireType::Fixed32 => self.take(4).map(|_| ()),
            WireType::LengthDelimited => self.read_bytes().map(|_| ()),
        }
    }
}

fn expect_wire(field: u32, actual: WireType, expected: WireType, offset: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(DanmakuError::decode(
            offset,
            format!(
                "field {field} has wire type {} but {} was expected",
                actual.as_u8(),
                expected.as_u8()
            ),
        ))
    }
}

/// Decode one segment payload into its comment records, in payload order.
///
/// An empty payload is a valid, empty segment.
pub fn decode_segment(payload: &[u8]) -> Result<Vec<CommentRecord>> {
    let mut reader = WireReader::new(payload);
    let mut records = Vec::new();

    while !reader.is_empty() {
        let key_offset = reader.offset();
        let (field, wire_type) = reader.read_key()?;
        if field == REPLY_ELEMS {
            expect_wire(field, wire_type, WireType::LengthDelimited, key_offset)?;
            let mut message = reader.read_message()?;
            records.push(decode_record(&mut message)?);
        } else {
            reader.skip(wire_type)?;
        }
    }

    Ok(records)
}

/// Decode a single danmaku element. Unknown fields are skipped.
pub fn decode_record(reader: &mut WireReader<'_>) -> Result<CommentRecord> {
    let mut record = CommentRecord::default();

    while !reader.is_empty() {
        let key_offset = reader.offset();
        let (field, wire_type) = reader.read_key()?;
        match field {
            elem::ID
            | elem::PROGRESS
            | elem::MODE
            | elem::FONT_SIZE
            | elem::COLOR
            | elem::CTIME
            | elem::WEIGHT
            | elem::POOL
            | elem::ATTR => {
                expect_wire(field, wire_type, WireType::Varint, key_offset)?;
                let raw = reader.read_varint()?;
                // int32 fields are sign-extended to 64 bits on the wire, so
                // truncation recovers negative values.
                match field {
                    elem::ID => record.id = raw as i64,
                    elem::PROGRESS => record.timestamp_ms = raw as i32,
                    elem::MODE => record.mode = (raw as i32).into(),
                    elem::FONT_SIZE => record.font_size = raw as i32,
                    elem::COLOR => record.color = raw as u32,
                    elem::CTIME => record.send_time_unix = raw as i64,
                    elem::WEIGHT => record.weight = raw as i32,
                    elem::POOL => record.pool = (raw as i32).into(),
                    _ => record.attr = raw as i32,
                }
            }
            elem::MID_HASH | elem::CONTENT | elem::ACTION | elem::ID_STR | elem::ANIMATION => {
                expect_wire(field, wire_type, WireType::LengthDelimited, key_offset)?;
                let value = reader.read_string()?;
                match field {
                    elem::MID_HASH => record.sender_hash = value,
                    elem::CONTENT => record.text = value,
                    elem::ACTION => record.action = value,
                    elem::ID_STR => record.row_id = value,
                    _ => record.animation = value,
                }
            }
            _ => reader.skip(wire_type)?,
        }
    }

    Ok(record)
}
