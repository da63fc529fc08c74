//! Payload builders for tests.
//!
//! Produces segment payloads in the same wire layout the decoder reads, so
//! tests in this crate and downstream crates can serve realistic segments.

use crate::decoder::WireType;
use crate::record::CommentRecord;

pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

pub fn put_key(buf: &mut Vec<u8>, field: u32, wire_type: WireType) {
    put_varint(buf, (u64::from(field) << 3) | u64::from(wire_type.as_u8()));
}

fn put_int(buf: &mut Vec<u8>, field: u32, value: i64) {
    if value != 0 {
        put_key(buf, field, WireType::Varint);
        put_varint(buf, value as u64);
    }
}

fn put_str(buf: &mut Vec<u8>, field: u32, value: &str) {
    if !value.is_empty() {
        put_key(buf, field, WireType::LengthDelimited);
        put_varint(buf, value.len() as u64);
        buf.extend_from_slice(value.as_bytes());
    }
}

/// Encode one record as an element body (without the outer key/length).
pub fn encode_record(record: &CommentRecord) -> Vec<u8> {
    let mut buf = Vec::new();
    put_int(&mut buf, 1, record.id);
    put_int(&mut buf, 2, i64::from(record.timestamp_ms));
    put_int(&mut buf, 3, i64::from(i32::from(record.mode)));
    put_int(&mut buf, 4, i64::from(record.font_size));
    put_int(&mut buf, 5, i64::from(record.color));
    put_str(&mut buf, 6, &record.sender_hash);
    put_str(&mut buf, 7, &record.text);
    put_int(&mut buf, 8, record.send_time_unix);
    put_int(&mut buf, 9, i64::from(record.weight));
    put_str(&mut buf, 10, &record.action);
    put_int(&mut buf, 11, i64::from(i32::from(record.pool)));
    put_str(&mut buf, 12, &record.row_id);
    put_int(&mut buf, 13, i64::from(record.attr));
    put_str(&mut buf, 22, &record.animation);
    buf
}

/// Encode a full segment reply holding `records` in order.
pub fn encode_segment(records: &[CommentRecord]) -> Vec<u8> {
    let mut buf = Vec::new();
    for record in records {
        let elem = encode_record(record);
        put_key(&mut buf, 1, WireType::LengthDelimited);
        put_varint(&mut buf, elem.len() as u64);
        buf.extend_from_slice(&elem);
    }
    buf
}

/// A minimal record with the fields tests usually care about.
pub fn record(id: i64, timestamp_ms: i32, text: &str) -> CommentRecord {
    CommentRecord {
        id,
        timestamp_ms,
        font_size: 25,
        color: 0xFFFFFF,
        send_time_unix: 1_700_000_000 + id,
        sender_hash: format!("{id:08x}"),
        row_id: id.to_string(),
        text: text.to_string(),
        ..Default::default()
    }
}
