//! AMF0 encoding and decoding
//!
//! Type markers handled:
//! ```text
//! 0x00 Number      0x01 Boolean     0x02 String      0x03 Object
//! 0x05 Null        0x06 Undefined   0x08 ECMA Array  0x09 Object End
//! 0x0A Strict Array 0x0B Date       0x0C Long String 0x0D Unsupported
//! ```
//! References (0x07), XML, typed objects and AMF3 switching never appear in
//! the publish handshake of mainstream encoders and are rejected.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;
const MARKER_UNSUPPORTED: u8 = 0x0D;

const MAX_DEPTH: usize = 32;

/// Decode every value in `buf`
pub fn decode_all(buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
    let mut values = Vec::new();
    while buf.has_remaining() {
        values.push(decode(buf)?);
    }
    Ok(values)
}

/// Decode one value
pub fn decode(buf: &mut Bytes) -> Result<AmfValue, AmfError> {
    decode_at(buf, 0)
}

fn decode_at(buf: &mut Bytes, depth: usize) -> Result<AmfValue, AmfError> {
    if depth > MAX_DEPTH {
        return Err(AmfError::NestingTooDeep);
    }
    if !buf.has_remaining() {
        return Err(AmfError::UnexpectedEof);
    }

    match buf.get_u8() {
        MARKER_NUMBER => {
            need(buf, 8)?;
            Ok(AmfValue::Number(buf.get_f64()))
        }
        MARKER_BOOLEAN => {
            need(buf, 1)?;
            Ok(AmfValue::Boolean(buf.get_u8() != 0))
        }
        MARKER_STRING => Ok(AmfValue::String(read_string(buf)?)),
        MARKER_LONG_STRING => {
            need(buf, 4)?;
            let len = buf.get_u32() as usize;
            Ok(AmfValue::String(read_utf8(buf, len)?))
        }
        MARKER_OBJECT => Ok(AmfValue::Object(read_properties(buf, depth)?)),
        MARKER_ECMA_ARRAY => {
            // The count is advisory; the end marker terminates
            need(buf, 4)?;
            buf.advance(4);
            Ok(AmfValue::EcmaArray(read_properties(buf, depth)?))
        }
        MARKER_STRICT_ARRAY => {
            need(buf, 4)?;
            let count = buf.get_u32() as usize;
            let mut items = Vec::with_capacity(count.min(256));
            for _ in 0..count {
                items.push(decode_at(buf, depth + 1)?);
            }
            Ok(AmfValue::StrictArray(items))
        }
        MARKER_DATE => {
            need(buf, 10)?;
            let millis = buf.get_f64();
            buf.advance(2);
            Ok(AmfValue::Date(millis))
        }
        MARKER_NULL => Ok(AmfValue::Null),
        MARKER_UNDEFINED | MARKER_UNSUPPORTED => Ok(AmfValue::Undefined),
        other => Err(AmfError::UnknownMarker(other)),
    }
}

fn need(buf: &Bytes, n: usize) -> Result<(), AmfError> {
    if buf.remaining() < n {
        Err(AmfError::UnexpectedEof)
    } else {
        Ok(())
    }
}

fn read_string(buf: &mut Bytes) -> Result<String, AmfError> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    read_utf8(buf, len)
}

fn read_utf8(buf: &mut Bytes, len: usize) -> Result<String, AmfError> {
    need(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

fn read_properties(buf: &mut Bytes, depth: usize) -> Result<AmfObject, AmfError> {
    let mut props = Vec::new();
    loop {
        // Some encoders truncate the trailing end marker
        if buf.remaining() < 2 {
            return Ok(props);
        }
        let key = read_string(buf)?;
        if key.is_empty() {
            if buf.first() == Some(&MARKER_OBJECT_END) {
                buf.advance(1);
            }
            return Ok(props);
        }
        props.push((key, decode_at(buf, depth + 1)?));
    }
}

/// Append the encoding of `value` to `out`
pub fn encode(out: &mut BytesMut, value: &AmfValue) {
    match value {
        AmfValue::Null => out.put_u8(MARKER_NULL),
        AmfValue::Undefined => out.put_u8(MARKER_UNDEFINED),
        AmfValue::Boolean(b) => {
            out.put_u8(MARKER_BOOLEAN);
            out.put_u8(*b as u8);
        }
        AmfValue::Number(n) => {
            out.put_u8(MARKER_NUMBER);
            out.put_f64(*n);
        }
        AmfValue::String(s) if s.len() > u16::MAX as usize => {
            out.put_u8(MARKER_LONG_STRING);
            out.put_u32(s.len() as u32);
            out.put_slice(s.as_bytes());
        }
        AmfValue::String(s) => {
            out.put_u8(MARKER_STRING);
            write_key(out, s);
        }
        AmfValue::Object(props) => {
            out.put_u8(MARKER_OBJECT);
            write_properties(out, props);
        }
        AmfValue::EcmaArray(props) => {
            out.put_u8(MARKER_ECMA_ARRAY);
            out.put_u32(props.len() as u32);
            write_properties(out, props);
        }
        AmfValue::StrictArray(items) => {
            out.put_u8(MARKER_STRICT_ARRAY);
            out.put_u32(items.len() as u32);
            for item in items {
                encode(out, item);
            }
        }
        AmfValue::Date(millis) => {
            out.put_u8(MARKER_DATE);
            out.put_f64(*millis);
            out.put_i16(0);
        }
    }
}

/// Encode a sequence of values into a fresh buffer
pub fn encode_all(values: &[AmfValue]) -> Bytes {
    let mut out = BytesMut::with_capacity(128);
    for value in values {
        encode(&mut out, value);
    }
    out.freeze()
}

fn write_key(out: &mut BytesMut, s: &str) {
    let len = s.len().min(u16::MAX as usize);
    out.put_u16(len as u16);
    out.put_slice(&s.as_bytes()[..len]);
}

fn write_properties(out: &mut BytesMut, props: &[(String, AmfValue)]) {
    for (key, value) in props {
        write_key(out, key);
        encode(out, value);
    }
    out.put_u16(0);
    out.put_u8(MARKER_OBJECT_END);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::value::object;

    #[test]
    fn test_connect_command_roundtrip() {
        let values = vec![
            AmfValue::from("connect"),
            AmfValue::Number(1.0),
            object([
                ("app", AmfValue::from("live")),
                ("flashVer", "FMLE/3.0".into()),
                ("fpad", false.into()),
            ]),
        ];

        let mut encoded = encode_all(&values);
        let decoded = decode_all(&mut encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_decode_known_bytes() {
        // "publish", 5.0, null, "key"
        let mut buf = Bytes::from_static(&[
            0x02, 0x00, 0x07, b'p', b'u', b'b', b'l', b'i', b's', b'h', 0x00, 0x40, 0x14, 0, 0,
            0, 0, 0, 0, 0x05, 0x02, 0x00, 0x03, b'k', b'e', b'y',
        ]);
        let values = decode_all(&mut buf).unwrap();
        assert_eq!(values[0].as_str(), Some("publish"));
        assert_eq!(values[1].as_number(), Some(5.0));
        assert_eq!(values[2], AmfValue::Null);
        assert_eq!(values[3].as_str(), Some("key"));
    }

    #[test]
    fn test_ecma_array_metadata() {
        let meta = AmfValue::EcmaArray(vec![
            ("videocodecid".into(), AmfValue::Number(7.0)),
            ("audiocodecid".into(), AmfValue::Number(10.0)),
        ]);
        let mut out = BytesMut::new();
        encode(&mut out, &meta);

        let decoded = decode(&mut out.freeze()).unwrap();
        assert_eq!(decoded.get_number("videocodecid"), Some(7.0));
        assert_eq!(decoded.get_number("audiocodecid"), Some(10.0));
    }

    #[test]
    fn test_missing_object_end_is_tolerated() {
        // Object with one property and no terminator
        let mut buf = Bytes::from_static(&[0x03, 0x00, 0x01, b'a', 0x05]);
        let value = decode(&mut buf).unwrap();
        assert_eq!(value.get("a"), Some(&AmfValue::Null));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            decode(&mut Bytes::from_static(&[0x00, 0x40])),
            Err(AmfError::UnexpectedEof)
        );
        assert_eq!(
            decode(&mut Bytes::from_static(&[0x07, 0x00, 0x01])),
            Err(AmfError::UnknownMarker(0x07))
        );
        assert_eq!(
            decode(&mut Bytes::from_static(&[0x02, 0x00, 0x02, 0xFF, 0xFE])),
            Err(AmfError::InvalidUtf8)
        );
    }

    #[test]
    fn test_nesting_limit() {
        let mut raw = Vec::new();
        for _ in 0..40 {
            raw.extend_from_slice(&[0x0A, 0x00, 0x00, 0x00, 0x01]);
        }
        raw.push(0x05);
        assert_eq!(
            decode(&mut Bytes::from(raw)),
            Err(AmfError::NestingTooDeep)
        );
    }
}
