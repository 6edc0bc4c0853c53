//! Peer RPC payloads.
//!
//! Requests and responses use the protobuf wire format so that nodes can
//! interoperate with other groupcache-style implementations:
//!
//! ```text
//! message Request  { string group = 1; string key = 2; }
//! message Response { bytes value = 1; }
//! ```
//!
//! Only the handful of wire primitives those two messages need are
//! implemented here.

use bytes::Bytes;

use crate::error::{Error, Result};

/// Wire type for varint fields.
const WIRE_TYPE_VARINT: u8 = 0;
/// Wire type for 64-bit fixed fields.
const WIRE_TYPE_I64: u8 = 1;
/// Wire type for length-delimited fields.
const WIRE_TYPE_LEN: u8 = 2;
/// Wire type for 32-bit fixed fields.
const WIRE_TYPE_I32: u8 = 5;

fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn decode_varint(buf: &mut &[u8]) -> Option<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;

    loop {
        let (&byte, rest) = buf.split_first()?;
        *buf = rest;

        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

fn encode_bytes(field_number: u32, data: &[u8], buf: &mut Vec<u8>) {
    encode_varint(((field_number as u64) << 3) | WIRE_TYPE_LEN as u64, buf);
    encode_varint(data.len() as u64, buf);
    buf.extend_from_slice(data);
}

fn decode_tag(buf: &mut &[u8]) -> Option<(u32, u8)> {
    let tag = decode_varint(buf)?;
    Some(((tag >> 3) as u32, (tag & 0x07) as u8))
}

fn decode_length_delimited<'a>(buf: &mut &'a [u8]) -> Option<&'a [u8]> {
    let len = decode_varint(buf)? as usize;
    if buf.len() < len {
        return None;
    }
    let (data, rest) = buf.split_at(len);
    *buf = rest;
    Some(data)
}

fn skip_field(wire_type: u8, buf: &mut &[u8]) -> Option<()> {
    let width = match wire_type {
        WIRE_TYPE_VARINT => {
            decode_varint(buf)?;
            return Some(());
        }
        WIRE_TYPE_LEN => {
            decode_length_delimited(buf)?;
            return Some(());
        }
        WIRE_TYPE_I64 => 8,
        WIRE_TYPE_I32 => 4,
        _ => return None,
    };
    if buf.len() < width {
        return None;
    }
    *buf = &buf[width..];
    Some(())
}

fn decode_string(data: &[u8], field: &str) -> Result<String> {
    String::from_utf8(data.to_vec())
        .map_err(|_| Error::Decode(format!("field {} is not valid UTF-8", field)))
}

/// Lookup request sent to the peer that owns a key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub group: String,
    pub key: String,
}

impl Request {
    pub fn new(group: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            key: key.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.group.len() + self.key.len() + 8);
        encode_bytes(1, self.group.as_bytes(), &mut buf);
        encode_bytes(2, self.key.as_bytes(), &mut buf);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let mut request = Self::default();

        while !buf.is_empty() {
            let (field_number, wire_type) =
                decode_tag(&mut buf).ok_or_else(|| Error::Decode("truncated tag".into()))?;
            match (field_number, wire_type) {
                (1, WIRE_TYPE_LEN) => {
                    let data = decode_length_delimited(&mut buf)
                        .ok_or_else(|| Error::Decode("truncated group".into()))?;
                    request.group = decode_string(data, "group")?;
                }
                (2, WIRE_TYPE_LEN) => {
                    let data = decode_length_delimited(&mut buf)
                        .ok_or_else(|| Error::Decode("truncated key".into()))?;
                    request.key = decode_string(data, "key")?;
                }
                _ => skip_field(wire_type, &mut buf)
                    .ok_or_else(|| Error::Decode(format!("bad field {}", field_number)))?,
            }
        }

        Ok(request)
    }
}

/// Value returned by the owning peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub value: Bytes,
}

impl Response {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.value.len() + 6);
        encode_bytes(1, &self.value, &mut buf);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let mut value: Option<&[u8]> = None;

        while !buf.is_empty() {
            let (field_number, wire_type) =
                decode_tag(&mut buf).ok_or_else(|| Error::Decode("truncated tag".into()))?;
            match (field_number, wire_type) {
                (1, WIRE_TYPE_LEN) => {
                    value = Some(
                        decode_length_delimited(&mut buf)
                            .ok_or_else(|| Error::Decode("truncated value".into()))?,
                    );
                }
                _ => skip_field(wire_type, &mut buf)
                    .ok_or_else(|| Error::Decode(format!("bad field {}", field_number)))?,
            }
        }

        Ok(Self {
            value: Bytes::copy_from_slice(value.unwrap_or(&[])),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_request_wire_bytes() {
        let request = Request::new("scores", "Tom");
        let encoded = request.encode();
        // field 1, len 6, "scores", field 2, len 3, "Tom"
        let mut expected = vec![0x0a, 6];
        expected.extend_from_slice(b"scores");
        expected.extend_from_slice(&[0x12, 3]);
        expected.extend_from_slice(b"Tom");
        assert_eq!(encoded, expected);
        assert_eq!(Request::decode(&encoded).unwrap(), request);
    }

    #[test]
    fn test_response_large_value_uses_multibyte_length() {
        let response = Response::new(vec![7u8; 300]);
        let encoded = response.encode();
        assert_eq!(&encoded[..3], &[0x0a, 0xac, 0x02]);
        assert_eq!(Response::decode(&encoded).unwrap().value.len(), 300);
    }

    #[test]
    fn test_empty_response_decodes_to_empty_value() {
        let decoded = Response::decode(&[]).unwrap();
        assert!(decoded.value.is_empty());
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut encoded = Vec::new();
        encode_varint((9 << 3) | WIRE_TYPE_VARINT as u64, &mut encoded);
        encode_varint(150, &mut encoded);
        encoded.extend_from_slice(&Response::new("630").encode());

        let decoded = Response::decode(&encoded).unwrap();
        assert_eq!(decoded.value.as_ref(), b"630");
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let encoded = Response::new("630").encode();
        let result = Response::decode(&encoded[..encoded.len() - 1]);
        assert_matches!(result, Err(Error::Decode(_)));
    }

    #[test]
    fn test_invalid_utf8_key_is_rejected() {
        let mut encoded = Vec::new();
        encode_bytes(2, &[0xff, 0xfe], &mut encoded);
        assert_matches!(Request::decode(&encoded), Err(Error::Decode(msg)) if msg.contains("key"));
    }
}
