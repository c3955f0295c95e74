use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtoError, Result};

/// Fixed packet header size: magic (1) + opcode (1) + key length (2) +
/// extras length (1) + data type (1) + vbucket/status (2) +
/// total body length (4) + opaque (4) + CAS (8) = 24 bytes.
pub const HEADER_SIZE: usize = 24;

/// Magic byte carried by client-originated packets.
pub const REQUEST_MAGIC: u8 = 0x80;

/// Magic byte carried by server-originated packets.
pub const RESPONSE_MAGIC: u8 = 0x81;

/// Default maximum total body length: 20 MiB.
pub const DEFAULT_MAX_BODY: usize = 20 * 1024 * 1024;

/// A decoded memcached binary protocol packet.
///
/// The same shape carries requests and responses; the magic byte says
/// which one this is. The 2-byte field at offset 6 is the vbucket id in
/// requests and the status code in responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub magic: u8,
    pub opcode: u8,
    pub data_type: u8,
    pub vbucket: u16,
    pub opaque: u32,
    pub cas: u64,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl Packet {
    /// Create an empty request packet for the given opcode.
    pub fn request(opcode: u8) -> Self {
        Self {
            magic: REQUEST_MAGIC,
            opcode,
            data_type: 0,
            vbucket: 0,
            opaque: 0,
            cas: 0,
            extras: Bytes::new(),
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    /// Create an empty response packet for the given opcode.
    pub fn response(opcode: u8) -> Self {
        Self {
            magic: RESPONSE_MAGIC,
            ..Self::request(opcode)
        }
    }

    /// True if this packet carries the response magic.
    pub fn is_response(&self) -> bool {
        self.magic == RESPONSE_MAGIC
    }

    /// Response status code (aliases the vbucket field).
    pub fn status(&self) -> u16 {
        self.vbucket
    }

    /// Total body length: extras + key + value.
    pub fn total_body_len(&self) -> usize {
        self.extras.len() + self.key.len() + self.value.len()
    }

    /// The total wire size of this packet (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.total_body_len()
    }
}

/// Encode a packet into the wire format.
///
/// Only used by tests and synthetic capture builders; the analyzer itself
/// is read-only.
pub fn encode_packet(pkt: &Packet, dst: &mut BytesMut) -> Result<()> {
    let body_len = pkt.total_body_len();
    if body_len > u32::MAX as usize {
        return Err(ProtoError::BodyTooLarge {
            size: body_len,
            max: u32::MAX as usize,
        });
    }
    if pkt.key.len() > u16::MAX as usize || pkt.extras.len() > u8::MAX as usize {
        return Err(ProtoError::LengthMismatch {
            key_len: pkt.key.len(),
            extras_len: pkt.extras.len(),
            body_len,
        });
    }
    dst.reserve(HEADER_SIZE + body_len);
    dst.put_u8(pkt.magic);
    dst.put_u8(pkt.opcode);
    dst.put_u16(pkt.key.len() as u16);
    dst.put_u8(pkt.extras.len() as u8);
    dst.put_u8(pkt.data_type);
    dst.put_u16(pkt.vbucket);
    dst.put_u32(body_len as u32);
    dst.put_u32(pkt.opaque);
    dst.put_u64(pkt.cas);
    dst.put_slice(&pkt.extras);
    dst.put_slice(&pkt.key);
    dst.put_slice(&pkt.value);
    Ok(())
}

/// Decode one packet from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes exactly the header and body bytes from the buffer.
/// An error leaves the buffer untouched so callers can resynchronize.
pub fn decode_packet(
    src: &mut BytesMut,
    expected_magic: u8,
    max_body: usize,
) -> Result<Option<Packet>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    if src[0] != expected_magic {
        return Err(ProtoError::InvalidMagic(src[0]));
    }

    let opcode = src[1];
    let key_len = u16::from_be_bytes([src[2], src[3]]) as usize;
    let extras_len = src[4] as usize;
    let data_type = src[5];
    let vbucket = u16::from_be_bytes([src[6], src[7]]);
    let body_len = u32::from_be_bytes([src[8], src[9], src[10], src[11]]) as usize;
    let opaque = u32::from_be_bytes([src[12], src[13], src[14], src[15]]);
    let cas = u64::from_be_bytes([
        src[16], src[17], src[18], src[19], src[20], src[21], src[22], src[23],
    ]);

    if body_len > max_body {
        return Err(ProtoError::BodyTooLarge {
            size: body_len,
            max: max_body,
        });
    }
    if key_len + extras_len > body_len {
        return Err(ProtoError::LengthMismatch {
            key_len,
            extras_len,
            body_len,
        });
    }

    let total = HEADER_SIZE + body_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let extras = src.split_to(extras_len).freeze();
    let key = src.split_to(key_len).freeze();
    let value = src.split_to(body_len - extras_len - key_len).freeze();

    Ok(Some(Packet {
        magic: expected_magic,
        opcode,
        data_type,
        vbucket,
        opaque,
        cas,
        extras,
        key,
        value,
    }))
}
