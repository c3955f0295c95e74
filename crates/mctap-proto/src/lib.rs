//! Memcached binary protocol framing and validation.
//!
//! Every packet starts with a fixed 24-byte header:
//! - A 1-byte magic (0x80 for requests, 0x81 for responses)
//! - A 1-byte opcode
//! - Big-endian key/extras/total-body length fields
//! - A 4-byte opaque used to pair requests with responses
//!
//! The codec never yields partial packets; decoding returns `Ok(None)`
//! until a complete header and body are buffered.

pub mod codec;
pub mod error;
pub mod opcode;
pub mod validate;

pub use codec::{
    decode_packet, encode_packet, Packet, DEFAULT_MAX_BODY, HEADER_SIZE, REQUEST_MAGIC,
    RESPONSE_MAGIC,
};
pub use error::{ProtoError, Result};
pub use opcode::opcode_name;
pub use validate::{looks_valid, rules_for, KeyBounds, Role};
