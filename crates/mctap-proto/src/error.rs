/// Errors that can occur while decoding protocol packets.
///
/// All of these mean the stream is misaligned or the header lies about
/// its lengths; callers may resynchronize on the next magic byte.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// The first byte is not the magic expected for this direction.
    #[error("invalid packet magic 0x{0:02x}")]
    InvalidMagic(u8),

    /// The total body length exceeds the configured maximum.
    #[error("packet body too large ({size} bytes, max {max})")]
    BodyTooLarge { size: usize, max: usize },

    /// Key and extras lengths do not fit within the total body length.
    #[error("key length {key_len} + extras length {extras_len} exceed body length {body_len}")]
    LengthMismatch {
        key_len: usize,
        extras_len: usize,
        body_len: usize,
    },
}

pub type Result<T> = std::result::Result<T, ProtoError>;
