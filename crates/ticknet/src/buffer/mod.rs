mod bits;
mod bytes;
pub mod codec;

pub use bits::{BitBuffer, MAX_BIT_WIDTH, VAR_MAX_VALUE, VAR_PREFIX_BITS, bits_for};
pub use bytes::{ByteBuffer, DEFAULT_BLOCK_SIZE, Origin};

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("access of {requested} byte(s) at offset {position} is outside a buffer of {size} byte(s)")]
    OutOfRange {
        position: isize,
        requested: usize,
        size: usize,
    },
    #[error("bit width {0} exceeds 32")]
    BitWidthExceeded(u32),
    #[error("string is not valid utf-8")]
    InvalidString,
}
