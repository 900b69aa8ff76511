//! Wire-level decode failures.

use thiserror::Error;

/// Errors raised while encoding or decoding messages and blocks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("message or block truncated")]
    UnexpectedEof,

    #[error("message CRC mismatch: stored {stored:#06X}, computed {computed:#06X}")]
    CrcMismatch { stored: u16, computed: u16 },

    #[error("unknown block type {byte:#04X}")]
    UnknownBlockType { byte: u8 },

    #[error("invalid {field} byte {byte:#04X}")]
    InvalidValue { field: &'static str, byte: u8 },

    #[error("block body length {len} exceeds the 255-byte block limit")]
    BlockTooLong { len: usize },

    #[error("message body length {len} exceeds the 255-byte message limit")]
    MessageTooLong { len: usize },
}
