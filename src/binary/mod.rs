//! Binary-format plumbing for the module decoder: byte cursor, LEB128
//! integers, vector/name helpers, and the section-level parser.

pub mod cursor;
pub mod leb128;
pub mod reader;
pub mod sections;

use thiserror::Error;

/// Result alias for decoding operations.
pub type Result<T> = core::result::Result<T, DecodeError>;

/// Errors produced while decoding a Wasm binary module.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid magic number")]
    InvalidMagic,

    #[error("invalid version number")]
    InvalidVersion,

    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("LEB128 overflow (target bits={target_bits}) at offset {offset}")]
    LebOverflow { target_bits: u8, offset: usize },

    #[error("too many bytes in LEB128 (limit={limit}) at offset {offset}")]
    LebTooManyBytes { limit: u8, offset: usize },

    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("unknown section id {id}")]
    UnknownSectionId { id: u8 },

    #[error("section id {id} out of order")]
    SectionOutOfOrder { id: u8 },

    #[error("duplicate section id {id}")]
    DuplicateSection { id: u8 },

    #[error("index out of range ({context}: {index})")]
    IndexOutOfRange { context: &'static str, index: u32 },

    #[error("element segment placement overflows table")]
    ElementPlacementOverflow,

    #[error("malformed module at offset {offset}: {msg}")]
    Malformed { offset: usize, msg: &'static str },
}
