//! ZIP container parsing and member extraction.
//!
//! A WACZ file is a plain ZIP archive. The parser reads the End of Central
//! Directory record from the tail of the source, then the Central Directory,
//! so listing members never touches member data. Extraction streams one
//! member in bounded chunks and verifies its CRC-32.
//!
//! ## Supported Features
//!
//! - ZIP64 extensions for members and archives larger than 4GB
//! - STORED and DEFLATE members
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support

mod extractor;
mod parser;
mod structures;

use std::io;

use thiserror::Error;

pub use extractor::ZipExtractor;
pub use parser::ZipParser;
pub use structures::{CompressionMethod, ZipFileEntry};

/// Errors raised while reading the ZIP structure or a member.
#[derive(Debug, Error)]
pub enum ZipError {
    #[error("end of central directory record not found")]
    MissingEocd,

    #[error("invalid {0}")]
    InvalidStructure(&'static str),

    #[error("unsupported compression method {0}")]
    UnsupportedCompression(u16),

    #[error("encrypted members are not supported")]
    Encrypted,

    #[error("CRC-32 mismatch: expected {expected:08x}, got {actual:08x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error(transparent)]
    Io(#[from] io::Error),
}
