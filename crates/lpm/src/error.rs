//! Error types for LPM and value tables.

use thiserror::Error;

/// Errors raised while building lookup structures.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LpmError {
    #[error("key length {got} does not match table key length {expected}")]
    KeyLength { got: usize, expected: usize },

    #[error("value {0:#010x} is reserved as the miss sentinel")]
    ReservedValue(u32),

    #[error("range start is above range end")]
    InvertedRange,

    #[error("table dimensions {rows}x{cols} are invalid")]
    BadDimensions { rows: u32, cols: u32 },

    #[error(transparent)]
    Shm(#[from] riptide_shm::ShmError),
}

/// Result type for lookup-structure operations.
pub type LpmResult<T> = std::result::Result<T, LpmError>;
