//! Error types for the session table and sync codec.

use thiserror::Error;

/// Errors raised by session-table operations.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FwmapError {
    /// The target shard is at its load ceiling. Callers treat this as
    /// a drop trigger, not a failure of the table.
    #[error("session shard {shard} is at its load ceiling")]
    TableOverflow { shard: u32 },

    #[error("invalid table spec: {reason}")]
    BadSpec { reason: String },

    #[error("key length {got} does not match table key size {expected}")]
    KeySize { got: usize, expected: usize },

    #[error("value length {got} does not match table value size {expected}")]
    ValueSize { got: usize, expected: usize },

    #[error("sync payload of {len} bytes is not a whole number of {frame}-byte frames")]
    FrameLength { len: usize, frame: usize },

    #[error("sync frame carries unknown address type {0}")]
    BadAddrType(u8),

    #[error(transparent)]
    Shm(#[from] riptide_shm::ShmError),
}

impl FwmapError {
    /// Create a spec error.
    pub fn bad_spec(reason: impl Into<String>) -> Self {
        Self::BadSpec {
            reason: reason.into(),
        }
    }

    /// Get error code for categorization.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::TableOverflow { .. } => "FWM:SHARD:OVERFLOW",
            Self::BadSpec { .. } => "FWM:SPEC",
            Self::KeySize { .. } => "FWM:KEY:SIZE",
            Self::ValueSize { .. } => "FWM:VALUE:SIZE",
            Self::FrameLength { .. } => "FWM:SYNC:LENGTH",
            Self::BadAddrType(_) => "FWM:SYNC:ADDR",
            Self::Shm(_) => "FWM:SHM",
        }
    }
}

/// Result type for session-table operations.
pub type FwmapResult<T> = std::result::Result<T, FwmapError>;
