//! Error types for the worker engine.

use thiserror::Error;

/// Errors raised on the data-plane side.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DataplaneError {
    #[error("packet parse error: {reason}")]
    PacketParse { reason: &'static str },

    #[error("module type '{name}' has no registered handler")]
    UnknownModule { name: String },

    #[error("module registry already has a handler named '{name}'")]
    DuplicateModule { name: String },

    #[error(transparent)]
    Shm(#[from] riptide_shm::ShmError),
}

impl DataplaneError {
    /// Create a parse error.
    #[must_use]
    pub fn parse(reason: &'static str) -> Self {
        Self::PacketParse { reason }
    }

    /// Get error code for categorization.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::PacketParse { .. } => "DP:PACKET:PARSE",
            Self::UnknownModule { .. } => "DP:MODULE:UNKNOWN",
            Self::DuplicateModule { .. } => "DP:MODULE:DUP",
            Self::Shm(_) => "DP:SHM",
        }
    }
}

/// Result type for data-plane operations.
pub type DataplaneResult<T> = std::result::Result<T, DataplaneError>;
