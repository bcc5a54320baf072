//! Error types for the shared-memory substrate.

use thiserror::Error;

/// Errors raised by arena, allocator and registry operations.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ShmError {
    // --- Allocation errors ---
    #[error("arena out of memory: {requested} bytes requested")]
    OutOfMemory { requested: usize },

    #[error("memory quota exceeded for '{context}': {used} bytes used + {requested} requested, limit {limit}")]
    QuotaExceeded {
        context: String,
        used: u64,
        requested: u64,
        limit: u64,
    },

    #[error("arena too small: {size} bytes, minimum {min}")]
    ArenaTooSmall { size: usize, min: usize },

    // --- Attach errors ---
    #[error("bad arena magic: found {found:#018x}")]
    BadMagic { found: u64 },

    #[error("arena version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("arena size mismatch: header says {header} bytes, mapping is {mapped}")]
    SizeMismatch { header: u64, mapped: u64 },

    // --- Agent registry errors ---
    #[error("agent '{name}' (pid {pid}) is already attached")]
    AlreadyAttached { name: String, pid: u32 },

    #[error("agent registry full: capacity {capacity}")]
    RegistryFull { capacity: usize },

    #[error("agent '{name}' is stale")]
    AgentStale { name: String },

    #[error("no such agent: '{name}'")]
    NoSuchAgent { name: String },

    #[error("invalid name: {reason}")]
    InvalidName { reason: String },

    // --- Worker registry errors ---
    #[error("worker registry full: capacity {capacity}")]
    WorkerRegistryFull { capacity: usize },

    // --- Generation errors ---
    #[error("stale generation build: publishing {publishing}, head is {head}")]
    StaleGeneration { publishing: u64, head: u64 },

    // --- System errors ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShmError {
    /// Get error code for categorization.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutOfMemory { .. } => "SHM:ALLOC:OOM",
            Self::QuotaExceeded { .. } => "SHM:ALLOC:QUOTA",
            Self::ArenaTooSmall { .. } => "SHM:ARENA:SIZE",
            Self::BadMagic { .. } => "SHM:ATTACH:MAGIC",
            Self::VersionMismatch { .. } => "SHM:ATTACH:VERSION",
            Self::SizeMismatch { .. } => "SHM:ATTACH:SIZE",
            Self::AlreadyAttached { .. } => "SHM:AGENT:DUP",
            Self::RegistryFull { .. } => "SHM:AGENT:FULL",
            Self::AgentStale { .. } => "SHM:AGENT:STALE",
            Self::NoSuchAgent { .. } => "SHM:AGENT:UNKNOWN",
            Self::InvalidName { .. } => "SHM:AGENT:NAME",
            Self::WorkerRegistryFull { .. } => "SHM:WORKER:FULL",
            Self::StaleGeneration { .. } => "SHM:GEN:STALE",
            Self::Io(_) => "SHM:SYSTEM:IO",
        }
    }

    /// Create an out-of-memory error.
    #[must_use]
    pub fn out_of_memory(requested: usize) -> Self {
        Self::OutOfMemory { requested }
    }

    /// Create a quota error for a named memory context.
    pub fn quota_exceeded(context: &str, used: u64, requested: u64, limit: u64) -> Self {
        Self::QuotaExceeded {
            context: context.to_string(),
            used,
            requested,
            limit,
        }
    }

    /// Create an invalid-name error.
    pub fn invalid_name(reason: &str) -> Self {
        Self::InvalidName {
            reason: reason.to_string(),
        }
    }
}

/// Result type for shared-memory operations.
pub type ShmResult<T> = std::result::Result<T, ShmError>;
