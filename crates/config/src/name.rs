//! Fixed-size inline names for arena-resident registry entries.
//!
//! Names live inline in their entries instead of behind pointers, so
//! registry arrays are flat, position independent and sortable with
//! plain byte comparison.

use std::cmp::Ordering;

use crate::error::{ConfigError, ConfigResult};

/// Maximum name length (one byte is reserved for the terminator).
pub const MAX_NAME: usize = 63;

/// An inline, NUL-padded name.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Name {
    bytes: [u8; MAX_NAME + 1],
}

impl Name {
    /// Build a name, validating length and content.
    pub fn new(s: &str) -> ConfigResult<Self> {
        if s.is_empty() {
            return Err(ConfigError::BadName {
                name: s.to_string(),
                reason: "empty",
            });
        }
        if s.len() > MAX_NAME {
            return Err(ConfigError::BadName {
                name: s.to_string(),
                reason: "longer than 63 bytes",
            });
        }
        if s.bytes().any(|b| b == 0) {
            return Err(ConfigError::BadName {
                name: s.to_string(),
                reason: "contains NUL",
            });
        }
        let mut bytes = [0u8; MAX_NAME + 1];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self { bytes })
    }

    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.bytes.len());
        std::str::from_utf8(&self.bytes[..end]).unwrap_or("<non-utf8>")
    }

    /// Byte-wise comparison used to keep registries sorted.
    #[must_use]
    pub fn cmp_bytes(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }

    /// Compare against a plain string.
    #[must_use]
    pub fn cmp_str(&self, other: &str) -> Ordering {
        self.as_str().cmp(other)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Name {}

impl std::fmt::Debug for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Name({:?})", self.as_str())
    }
}
