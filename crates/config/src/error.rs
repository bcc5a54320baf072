//! Error types for configuration building and validation.

use thiserror::Error;

/// Errors raised while assembling or validating a generation.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown module type '{module_type}'")]
    UnknownModuleType { module_type: String },

    #[error("unknown module '{module_type}:{name}'")]
    UnknownModule { module_type: String, name: String },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("unknown pipeline '{name}'")]
    UnknownPipeline { name: String },

    #[error("unknown device {device_id}")]
    UnknownDevice { device_id: u32 },

    #[error("module '{name}' already exists with type '{existing}', got '{requested}'")]
    TypeCollision {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("module '{module_type}:{name}' is still referenced by function '{function}'")]
    StillReferenced {
        module_type: String,
        name: String,
        function: String,
    },

    #[error("function '{name}' has no positive chain weight")]
    AllZeroWeights { name: String },

    #[error("device {device_id} needs at least one positive-weight {direction} pipeline")]
    NoActivePipeline {
        device_id: u32,
        direction: &'static str,
    },

    #[error("name '{name}' is invalid: {reason}")]
    BadName { name: String, reason: &'static str },

    #[error("device {device_id} is outside the topology of {device_count} devices")]
    DeviceOutOfRange { device_id: u32, device_count: u32 },

    #[error("invalid instance options: {reason}")]
    BadOptions { reason: String },

    #[error("arena has no published generation; bootstrap the instance first")]
    NotBootstrapped,

    #[error(transparent)]
    Shm(#[from] riptide_shm::ShmError),
}

impl ConfigError {
    /// Whether this is a validation failure (no state was mutated).
    #[must_use]
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Shm(_))
    }

    /// Get error code for categorization.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownModuleType { .. } => "CFG:VALIDATE:MODTYPE",
            Self::UnknownModule { .. } => "CFG:VALIDATE:MODULE",
            Self::UnknownFunction { .. } => "CFG:VALIDATE:FUNCTION",
            Self::UnknownPipeline { .. } => "CFG:VALIDATE:PIPELINE",
            Self::UnknownDevice { .. } => "CFG:VALIDATE:DEVICE",
            Self::TypeCollision { .. } => "CFG:VALIDATE:TYPE",
            Self::StillReferenced { .. } => "CFG:VALIDATE:REF",
            Self::AllZeroWeights { .. } => "CFG:VALIDATE:WEIGHTS",
            Self::NoActivePipeline { .. } => "CFG:VALIDATE:RING",
            Self::BadName { .. } => "CFG:VALIDATE:NAME",
            Self::DeviceOutOfRange { .. } => "CFG:VALIDATE:TOPOLOGY",
            Self::BadOptions { .. } => "CFG:OPTIONS",
            Self::NotBootstrapped => "CFG:BOOTSTRAP",
            Self::Shm(_) => "CFG:SHM",
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
