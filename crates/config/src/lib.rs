//! # riptide-config
//!
//! The shape of a configuration generation: `repr(C)` arena layout,
//! name registries, weighted selection rings and the operator-facing
//! input types the control-plane builder lowers into them.
//!
//! A generation is an immutable snapshot of modules, functions,
//! pipelines and devices. Entities reference each other by index into
//! the sibling arrays of the same generation; names appear exactly
//! once, inline in the registry entries, sorted for binary search.
//! Workers read generations through [`GenView`] and never see a torn
//! or mutated snapshot.

pub mod bootstrap;
pub mod error;
pub mod layout;
pub mod name;
pub mod options;
pub mod ring;
pub mod types;
pub mod view;

pub use crate::bootstrap::publish_bootstrap;
pub use crate::error::{ConfigError, ConfigResult};
pub use crate::layout::{
    ArenaVec, BOOTSTRAP_AGENT, ChainEntry, ConfigGen, CpModuleEntry, DeviceEntry, DpModuleEntry,
    FunctionEntry, ModuleData, PipelineEntry, PipelineWeight,
};
pub use crate::name::{MAX_NAME, Name};
pub use crate::options::InstanceOptions;
pub use crate::ring::expand_ring;
pub use crate::types::{
    ChainConfig, DeviceConfig, FunctionConfig, ModuleConfig, ModuleRef, PipelineBinding,
    PipelineConfig,
};
pub use crate::view::GenView;
