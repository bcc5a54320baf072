//! Operator-facing configuration inputs for the generation builder.
//!
//! These are plain owned structs (serde-friendly for JSON tooling);
//! the builder validates them and lowers them into the `repr(C)`
//! arena layout of [`crate::layout`].

use serde::{Deserialize, Serialize};

/// One module instance to install or replace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Data-plane module type (e.g. `"route"`, `"firewall-state"`).
    pub module_type: String,
    /// Instance name, unique per type.
    pub name: String,
    /// Opaque payload interpreted by the module's handler.
    #[serde(default)]
    pub data: Vec<u8>,
}

/// A module reference inside a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRef {
    pub module_type: String,
    pub name: String,
}

/// One chain: an ordered module sequence with a selection weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub modules: Vec<ModuleRef>,
    pub weight: u32,
}

/// A weighted fan-out over chains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub name: String,
    pub chains: Vec<ChainConfig>,
}

/// An ordered sequence of function names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub functions: Vec<String>,
}

/// A (pipeline name, weight) pair on a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineBinding {
    pub pipeline: String,
    pub weight: u32,
}

/// Input/output pipeline bindings of one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: u32,
    pub input: Vec<PipelineBinding>,
    pub output: Vec<PipelineBinding>,
}
