//! The staged representation of a generation under construction.
//!
//! Each builder operation lifts the published head into owned Rust
//! structures, applies its changes, validates the composite, then
//! lowers the result back into the arena. Lifting is cheap at
//! configuration scale and keeps the merge/validate logic out of
//! unsafe code entirely.

use std::ptr::NonNull;

use riptide_config::layout::ModuleData;
use riptide_config::{
    ConfigError, ConfigResult, DeviceConfig, FunctionConfig, GenView, ModuleConfig, Name,
    PipelineConfig,
};

/// Module payload: shared with the previous generation or freshly
/// supplied by the agent.
pub(crate) enum StagedPayload {
    Carried(NonNull<ModuleData>),
    Fresh(Vec<u8>),
}

pub(crate) struct StagedModule {
    pub module_type: String,
    pub name: String,
    pub agent_slot: u32,
    pub payload: StagedPayload,
}

pub(crate) struct StagedChain {
    /// (type, name) module references.
    pub modules: Vec<(String, String)>,
    pub weight: u32,
}

pub(crate) struct StagedFunction {
    pub name: String,
    pub chains: Vec<StagedChain>,
}

pub(crate) struct StagedPipeline {
    pub name: String,
    pub functions: Vec<String>,
}

pub(crate) struct StagedDevice {
    pub device_id: u32,
    pub input: Vec<(String, u32)>,
    pub output: Vec<(String, u32)>,
}

/// A full generation in owned form.
pub(crate) struct Staged {
    pub dp_modules: Vec<String>,
    pub modules: Vec<StagedModule>,
    pub functions: Vec<StagedFunction>,
    pub pipelines: Vec<StagedPipeline>,
    pub devices: Vec<StagedDevice>,
}

impl Staged {
    /// Lift the published head into owned form.
    pub fn lift(view: &GenView<'_>) -> Self {
        let dp_modules: Vec<String> = view
            .dp_modules()
            .iter()
            .map(|m| m.name.as_str().to_string())
            .collect();

        let modules = view
            .cp_modules()
            .iter()
            .map(|m| StagedModule {
                module_type: dp_modules[m.module_type as usize].clone(),
                name: m.name.as_str().to_string(),
                agent_slot: m.agent_slot,
                payload: match m.data.load() {
                    Some(data) => StagedPayload::Carried(data),
                    None => StagedPayload::Fresh(Vec::new()),
                },
            })
            .collect();

        let functions = view
            .functions()
            .iter()
            .map(|f| StagedFunction {
                name: f.name.as_str().to_string(),
                chains: view
                    .chains_of(f)
                    .iter()
                    .map(|c| StagedChain {
                        modules: view
                            .chain_modules(c)
                            .iter()
                            .map(|&idx| {
                                let m = &view.cp_modules()[idx as usize];
                                (
                                    dp_modules[m.module_type as usize].clone(),
                                    m.name.as_str().to_string(),
                                )
                            })
                            .collect(),
                        weight: c.weight,
                    })
                    .collect(),
            })
            .collect();

        let pipelines = view
            .pipelines()
            .iter()
            .enumerate()
            .map(|(idx, p)| StagedPipeline {
                name: p.name.as_str().to_string(),
                functions: view
                    .pipeline_functions(idx as u32)
                    .iter()
                    .map(|&f| view.functions()[f as usize].name.as_str().to_string())
                    .collect(),
            })
            .collect();

        let devices = view
            .devices()
            .iter()
            .map(|d| {
                let lift_bindings = |vec: &riptide_config::ArenaVec<
                    riptide_config::PipelineWeight,
                >| {
                    // SAFETY: published generations are immutable.
                    unsafe { vec.as_slice() }
                        .iter()
                        .map(|pw| {
                            (
                                view.pipelines()[pw.pipeline as usize]
                                    .name
                                    .as_str()
                                    .to_string(),
                                pw.weight,
                            )
                        })
                        .collect()
                };
                StagedDevice {
                    device_id: d.device_id,
                    input: lift_bindings(&d.input),
                    output: lift_bindings(&d.output),
                }
            })
            .collect();

        Self {
            dp_modules,
            modules,
            functions,
            pipelines,
            devices,
        }
    }

    /// Replace or insert module configs; absent names are carried over.
    pub fn apply_modules(&mut self, agent_slot: u32, configs: &[ModuleConfig]) {
        for cfg in configs {
            let staged = StagedModule {
                module_type: cfg.module_type.clone(),
                name: cfg.name.clone(),
                agent_slot,
                payload: StagedPayload::Fresh(cfg.data.clone()),
            };
            match self
                .modules
                .iter_mut()
                .find(|m| m.module_type == cfg.module_type && m.name == cfg.name)
            {
                Some(existing) => *existing = staged,
                None => self.modules.push(staged),
            }
        }
    }

    /// Replace or insert functions by name.
    pub fn apply_functions(&mut self, configs: &[FunctionConfig]) {
        for cfg in configs {
            let staged = StagedFunction {
                name: cfg.name.clone(),
                chains: cfg
                    .chains
                    .iter()
                    .map(|c| StagedChain {
                        modules: c
                            .modules
                            .iter()
                            .map(|r| (r.module_type.clone(), r.name.clone()))
                            .collect(),
                        weight: c.weight,
                    })
                    .collect(),
            };
            match self.functions.iter_mut().find(|f| f.name == cfg.name) {
                Some(existing) => *existing = staged,
                None => self.functions.push(staged),
            }
        }
    }

    /// Replace or insert pipelines by name.
    pub fn apply_pipelines(&mut self, configs: &[PipelineConfig]) {
        for cfg in configs {
            let staged = StagedPipeline {
                name: cfg.name.clone(),
                functions: cfg.functions.clone(),
            };
            match self.pipelines.iter_mut().find(|p| p.name == cfg.name) {
                Some(existing) => *existing = staged,
                None => self.pipelines.push(staged),
            }
        }
    }

    /// Replace or insert devices by id.
    pub fn apply_devices(&mut self, configs: &[DeviceConfig]) {
        for cfg in configs {
            let staged = StagedDevice {
                device_id: cfg.device_id,
                input: cfg
                    .input
                    .iter()
                    .map(|b| (b.pipeline.clone(), b.weight))
                    .collect(),
                output: cfg
                    .output
                    .iter()
                    .map(|b| (b.pipeline.clone(), b.weight))
                    .collect(),
            };
            match self
                .devices
                .iter_mut()
                .find(|d| d.device_id == cfg.device_id)
            {
                Some(existing) => *existing = staged,
                None => self.devices.push(staged),
            }
        }
    }

    /// Remove a module config; removing an absent module is a no-op.
    pub fn delete_module(&mut self, module_type: &str, name: &str) -> ConfigResult<()> {
        for function in &self.functions {
            for chain in &function.chains {
                if chain
                    .modules
                    .iter()
                    .any(|(t, n)| t == module_type && n == name)
                {
                    return Err(ConfigError::StillReferenced {
                        module_type: module_type.to_string(),
                        name: name.to_string(),
                        function: function.name.clone(),
                    });
                }
            }
        }
        self.modules
            .retain(|m| !(m.module_type == module_type && m.name == name));
        Ok(())
    }

    /// Validate the composite before any arena allocation happens.
    pub fn validate(&self, device_count: u32) -> ConfigResult<()> {
        // Names must fit the inline registry entries.
        for m in &self.modules {
            Name::new(&m.name)?;
        }
        for f in &self.functions {
            Name::new(&f.name)?;
        }
        for p in &self.pipelines {
            Name::new(&p.name)?;
        }

        // Modules: known type, no cross-type name collision.
        for m in &self.modules {
            if !self.dp_modules.iter().any(|t| *t == m.module_type) {
                return Err(ConfigError::UnknownModuleType {
                    module_type: m.module_type.clone(),
                });
            }
            if let Some(other) = self
                .modules
                .iter()
                .find(|o| o.name == m.name && o.module_type != m.module_type)
            {
                return Err(ConfigError::TypeCollision {
                    name: m.name.clone(),
                    existing: other.module_type.clone(),
                    requested: m.module_type.clone(),
                });
            }
        }

        // Functions: module refs resolve, at least one positive weight.
        for f in &self.functions {
            if !f.chains.is_empty() && f.chains.iter().all(|c| c.weight == 0) {
                return Err(ConfigError::AllZeroWeights {
                    name: f.name.clone(),
                });
            }
            for chain in &f.chains {
                for (ty, name) in &chain.modules {
                    if !self
                        .modules
                        .iter()
                        .any(|m| m.module_type == *ty && m.name == *name)
                    {
                        return Err(ConfigError::UnknownModule {
                            module_type: ty.clone(),
                            name: name.clone(),
                        });
                    }
                }
            }
        }

        // Pipelines: function names resolve.
        for p in &self.pipelines {
            for fname in &p.functions {
                if !self.functions.iter().any(|f| f.name == *fname) {
                    return Err(ConfigError::UnknownFunction {
                        name: fname.clone(),
                    });
                }
            }
        }

        // Devices: in topology, pipelines resolve, both directions
        // carry at least one positive weight.
        for d in &self.devices {
            if d.device_id >= device_count {
                return Err(ConfigError::DeviceOutOfRange {
                    device_id: d.device_id,
                    device_count,
                });
            }
            for (direction, bindings) in [("input", &d.input), ("output", &d.output)] {
                for (pname, _) in bindings {
                    if !self.pipelines.iter().any(|p| p.name == *pname) {
                        return Err(ConfigError::UnknownPipeline {
                            name: pname.clone(),
                        });
                    }
                }
                if !bindings.iter().any(|(_, w)| *w > 0) {
                    return Err(ConfigError::NoActivePipeline {
                        device_id: d.device_id,
                        direction,
                    });
                }
            }
        }

        Ok(())
    }

    /// Sort every section into the order the arena layout promises.
    pub fn finalize(&mut self) {
        let type_index = |ty: &str, dir: &[String]| -> usize {
            dir.iter().position(|t| t == ty).unwrap_or(usize::MAX)
        };
        let dir = self.dp_modules.clone();
        self.modules.sort_by(|a, b| {
            type_index(&a.module_type, &dir)
                .cmp(&type_index(&b.module_type, &dir))
                .then_with(|| a.name.cmp(&b.name))
        });
        self.functions.sort_by(|a, b| a.name.cmp(&b.name));
        self.pipelines.sort_by(|a, b| a.name.cmp(&b.name));
        self.devices.sort_by_key(|d| d.device_id);
    }
}
