//! The agent-facing configuration client.
//!
//! Every operation is one transaction: snapshot the published head,
//! merge the requested change into it, validate, lower into the arena
//! and publish. The configuration write lock is held for the whole
//! span, so the snapshot cannot be retired underneath the build and
//! two agents cannot interleave. On any failure the previous
//! generation stays published and the arena is byte-for-byte as
//! before.

use riptide_config::{
    ConfigError, ConfigResult, DeviceConfig, FunctionConfig, GenView, InstanceOptions,
    ModuleConfig, PipelineConfig,
};
use riptide_log::{debug, info};
use riptide_shm::AgentHandle;

use crate::lower::lower;
use crate::stage::Staged;

/// Configuration client bound to one attached agent.
pub struct CpClient<'a> {
    agent: AgentHandle<'a>,
    max_ring_len: usize,
    device_count: u32,
}

impl<'a> CpClient<'a> {
    /// Bind a client to an attached agent.
    #[must_use]
    pub fn new(agent: AgentHandle<'a>, options: &InstanceOptions) -> Self {
        Self {
            agent,
            max_ring_len: options.max_ring_len,
            device_count: options.device_count,
        }
    }

    /// The underlying agent handle.
    #[must_use]
    pub fn agent(&self) -> &AgentHandle<'a> {
        &self.agent
    }

    /// Install or replace module configs; absent names carry over.
    pub fn update_modules(&self, configs: &[ModuleConfig]) -> ConfigResult<u64> {
        let agent_slot = self.agent.slot_index() as u32;
        self.rebuild("update_modules", |staged| {
            staged.apply_modules(agent_slot, configs);
            Ok(())
        })
    }

    /// Install or replace functions; absent names carry over.
    pub fn update_functions(&self, configs: &[FunctionConfig]) -> ConfigResult<u64> {
        self.rebuild("update_functions", |staged| {
            staged.apply_functions(configs);
            Ok(())
        })
    }

    /// Install or replace pipelines; absent names carry over.
    pub fn update_pipelines(&self, configs: &[PipelineConfig]) -> ConfigResult<u64> {
        self.rebuild("update_pipelines", |staged| {
            staged.apply_pipelines(configs);
            Ok(())
        })
    }

    /// Install or replace devices; absent ids carry over.
    pub fn update_devices(&self, configs: &[DeviceConfig]) -> ConfigResult<u64> {
        self.rebuild("update_devices", |staged| {
            staged.apply_devices(configs);
            Ok(())
        })
    }

    /// Remove a module config. Removing an absent module succeeds;
    /// removing a referenced one fails without touching anything.
    pub fn delete_module(&self, module_type: &str, name: &str) -> ConfigResult<u64> {
        self.rebuild("delete_module", |staged| {
            staged.delete_module(module_type, name)
        })
    }

    /// The shared transaction skeleton.
    fn rebuild(
        &self,
        op: &'static str,
        apply: impl FnOnce(&mut Staged) -> ConfigResult<()>,
    ) -> ConfigResult<u64> {
        let arena = self.agent.arena();
        let header = arena.header();

        // Held until after publication: keeps the snapshot alive and
        // serializes writers.
        let _write = header.config_lock().lock();

        let head = header.config_head().ok_or(ConfigError::NotBootstrapped)?;
        let snapshot_gen = header.published_gen();
        // SAFETY: head stays published (and thus live) while we hold
        // the write lock.
        let view = unsafe { GenView::from_head(head) };

        let mut staged = Staged::lift(&view);
        apply(&mut staged)?;
        staged.validate(self.device_count)?;
        staged.finalize();

        let next_gen = snapshot_gen + 1;
        let (gen_ptr, _writer) = lower(
            arena,
            self.agent.context(),
            self.agent.slot_index() as u32,
            &staged,
            self.max_ring_len,
            next_gen,
            Some(head),
        )?;

        // SAFETY: we hold the config lock and next_gen is head + 1.
        unsafe {
            header.publish_config_locked(gen_ptr.as_ptr().cast(), next_gen);
        }

        self.agent.heartbeat(next_gen);
        info!(
            op,
            generation = next_gen,
            modules = staged.modules.len(),
            functions = staged.functions.len(),
            pipelines = staged.pipelines.len(),
            devices = staged.devices.len(),
            "generation published"
        );
        debug!(
            in_use = self.agent.context().in_use(),
            limit = self.agent.context().limit(),
            "agent memory after publish"
        );
        Ok(next_gen)
    }
}
