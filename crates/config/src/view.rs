//! Read-side access to a published generation.

use std::ptr::NonNull;

use crate::layout::{
    ChainEntry, ConfigGen, CpModuleEntry, DeviceEntry, DpModuleEntry, FunctionEntry, PipelineEntry,
};

/// A borrowed view over one published, immutable generation.
///
/// Workers hold a `GenView` for at most one batch: the generation
/// barrier only protects structures between two quiescent points, so
/// views must never be stashed across `observe` calls.
#[derive(Clone, Copy)]
pub struct GenView<'a> {
    generation: &'a ConfigGen,
}

impl<'a> GenView<'a> {
    /// Wrap the configuration head published in the arena header.
    ///
    /// # Safety
    ///
    /// `head` must be a configuration head obtained from
    /// `ArenaHeader::config_head` of an arena this process has mapped,
    /// and the referenced generation must not be freed while the view
    /// lives (the caller's quiescence discipline).
    #[must_use]
    pub unsafe fn from_head(head: NonNull<u8>) -> Self {
        // SAFETY: per contract head points at a published ConfigGen.
        Self {
            generation: unsafe { head.cast::<ConfigGen>().as_ref() },
        }
    }

    /// Wrap a generation reference directly (builder side).
    #[must_use]
    pub fn new(generation: &'a ConfigGen) -> Self {
        Self { generation }
    }

    /// The underlying generation.
    #[must_use]
    pub fn raw(&self) -> &'a ConfigGen {
        self.generation
    }

    /// Generation number.
    #[must_use]
    pub fn gen_number(&self) -> u64 {
        self.generation.gen_number
    }

    /// Registered data-plane module types.
    #[must_use]
    pub fn dp_modules(&self) -> &'a [DpModuleEntry] {
        // SAFETY: published generations are immutable.
        unsafe { self.generation.dp_modules.as_slice() }
    }

    /// Configured module instances, sorted by (type, name).
    #[must_use]
    pub fn cp_modules(&self) -> &'a [CpModuleEntry] {
        // SAFETY: published generations are immutable.
        unsafe { self.generation.cp_modules.as_slice() }
    }

    /// Functions, sorted by name.
    #[must_use]
    pub fn functions(&self) -> &'a [FunctionEntry] {
        // SAFETY: published generations are immutable.
        unsafe { self.generation.functions.as_slice() }
    }

    /// Pipelines, sorted by name.
    #[must_use]
    pub fn pipelines(&self) -> &'a [PipelineEntry] {
        // SAFETY: published generations are immutable.
        unsafe { self.generation.pipelines.as_slice() }
    }

    /// Devices, sorted by device id.
    #[must_use]
    pub fn devices(&self) -> &'a [DeviceEntry] {
        // SAFETY: published generations are immutable.
        unsafe { self.generation.devices.as_slice() }
    }

    /// The chains of a function.
    #[must_use]
    pub fn chains_of(&self, function: &'a FunctionEntry) -> &'a [ChainEntry] {
        // SAFETY: published generations are immutable.
        unsafe { function.chains.as_slice() }
    }

    /// Module type name -> index into [`dp_modules`](Self::dp_modules).
    #[must_use]
    pub fn find_dp_module(&self, name: &str) -> Option<u32> {
        self.dp_modules()
            .binary_search_by(|e| e.name.cmp_str(name))
            .ok()
            .map(|i| i as u32)
    }

    /// (type index, name) -> index into [`cp_modules`](Self::cp_modules).
    #[must_use]
    pub fn find_cp_module(&self, module_type: u32, name: &str) -> Option<u32> {
        self.cp_modules()
            .binary_search_by(|e| {
                e.module_type
                    .cmp(&module_type)
                    .then_with(|| e.name.cmp_str(name))
            })
            .ok()
            .map(|i| i as u32)
    }

    /// Function name -> index.
    #[must_use]
    pub fn find_function(&self, name: &str) -> Option<u32> {
        self.functions()
            .binary_search_by(|e| e.name.cmp_str(name))
            .ok()
            .map(|i| i as u32)
    }

    /// Pipeline name -> index.
    #[must_use]
    pub fn find_pipeline(&self, name: &str) -> Option<u32> {
        self.pipelines()
            .binary_search_by(|e| e.name.cmp_str(name))
            .ok()
            .map(|i| i as u32)
    }

    /// Device id -> entry.
    #[must_use]
    pub fn device_by_id(&self, device_id: u32) -> Option<&'a DeviceEntry> {
        let devices = self.devices();
        devices
            .binary_search_by(|d| d.device_id.cmp(&device_id))
            .ok()
            .map(|i| &devices[i])
    }

    /// Functions of a pipeline by pipeline index.
    #[must_use]
    pub fn pipeline_functions(&self, pipeline: u32) -> &'a [u32] {
        let entry = &self.pipelines()[pipeline as usize];
        // SAFETY: published generations are immutable.
        unsafe { entry.functions.as_slice() }
    }

    /// Select a chain index of a function for a packet hash.
    #[must_use]
    pub fn select_chain_index(&self, function: u32, hash: u64) -> Option<u32> {
        let entry = &self.functions()[function as usize];
        if entry.ring.is_empty() {
            return None;
        }
        // SAFETY: published generations are immutable.
        let ring = unsafe { entry.ring.as_slice() };
        Some(ring[(hash % ring.len() as u64) as usize])
    }

    /// Select a chain of a function for a packet hash.
    #[must_use]
    pub fn select_chain(&self, function: u32, hash: u64) -> Option<&'a ChainEntry> {
        let entry = &self.functions()[function as usize];
        let chain_idx = self.select_chain_index(function, hash)?;
        Some(&self.chains_of(entry)[chain_idx as usize])
    }

    /// Module sequence of a chain.
    #[must_use]
    pub fn chain_modules(&self, chain: &'a ChainEntry) -> &'a [u32] {
        // SAFETY: published generations are immutable.
        unsafe { chain.modules.as_slice() }
    }
}

impl std::fmt::Debug for GenView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenView")
            .field("gen_number", &self.gen_number())
            .field("cp_modules", &self.cp_modules().len())
            .field("functions", &self.functions().len())
            .field("pipelines", &self.pipelines().len())
            .field("devices", &self.devices().len())
            .finish()
    }
}
