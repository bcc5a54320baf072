//! Lowering: staged generation -> arena-resident `ConfigGen`.
//!
//! All blocks are allocated through the building agent's memory
//! context and tracked, so a failure anywhere (quota, out of memory,
//! lost publish race) unwinds to exactly the pre-call arena state.
//!
//! Self-relative pointers are only meaningful at their final address,
//! so every entry carrying an `ArenaVec` or `RelPtr` is written
//! directly into its arena slot and linked in place, never built on
//! the stack and moved.

use std::ptr::NonNull;

use riptide_config::layout::ModuleData;
use riptide_config::{
    ArenaVec, ChainEntry, ConfigError, ConfigGen, ConfigResult, CpModuleEntry, DeviceEntry,
    DpModuleEntry, FunctionEntry, Name, PipelineEntry, PipelineWeight, expand_ring,
};
use riptide_shm::{Arena, MemoryContext};

use crate::stage::{Staged, StagedPayload};

/// Tracks every block and refcount taken while lowering one
/// generation, so failure can roll all of it back.
pub(crate) struct ArenaWriter<'a> {
    arena: &'a Arena,
    ctx: &'a MemoryContext,
    blocks: Vec<(NonNull<u8>, usize)>,
    acquired: Vec<NonNull<ModuleData>>,
}

impl<'a> ArenaWriter<'a> {
    pub fn new(arena: &'a Arena, ctx: &'a MemoryContext) -> Self {
        Self {
            arena,
            ctx,
            blocks: Vec::new(),
            acquired: Vec::new(),
        }
    }

    fn alloc(&mut self, size: usize) -> ConfigResult<NonNull<u8>> {
        let ptr = self.arena.alloc_in(self.ctx, size)?;
        self.blocks.push((ptr, size));
        Ok(ptr)
    }

    /// Allocate an uninitialized array of `count` slots; the caller
    /// writes every slot before the generation is published.
    fn alloc_slots<T>(&mut self, count: usize) -> ConfigResult<Option<NonNull<T>>> {
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(self.alloc(ArenaVec::<T>::byte_size(count))?.cast()))
    }

    /// Allocate and fill an array of plain copyable values (safe to
    /// move: they carry no self-relative pointers).
    fn alloc_copy<T: Copy>(&mut self, items: &[T]) -> ConfigResult<Option<NonNull<T>>> {
        let Some(base) = self.alloc_slots::<T>(items.len())? else {
            return Ok(None);
        };
        for (i, item) in items.iter().enumerate() {
            // SAFETY: base has exactly items.len() slots, all ours.
            unsafe {
                base.as_ptr().add(i).write(*item);
            }
        }
        Ok(Some(base))
    }

    /// Roll back every allocation and refcount acquired so far.
    pub fn unwind(self) {
        for data in &self.acquired {
            // SAFETY: acquired entries point at live shared payloads;
            // release only drops the count we added.
            let last = unsafe { data.as_ref() }.release();
            debug_assert!(
                !last,
                "unwind released a payload the old generation still owns"
            );
        }
        for (ptr, size) in self.blocks.into_iter().rev() {
            self.arena.free_in(self.ctx, ptr, size);
        }
    }
}

fn link<T>(slot: &mut ArenaVec<T>, array: Option<NonNull<T>>, count: usize) {
    if let Some(base) = array {
        slot.set(base.as_ptr(), count as u32);
    }
}

/// Lower a finalized staged generation into the arena.
///
/// On success the returned generation is fully initialized but not yet
/// published; on publish failure the caller unwinds through the
/// returned writer.
pub(crate) fn lower<'a>(
    arena: &'a Arena,
    ctx: &'a MemoryContext,
    agent_slot: u32,
    staged: &Staged,
    max_ring_len: usize,
    gen_number: u64,
    prev_head: Option<NonNull<u8>>,
) -> ConfigResult<(NonNull<ConfigGen>, ArenaWriter<'a>)> {
    let mut w = ArenaWriter::new(arena, ctx);
    match lower_inner(&mut w, agent_slot, staged, max_ring_len, gen_number, prev_head) {
        Ok(generation) => Ok((generation, w)),
        Err(e) => {
            w.unwind();
            Err(e)
        }
    }
}

fn lower_inner(
    w: &mut ArenaWriter<'_>,
    agent_slot: u32,
    staged: &Staged,
    max_ring_len: usize,
    gen_number: u64,
    prev_head: Option<NonNull<u8>>,
) -> ConfigResult<NonNull<ConfigGen>> {
    let generation = w.alloc(size_of::<ConfigGen>())?.cast::<ConfigGen>();
    // SAFETY: fresh block, exclusively ours; every array below is
    // fully written before the generation can be published.
    unsafe {
        generation.as_ptr().write(ConfigGen {
            gen_number,
            builder_agent_slot: agent_slot,
            _pad: 0,
            prev: riptide_shm::RelPtr::null(),
            dp_modules: ArenaVec::empty(),
            cp_modules: ArenaVec::empty(),
            functions: ArenaVec::empty(),
            pipelines: ArenaVec::empty(),
            devices: ArenaVec::empty(),
        });
        if let Some(head) = prev_head {
            (*generation.as_ptr()).prev.set(head.as_ptr().cast::<ConfigGen>());
        }
    }

    // Module type directory, carried forward verbatim. Entries are
    // plain names, safe to copy.
    let dir: Vec<DpModuleEntry> = staged
        .dp_modules
        .iter()
        .map(|n| Ok(DpModuleEntry { name: Name::new(n)? }))
        .collect::<ConfigResult<_>>()?;
    let dir_array = w.alloc_copy(&dir)?;

    let type_index = |ty: &str| -> u32 {
        staged
            .dp_modules
            .iter()
            .position(|t| t == ty)
            .map_or(u32::MAX, |i| i as u32)
    };
    let module_index = |ty: &str, name: &str| -> ConfigResult<u32> {
        staged
            .modules
            .iter()
            .position(|m| m.module_type == ty && m.name == name)
            .map(|i| i as u32)
            .ok_or_else(|| ConfigError::UnknownModule {
                module_type: ty.to_string(),
                name: name.to_string(),
            })
    };
    let function_index = |name: &str| -> ConfigResult<u32> {
        staged
            .functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| i as u32)
            .ok_or_else(|| ConfigError::UnknownFunction {
                name: name.to_string(),
            })
    };
    let pipeline_index = |name: &str| -> ConfigResult<u32> {
        staged
            .pipelines
            .iter()
            .position(|p| p.name == name)
            .map(|i| i as u32)
            .ok_or_else(|| ConfigError::UnknownPipeline {
                name: name.to_string(),
            })
    };

    // Modules: fresh payloads get new blocks, carried ones another
    // reference. Entries hold a RelPtr, so they are linked in place.
    let module_base = w.alloc_slots::<CpModuleEntry>(staged.modules.len())?;
    if let Some(base) = module_base {
        for (i, m) in staged.modules.iter().enumerate() {
            let data_ptr = match &m.payload {
                StagedPayload::Carried(data) => {
                    // SAFETY: carried payloads belong to the still
                    // published previous generation.
                    unsafe { data.as_ref() }.acquire();
                    w.acquired.push(*data);
                    *data
                }
                StagedPayload::Fresh(bytes) => {
                    let block = w.alloc(ModuleData::alloc_size(bytes.len()))?;
                    // SAFETY: fresh block of exactly alloc_size bytes.
                    unsafe { ModuleData::init_at(block, bytes) }
                }
            };
            let slot = unsafe { base.as_ptr().add(i) };
            // SAFETY: slot i is ours; data link is set at the slot's
            // final address.
            unsafe {
                slot.write(CpModuleEntry {
                    name: Name::new(&m.name)?,
                    module_type: type_index(&m.module_type),
                    agent_slot: m.agent_slot,
                    data: riptide_shm::RelPtr::null(),
                });
                (*slot).data.set(data_ptr.as_ptr());
            }
        }
    }

    // Functions: chains and their module index arrays, plus the
    // selection ring.
    let function_base = w.alloc_slots::<FunctionEntry>(staged.functions.len())?;
    if let Some(fn_base) = function_base {
        for (i, f) in staged.functions.iter().enumerate() {
            let chain_base = w.alloc_slots::<ChainEntry>(f.chains.len())?;
            if let Some(cb) = chain_base {
                for (j, chain) in f.chains.iter().enumerate() {
                    let indices: Vec<u32> = chain
                        .modules
                        .iter()
                        .map(|(ty, name)| module_index(ty, name))
                        .collect::<ConfigResult<_>>()?;
                    let modules_array = w.alloc_copy(&indices)?;
                    let slot = unsafe { cb.as_ptr().add(j) };
                    // SAFETY: chain slot j is ours, linked in place.
                    unsafe {
                        slot.write(ChainEntry {
                            modules: ArenaVec::empty(),
                            weight: chain.weight,
                            _pad: 0,
                        });
                        link(&mut (*slot).modules, modules_array, indices.len());
                    }
                }
            }

            let weights: Vec<u32> = f.chains.iter().map(|c| c.weight).collect();
            let ring = if weights.is_empty() {
                Vec::new()
            } else {
                expand_ring(&weights, max_ring_len).ok_or_else(|| ConfigError::AllZeroWeights {
                    name: f.name.clone(),
                })?
            };
            let ring_array = w.alloc_copy(&ring)?;

            let slot = unsafe { fn_base.as_ptr().add(i) };
            // SAFETY: function slot i is ours, linked in place.
            unsafe {
                slot.write(FunctionEntry {
                    name: Name::new(&f.name)?,
                    chains: ArenaVec::empty(),
                    ring: ArenaVec::empty(),
                });
                link(&mut (*slot).chains, chain_base, f.chains.len());
                link(&mut (*slot).ring, ring_array, ring.len());
            }
        }
    }

    // Pipelines referencing functions by index.
    let pipeline_base = w.alloc_slots::<PipelineEntry>(staged.pipelines.len())?;
    if let Some(base) = pipeline_base {
        for (i, p) in staged.pipelines.iter().enumerate() {
            let indices: Vec<u32> = p
                .functions
                .iter()
                .map(|n| function_index(n))
                .collect::<ConfigResult<_>>()?;
            let functions_array = w.alloc_copy(&indices)?;
            let slot = unsafe { base.as_ptr().add(i) };
            // SAFETY: pipeline slot i is ours, linked in place.
            unsafe {
                slot.write(PipelineEntry {
                    name: Name::new(&p.name)?,
                    functions: ArenaVec::empty(),
                });
                link(&mut (*slot).functions, functions_array, indices.len());
            }
        }
    }

    // Devices with weighted rings lowered to pipeline indices.
    let device_base = w.alloc_slots::<DeviceEntry>(staged.devices.len())?;
    if let Some(base) = device_base {
        for (i, d) in staged.devices.iter().enumerate() {
            let slot = unsafe { base.as_ptr().add(i) };
            // SAFETY: device slot i is ours, linked in place below.
            unsafe {
                slot.write(DeviceEntry {
                    device_id: d.device_id,
                    _pad: 0,
                    input: ArenaVec::empty(),
                    input_ring: ArenaVec::empty(),
                    output: ArenaVec::empty(),
                    output_ring: ArenaVec::empty(),
                });
            }
            for (dir_idx, bindings) in [&d.input, &d.output].into_iter().enumerate() {
                let pairs: Vec<PipelineWeight> = bindings
                    .iter()
                    .map(|(name, weight)| {
                        Ok(PipelineWeight {
                            pipeline: pipeline_index(name)?,
                            weight: *weight,
                        })
                    })
                    .collect::<ConfigResult<_>>()?;
                let weights: Vec<u32> = pairs.iter().map(|p| p.weight).collect();
                let ring_positions = expand_ring(&weights, max_ring_len).ok_or(
                    ConfigError::NoActivePipeline {
                        device_id: d.device_id,
                        direction: if dir_idx == 0 { "input" } else { "output" },
                    },
                )?;
                let ring: Vec<u32> = ring_positions
                    .iter()
                    .map(|&pos| pairs[pos as usize].pipeline)
                    .collect();
                let pairs_array = w.alloc_copy(&pairs)?;
                let ring_array = w.alloc_copy(&ring)?;
                // SAFETY: linking the freshly written device slot.
                unsafe {
                    if dir_idx == 0 {
                        link(&mut (*slot).input, pairs_array, pairs.len());
                        link(&mut (*slot).input_ring, ring_array, ring.len());
                    } else {
                        link(&mut (*slot).output, pairs_array, pairs.len());
                        link(&mut (*slot).output_ring, ring_array, ring.len());
                    }
                }
            }
        }
    }

    // SAFETY: the generation is ours until publication; arrays above are final.
    unsafe {
        let g = generation.as_ptr();
        link(&mut (*g).dp_modules, dir_array, dir.len());
        link(&mut (*g).cp_modules, module_base, staged.modules.len());
        link(&mut (*g).functions, function_base, staged.functions.len());
        link(&mut (*g).pipelines, pipeline_base, staged.pipelines.len());
        link(&mut (*g).devices, device_base, staged.devices.len());
    }

    Ok(generation)
}
