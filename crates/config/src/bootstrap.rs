//! Instance bootstrap: the first generation.
//!
//! At startup, before any worker runs and before any agent can build,
//! the data plane publishes a generation containing only the directory
//! of module types it registered handlers for. Every later generation
//! carries the directory forward unchanged; the builder validates
//! agent-supplied module types against it.

use std::ptr::NonNull;

use riptide_log::info;
use riptide_shm::Arena;

use crate::error::ConfigResult;
use crate::layout::{ArenaVec, BOOTSTRAP_AGENT, ConfigGen, DpModuleEntry};
use crate::name::Name;

/// Publish the bootstrap generation with the given module type names.
///
/// Returns the published generation number (1 on a fresh arena).
pub fn publish_bootstrap(arena: &Arena, module_types: &[&str]) -> ConfigResult<u64> {
    let mut names: Vec<Name> = module_types
        .iter()
        .map(|s| Name::new(s))
        .collect::<ConfigResult<_>>()?;
    names.sort_by(Name::cmp_bytes);

    let gen_block = arena.alloc(size_of::<ConfigGen>())?;
    let dir_size = ArenaVec::<DpModuleEntry>::byte_size(names.len());
    let dir_block: Option<NonNull<u8>> = if names.is_empty() {
        None
    } else {
        match arena.alloc(dir_size) {
            Ok(b) => Some(b),
            Err(e) => {
                arena.free(gen_block, size_of::<ConfigGen>());
                return Err(e.into());
            }
        }
    };

    let gen_number = arena.header().published_gen() + 1;
    let prev = arena.header().config_head();

    // SAFETY: both blocks are fresh, exclusively ours and large
    // enough; nothing reads them until publish_config releases the
    // head below.
    unsafe {
        let generation = gen_block.cast::<ConfigGen>();
        generation.as_ptr().write(ConfigGen {
            gen_number,
            builder_agent_slot: BOOTSTRAP_AGENT,
            _pad: 0,
            prev: riptide_shm::RelPtr::null(),
            dp_modules: ArenaVec::empty(),
            cp_modules: ArenaVec::empty(),
            functions: ArenaVec::empty(),
            pipelines: ArenaVec::empty(),
            devices: ArenaVec::empty(),
        });
        if let Some(block) = dir_block {
            let dir = block.cast::<DpModuleEntry>();
            for (i, name) in names.iter().enumerate() {
                dir.as_ptr().add(i).write(DpModuleEntry { name: *name });
            }
            (*generation.as_ptr())
                .dp_modules
                .set(dir.as_ptr(), names.len() as u32);
        }
        if let Some(head) = prev {
            (*generation.as_ptr()).prev.set(head.as_ptr().cast::<ConfigGen>());
        }
    }

    if let Err(e) = arena.header().publish_config(gen_block.as_ptr(), gen_number) {
        if let Some(block) = dir_block {
            arena.free(block, dir_size);
        }
        arena.free(gen_block, size_of::<ConfigGen>());
        return Err(e.into());
    }
    info!(gen_number, modules = names.len(), "bootstrap generation published");
    Ok(gen_number)
}

#[cfg(test)]
mod tests {
    use riptide_shm::ArenaOptions;

    use super::*;
    use crate::view::GenView;

    fn arena() -> Arena {
        Arena::anonymous(&ArenaOptions {
            size: 4 << 20,
            ..ArenaOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn bootstrap_publishes_sorted_directory() {
        let arena = arena();
        let generation = publish_bootstrap(&arena, &["route", "decap", "forward"]).unwrap();
        assert_eq!(generation, 1);

        // SAFETY: head was just published and nothing retires it.
        let view = unsafe { GenView::from_head(arena.header().config_head().unwrap()) };
        assert_eq!(view.gen_number(), 1);
        let names: Vec<&str> = view.dp_modules().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["decap", "forward", "route"]);
        assert_eq!(view.find_dp_module("forward"), Some(1));
        assert_eq!(view.find_dp_module("nat64"), None);
        assert!(view.cp_modules().is_empty());
    }

    #[test]
    fn bad_module_type_name_is_rejected() {
        let arena = arena();
        assert!(publish_bootstrap(&arena, &[""]).is_err());
    }
}
