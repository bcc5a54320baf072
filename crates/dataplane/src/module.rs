//! The module handler contract and the process-local registry.
//!
//! The arena only ever stores module *names* and opaque config
//! payloads; actual packet-handling code lives in the data-plane
//! process as trait objects registered here at startup. The bootstrap
//! generation advertises the registered names so the control plane can
//! validate agent configs against what this instance can execute.

use crate::error::{DataplaneError, DataplaneResult};
use crate::front::PacketFront;

/// Everything a handler gets to see for one invocation.
pub struct ModuleCtx<'a> {
    /// Slot index of the executing worker.
    pub worker_idx: usize,
    /// Monotonic nanoseconds at batch start.
    pub now_ns: u64,
    /// The instance's config payload, as the agent supplied it.
    pub config: &'a [u8],
    /// The configured instance name (not the type name).
    pub module_name: &'a str,
}

/// A data-plane module: consumes `front.input`, routes every packet to
/// `output`, `drop`, `bypass` or `pending`.
///
/// Handlers run on every worker thread concurrently and therefore
/// keep no per-packet mutable state in `self`; cross-packet state
/// belongs in the session table or in the config payload.
pub trait PacketHandler: Send + Sync {
    /// The module type name agents refer to.
    fn name(&self) -> &str;

    /// Process one batch stage.
    fn handle(&self, ctx: &ModuleCtx<'_>, front: &mut PacketFront);

    /// Called when a config payload of this type is being reclaimed,
    /// for process-local caches. Most modules need nothing.
    fn teardown(&self, _config: &[u8]) {}
}

/// Registry of handlers, fixed after instance startup.
#[derive(Default)]
pub struct ModuleRegistry {
    handlers: Vec<Box<dyn PacketHandler>>,
}

impl ModuleRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; names must be unique.
    pub fn register(&mut self, handler: Box<dyn PacketHandler>) -> DataplaneResult<()> {
        if self.find(handler.name()).is_some() {
            return Err(DataplaneError::DuplicateModule {
                name: handler.name().to_string(),
            });
        }
        self.handlers.push(handler);
        Ok(())
    }

    /// Handler index by type name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        self.handlers.iter().position(|h| h.name() == name)
    }

    /// Handler by index.
    #[must_use]
    pub fn get(&self, idx: usize) -> &dyn PacketHandler {
        self.handlers[idx].as_ref()
    }

    /// All registered type names, for the bootstrap generation.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
