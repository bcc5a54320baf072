//! Logging facade for the riptide data plane.
//!
//! Thin wrapper over `tracing` that gives every riptide crate the same
//! import surface and a one-call subscriber setup.
//!
//! ```rust
//! use riptide_log::prelude::*;
//!
//! fn main() -> riptide_log::Result<()> {
//!     riptide_log::auto_init()?;
//!     info!(numa = 0, "instance starting");
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod builder;
mod config;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, Format, Level};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{Level, Result, auto_init, debug, error, info, init, init_with, trace, warn};

    pub use tracing::{Span, field};
}

// Re-export tracing macros so dependents never import tracing directly.
pub use tracing::{debug, error, info, instrument, span, trace, warn};

/// Result type for logger operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for logger operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A global subscriber was already installed.
    #[error("global subscriber already set")]
    AlreadyInitialized,

    /// Filter parsing error.
    #[error("invalid filter: {0}")]
    Filter(String),
}

/// Auto-detect and initialize the best logging configuration.
///
/// Honors `RIPTIDE_LOG` / `RUST_LOG` when set, otherwise picks the
/// development preset for debug builds and the production preset for
/// release builds.
pub fn auto_init() -> Result<LoggerGuard> {
    if tracing::dispatcher::has_been_set() {
        return Ok(LoggerGuard::noop());
    }

    if std::env::var("RIPTIDE_LOG").is_ok() || std::env::var("RUST_LOG").is_ok() {
        init_with(Config::from_env())
    } else if cfg!(debug_assertions) {
        init_with(Config::development())
    } else {
        init_with(Config::production())
    }
}

/// Initialize with default configuration.
pub fn init() -> Result<LoggerGuard> {
    init_with(Config::default())
}

/// Initialize with custom configuration.
pub fn init_with(config: Config) -> Result<LoggerGuard> {
    LoggerBuilder::from_config(config).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_init_is_idempotent() {
        let _first = auto_init().unwrap();
        let _second = auto_init().unwrap();
    }
}
