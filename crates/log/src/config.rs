//! Logger configuration presets.

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    /// Most verbose.
    Trace,
    /// Debug diagnostics.
    Debug,
    /// Normal operational messages.
    #[default]
    Info,
    /// Something unexpected but recoverable.
    Warn,
    /// Failures.
    Error,
}

impl Level {
    pub(crate) fn as_filter_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Human-readable multi-line output.
    Pretty,
    /// Single-line compact output.
    #[default]
    Compact,
    /// Newline-delimited JSON for log shippers.
    Json,
}

/// Logger configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Minimum level to emit, unless overridden by `filter`.
    pub level: Level,
    /// Output format.
    pub format: Format,
    /// Optional `tracing_subscriber::EnvFilter` directive string.
    pub filter: Option<String>,
    /// Whether to colorize output (ignored by `Format::Json`).
    pub ansi: bool,
}

impl Config {
    /// Verbose, pretty output for local development.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: Level::Debug,
            format: Format::Pretty,
            filter: None,
            ansi: true,
        }
    }

    /// Compact JSON output for production log pipelines.
    #[must_use]
    pub fn production() -> Self {
        Self {
            level: Level::Info,
            format: Format::Json,
            filter: None,
            ansi: false,
        }
    }

    /// Build a configuration from `RIPTIDE_LOG` / `RUST_LOG`.
    #[must_use]
    pub fn from_env() -> Self {
        let filter = std::env::var("RIPTIDE_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok();
        Self {
            filter,
            ..Self::default()
        }
    }
}
