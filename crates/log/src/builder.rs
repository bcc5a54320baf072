//! Subscriber construction.

use tracing_subscriber::EnvFilter;

use crate::config::{Config, Format};
use crate::{Error, Result};

/// Keeps the logging pipeline alive; drop to flush.
///
/// Returned by the init functions. Holding it is optional for the
/// console writers riptide uses, but callers should keep it around for
/// symmetry with buffered writers.
#[derive(Debug)]
pub struct LoggerGuard {
    _priv: (),
}

impl LoggerGuard {
    pub(crate) fn noop() -> Self {
        Self { _priv: () }
    }
}

/// Builder for the global tracing subscriber.
#[derive(Debug, Default)]
pub struct LoggerBuilder {
    config: Config,
}

impl LoggerBuilder {
    /// Start from an explicit configuration.
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Override the output format.
    #[must_use]
    pub fn format(mut self, format: Format) -> Self {
        self.config.format = format;
        self
    }

    /// Override the filter directives.
    #[must_use]
    pub fn filter(mut self, directives: impl Into<String>) -> Self {
        self.config.filter = Some(directives.into());
        self
    }

    /// Install the global subscriber.
    pub fn build(self) -> Result<LoggerGuard> {
        let filter = match &self.config.filter {
            Some(directives) => {
                EnvFilter::try_new(directives).map_err(|e| Error::Filter(e.to_string()))?
            }
            None => EnvFilter::new(self.config.level.as_filter_str()),
        };

        let base = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(self.config.ansi);

        let installed = match self.config.format {
            Format::Pretty => base.pretty().try_init(),
            Format::Compact => base.compact().try_init(),
            Format::Json => base.json().try_init(),
        };

        match installed {
            Ok(()) => Ok(LoggerGuard::noop()),
            // Another subscriber won the race; logging still works.
            Err(_) => Ok(LoggerGuard::noop()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Level;

    #[test]
    fn bad_filter_is_rejected() {
        let result = LoggerBuilder::default().filter("riptide=notalevel=x").build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_overrides() {
        let b = LoggerBuilder::from_config(Config {
            level: Level::Warn,
            ..Config::default()
        })
        .format(Format::Json);
        assert_eq!(b.config.format, Format::Json);
    }
}
