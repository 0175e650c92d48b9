//! Logging setup.
//!
//! The harness reports progress through `tracing`. Binaries call
//! [`init_logging`] once; tests use [`crate::testing::init_test_logging`].

use crate::errors::{HarnessError, HarnessResult};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Variable holding an `EnvFilter` directive string.
pub const LOG_ENV_VAR: &str = "GRIDTEST_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directives, e.g. `info` or `gridtest_common=debug`.
    pub filter: String,
    pub format: LogFormat,
}

impl LogConfig {
    /// Filter from `GRIDTEST_LOG`, else `default_level`.
    pub fn from_env(default_level: &str) -> Self {
        let filter = std::env::var(LOG_ENV_VAR)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default_level.to_string());
        Self {
            filter,
            format: LogFormat::Compact,
        }
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.filter = level.to_string();
        self
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> HarnessResult<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| HarnessError::Config(format!("invalid log filter '{}': {e}", config.filter)))?;

    let result = match config.format {
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false).compact())
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init(),
    };
    result.map_err(|e| HarnessError::Config(format!("logging already initialised: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_level_and_format() {
        let config = LogConfig {
            filter: "info".into(),
            format: LogFormat::Compact,
        }
        .with_level("debug")
        .json();
        assert_eq!(config.filter, "debug");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn bad_filter_is_a_config_error() {
        let config = LogConfig {
            filter: "gridtest=notalevel".into(),
            format: LogFormat::Compact,
        };
        assert!(matches!(init_logging(&config), Err(HarnessError::Config(_))));
    }
}
