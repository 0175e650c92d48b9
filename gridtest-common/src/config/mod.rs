//! Harness configuration.
//!
//! A [`HarnessConfig`] is built once per test run from an optional TOML file
//! and the `GRIDTEST_*` environment, then passed by value into
//! [`PoolTest::setup`](crate::transaction::PoolTest::setup).

pub mod env;

pub use env::{EnvError, EnvParser};

use crate::errors::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection, namespace and teardown settings for a test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: String,
    pub password: String,
    pub auth_mechanisms: String,
    /// Store namespace (package) holding the pool entities.
    pub namespace: String,
    /// Leave the mutated configuration live after teardown.
    pub no_restore: bool,
    /// Snapshot loaded on top of the pre-test snapshot during setup.
    pub preload_snapshot: Option<String>,
    pub activation_timeout_secs: u64,
    pub snapshot_prefix: String,
    /// Collector to query instead of the pool default.
    pub collector_host: Option<String>,
    /// Schedd to query instead of the local one.
    pub schedd_name: Option<String>,
    /// Job attribute used to tag jobs submitted by a test.
    pub tag_attr: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 5672,
            username: String::new(),
            password: String::new(),
            auth_mechanisms: "ANONYMOUS PLAIN GSSAPI".to_string(),
            namespace: "com.redhat.grid.config".to_string(),
            no_restore: false,
            preload_snapshot: None,
            activation_timeout_secs: 600,
            snapshot_prefix: "gridtest".to_string(),
            collector_host: None,
            schedd_name: None,
            tag_attr: "GridScaleTestTag".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("gridtest").join("config.toml"))
    }

    /// Load from `path` (or the default location when present), then apply
    /// the process environment.
    pub fn load(path: Option<&Path>) -> HarnessResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(default) => Self::from_file(&default)?,
                None => Self::default(),
            },
        };
        config.apply_env(&mut EnvParser::from_process_env())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
            .map_err(|e| HarnessError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(text: &str) -> HarnessResult<Self> {
        toml::from_str(text).map_err(|e| HarnessError::Config(e.to_string()))
    }

    /// Overlay `GRIDTEST_*` variables. Reports every invalid value at once.
    pub fn apply_env(&mut self, env: &mut EnvParser) -> HarnessResult<()> {
        if let Some(v) = env.get_string("BROKER_HOST") {
            self.broker_host = v;
        }
        if let Some(v) = env.get_u16("BROKER_PORT") {
            self.broker_port = v;
        }
        if let Some(v) = env.get_string("USER") {
            self.username = v;
        }
        if let Some(v) = env.get_string("PASSWORD") {
            self.password = v;
        }
        if let Some(v) = env.get_string("AUTH_MECHANISMS") {
            self.auth_mechanisms = v;
        }
        if let Some(v) = env.get_string("NAMESPACE") {
            self.namespace = v;
        }
        if let Some(v) = env.get_bool("NO_RESTORE") {
            self.no_restore = v;
        }
        if let Some(v) = env.get_string("PRELOAD_SNAPSHOT") {
            self.preload_snapshot = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = env.get_duration("ACTIVATION_TIMEOUT") {
            self.activation_timeout_secs = v.as_secs();
        }
        if let Some(v) = env.get_string("SNAPSHOT_PREFIX") {
            self.snapshot_prefix = v;
        }
        if let Some(v) = env.get_string("COLLECTOR_HOST") {
            self.collector_host = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = env.get_string("SCHEDD_NAME") {
            self.schedd_name = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = env.get_string("TAG_ATTR") {
            self.tag_attr = v;
        }

        let errors = env.take_errors();
        if errors.is_empty() {
            return Ok(());
        }
        let joined = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(HarnessError::Config(joined))
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.broker_host.trim().is_empty() {
            return Err(HarnessError::Config("broker_host is empty".into()));
        }
        if self.broker_port == 0 {
            return Err(HarnessError::Config("broker_port must be nonzero".into()));
        }
        if self.namespace.trim().is_empty() {
            return Err(HarnessError::Config("namespace is empty".into()));
        }
        if self.activation_timeout_secs == 0 {
            return Err(HarnessError::Config(
                "activation_timeout must be at least one second".into(),
            ));
        }
        if self.snapshot_prefix.is_empty() || self.snapshot_prefix.contains(char::is_whitespace) {
            return Err(HarnessError::Config(format!(
                "invalid snapshot_prefix '{}'",
                self.snapshot_prefix
            )));
        }
        Ok(())
    }

    pub fn activation_timeout(&self) -> Duration {
        Duration::from_secs(self.activation_timeout_secs)
    }

    /// Whether teardown restores the pre-test snapshot by default.
    pub fn restore(&self) -> bool {
        !self.no_restore
    }

    /// Broker address in `user/password@host:port` form.
    pub fn broker_url(&self) -> String {
        let host = format!("{}:{}", self.broker_host, self.broker_port);
        match (self.username.is_empty(), self.password.is_empty()) {
            (false, false) => format!("{}/{}@{host}", self.username, self.password),
            (false, true) => format!("{}@{host}", self.username),
            _ => host,
        }
    }
}

impl fmt::Display for HarnessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let url = if self.password.is_empty() {
            self.broker_url()
        } else {
            self.broker_url()
                .replacen(&format!("/{}@", self.password), "/***@", 1)
        };
        write!(f, "amqp://{url} namespace={}", self.namespace)
    }
}
