//! Environment variable parsing with type safety.
//!
//! Collects every invalid value during a pass so all issues can be reported
//! at once instead of failing on the first.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Prefix shared by every harness variable.
pub const ENV_PREFIX: &str = "GRIDTEST_";

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Invalid duration for {var}: {value}")]
    InvalidDuration { var: String, value: String },
}

/// Type-safe environment variable parser.
pub struct EnvParser {
    prefix: &'static str,
    vars: HashMap<String, String>,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Parser over the current process environment.
    pub fn from_process_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Parser over an explicit variable set.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prefix: ENV_PREFIX,
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn raw(&self, name: &str) -> Option<(String, String)> {
        let var_name = self.var_name(name);
        self.vars.get(&var_name).map(|v| (var_name, v.clone()))
    }

    /// String value, if set. Empty strings count as set.
    pub fn get_string(&self, name: &str) -> Option<String> {
        self.raw(name).map(|(_, value)| value)
    }

    /// Accepts 1/true/yes/on and 0/false/no/off/"".
    pub fn get_bool(&mut self, name: &str) -> Option<bool> {
        let (var, value) = self.raw(name)?;
        match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" | "" => Some(false),
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value,
                });
                None
            }
        }
    }

    pub fn get_u16(&mut self, name: &str) -> Option<u16> {
        let (var, value) = self.raw(name)?;
        match value.trim().parse::<u16>() {
            Ok(n) => Some(n),
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: "unsigned 16-bit integer".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Duration in humantime syntax (`90s`, `10m`) or bare seconds.
    pub fn get_duration(&mut self, name: &str) -> Option<Duration> {
        let (var, value) = self.raw(name)?;
        let trimmed = value.trim();
        if let Ok(secs) = trimmed.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        match humantime::parse_duration(trimmed) {
            Ok(duration) => Some(duration),
            Err(_) => {
                self.errors.push(EnvError::InvalidDuration { var, value });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(vars: &[(&str, &str)]) -> EnvParser {
        EnvParser::from_vars(vars.iter().map(|(k, v)| (*k, *v)))
    }

    #[test]
    fn reads_prefixed_values() {
        let mut env = parser(&[
            ("GRIDTEST_BROKER_HOST", "broker.example"),
            ("GRIDTEST_BROKER_PORT", "5673"),
            ("GRIDTEST_NO_RESTORE", "yes"),
            ("BROKER_HOST", "ignored"),
        ]);
        assert_eq!(env.get_string("BROKER_HOST").as_deref(), Some("broker.example"));
        assert_eq!(env.get_u16("BROKER_PORT"), Some(5673));
        assert_eq!(env.get_bool("NO_RESTORE"), Some(true));
        assert!(!env.has_errors());
    }

    #[test]
    fn durations_accept_seconds_and_humantime() {
        let mut env = parser(&[("GRIDTEST_A", "90"), ("GRIDTEST_B", "10m")]);
        assert_eq!(env.get_duration("A"), Some(Duration::from_secs(90)));
        assert_eq!(env.get_duration("B"), Some(Duration::from_secs(600)));
    }

    #[test]
    fn collects_all_errors() {
        let mut env = parser(&[
            ("GRIDTEST_BROKER_PORT", "not-a-port"),
            ("GRIDTEST_NO_RESTORE", "maybe"),
            ("GRIDTEST_ACTIVATION_TIMEOUT", "forever"),
        ]);
        assert_eq!(env.get_u16("BROKER_PORT"), None);
        assert_eq!(env.get_bool("NO_RESTORE"), None);
        assert_eq!(env.get_duration("ACTIVATION_TIMEOUT"), None);
        assert_eq!(env.take_errors().len(), 3);
        assert!(!env.has_errors());
    }

    #[test]
    fn unset_values_are_none() {
        let mut env = parser(&[]);
        assert_eq!(env.get_bool("NO_RESTORE"), None);
        assert!(env.get_string("NAMESPACE").is_none());
    }
}
