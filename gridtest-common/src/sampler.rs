//! State sampling against the pool status interface.
//!
//! A [`PoolStatus`] runs one [`PoolQuery`] and returns the non-empty output
//! lines. [`StateSampler`] reduces those to counts, names or attribute
//! tuples. Callers that wait on a count never see a [`SampleError`]: an
//! unreadable sample is replaced by a fallback chosen by the caller so a
//! failed read can only prolong a wait.

use crate::errors::HarnessError;
use crate::query::PoolQuery;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

/// Why a sample could not be read.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Exit { program: String, status: String },

    #[error("unreadable output from {program}: {reason}")]
    Parse { program: String, reason: String },
}

impl From<SampleError> for HarnessError {
    fn from(err: SampleError) -> Self {
        match err {
            SampleError::Spawn { source, .. } => HarnessError::Io(source),
            other => HarnessError::Io(std::io::Error::other(other.to_string())),
        }
    }
}

/// Read-only access to pool status.
pub trait PoolStatus {
    /// Run `query` and return its non-empty output lines.
    fn run(&self, query: &PoolQuery) -> Result<Vec<String>, SampleError>;
}

impl<T: PoolStatus + ?Sized> PoolStatus for &T {
    fn run(&self, query: &PoolQuery) -> Result<Vec<String>, SampleError> {
        (**self).run(query)
    }
}

impl<T: PoolStatus + ?Sized> PoolStatus for Box<T> {
    fn run(&self, query: &PoolQuery) -> Result<Vec<String>, SampleError> {
        (**self).run(query)
    }
}

/// Runs `condor_status` / `condor_q` directly, without a shell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CondorCli {
    collector: Option<String>,
    schedd: Option<String>,
}

impl CondorCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &crate::config::HarnessConfig) -> Self {
        Self {
            collector: config.collector_host.clone(),
            schedd: config.schedd_name.clone(),
        }
    }

    /// Query this collector instead of the pool default.
    pub fn with_collector(mut self, collector: impl Into<String>) -> Self {
        self.collector = Some(collector.into());
        self
    }

    /// Read the queue of this schedd instead of the local one.
    pub fn with_schedd(mut self, schedd: impl Into<String>) -> Self {
        self.schedd = Some(schedd.into());
        self
    }

    pub fn command(&self, query: &PoolQuery) -> Command {
        let mut cmd = Command::new(query.program());
        cmd.args(query.args(self.collector.as_deref(), self.schedd.as_deref()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        cmd
    }
}

impl PoolStatus for CondorCli {
    fn run(&self, query: &PoolQuery) -> Result<Vec<String>, SampleError> {
        let program = query.program().to_string();
        let output = self
            .command(query)
            .output()
            .map_err(|source| SampleError::Spawn {
                program: program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(SampleError::Exit {
                program,
                status: output.status.to_string(),
            });
        }
        let stdout = String::from_utf8(output.stdout).map_err(|e| SampleError::Parse {
            program: program.clone(),
            reason: e.to_string(),
        })?;
        Ok(non_empty_lines(&stdout))
    }
}

pub(crate) fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Reduces pool status output to counts and names.
#[derive(Debug, Clone)]
pub struct StateSampler<P> {
    pool: P,
}

impl<P: PoolStatus> StateSampler<P> {
    pub fn new(pool: P) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Number of ads matching `query`.
    pub fn try_count(&self, query: &PoolQuery) -> Result<u64, SampleError> {
        self.pool.run(query).map(|lines| lines.len() as u64)
    }

    /// Like [`try_count`](Self::try_count), with `None` for an unreadable
    /// sample.
    pub fn count(&self, query: &PoolQuery) -> Option<u64> {
        match self.try_count(query) {
            Ok(n) => Some(n),
            Err(e) => {
                debug!(query = %query, error = %e, "unreadable sample");
                None
            }
        }
    }

    /// First field of each matching ad.
    pub fn try_entities(&self, query: &PoolQuery) -> Result<Vec<String>, SampleError> {
        let lines = self.pool.run(query)?;
        Ok(lines
            .iter()
            .filter_map(|line| line.split('\t').next())
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect())
    }

    /// One tuple per matching ad, in the query's attribute order.
    pub fn try_attributes(&self, query: &PoolQuery) -> Result<Vec<Vec<String>>, SampleError> {
        let width = query.attrs().len();
        let lines = self.pool.run(query)?;
        lines
            .iter()
            .map(|line| {
                let fields: Vec<String> = line.split('\t').map(str::to_string).collect();
                if fields.len() == width {
                    Ok(fields)
                } else {
                    Err(SampleError::Parse {
                        program: query.program().to_string(),
                        reason: format!("expected {width} fields, got {}: {line:?}", fields.len()),
                    })
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryTarget;
    use crate::testing::ScriptedPool;

    #[test]
    fn counts_non_empty_lines() {
        assert_eq!(non_empty_lines("a\n\nb\n  \n"), vec!["a", "b"]);
        let pool = ScriptedPool::new();
        pool.push_lines(QueryTarget::Startd, &["slot1@n1", "slot2@n1", "slot1@n2"]);
        let sampler = StateSampler::new(&pool);
        assert_eq!(sampler.count(&PoolQuery::startds()), Some(3));
    }

    #[test]
    fn failed_sample_is_none() {
        let pool = ScriptedPool::new();
        pool.push_failure(QueryTarget::Queue);
        let sampler = StateSampler::new(&pool);
        assert_eq!(sampler.count(&PoolQuery::jobs()), None);
    }

    #[test]
    fn attributes_split_on_tabs() {
        let pool = ScriptedPool::new();
        pool.push_lines(QueryTarget::Startd, &["n1\tSTARTD000", "n2\tSTARTD001"]);
        let query = PoolQuery::startds().with_attrs(["Machine", "Name"]).unwrap();
        let rows = StateSampler::new(&pool).try_attributes(&query).unwrap();
        assert_eq!(rows[1], vec!["n2", "STARTD001"]);
    }

    #[test]
    fn ragged_attribute_rows_are_errors() {
        let pool = ScriptedPool::new();
        pool.push_lines(QueryTarget::Startd, &["n1"]);
        let query = PoolQuery::startds().with_attrs(["Machine", "Name"]).unwrap();
        let err = StateSampler::new(&pool).try_attributes(&query).unwrap_err();
        assert!(matches!(err, SampleError::Parse { .. }));
    }

    #[test]
    fn command_runs_without_shell() {
        let query = PoolQuery::masters();
        let mut cmd = CondorCli::new().with_collector("cm:9618").command(&query);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args.last().map(String::as_str), Some("cm:9618"));
        // keep the spawn check independent of whether condor is installed
        let cmd = cmd.env("PATH", "");
        assert!(cmd.output().is_err());
    }
}
