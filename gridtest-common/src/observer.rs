//! Waits a test author composes into scenarios: slots spooling up, job
//! queues draining and nodes reporting in.

use crate::config::HarnessConfig;
use crate::errors::HarnessResult;
use crate::poller::{Clock, ConvergencePoller, PollResult, PollSpec, SystemClock};
use crate::query::{Constraint, PoolQuery};
use crate::sampler::{CondorCli, PoolStatus, StateSampler};
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(600);

/// Wait for execute slots to report into the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotWait {
    pub count: u64,
    /// Only count slots of nodes in this store group.
    pub group: Option<String>,
    pub interval: Duration,
    pub max_wait: Duration,
    /// Count accepted once `max_wait` is exceeded.
    pub required: Option<u64>,
    /// Nodes expected to report; the absent ones are listed on timeout.
    pub expected_nodes: Option<Vec<String>>,
}

impl SlotWait {
    pub fn new(count: u64) -> Self {
        Self {
            count,
            group: None,
            interval: DEFAULT_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            required: None,
            expected_nodes: None,
        }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn required(mut self, required: u64) -> Self {
        self.required = Some(required);
        self
    }

    pub fn expected_nodes<S: AsRef<str>>(mut self, nodes: &[S]) -> Self {
        self.expected_nodes = Some(nodes.iter().map(|n| n.as_ref().to_string()).collect());
        self
    }

    fn describe(&self) -> String {
        match &self.group {
            Some(group) => format!("{} slots from group {group}", self.count),
            None => format!("{} slots", self.count),
        }
    }
}

/// Which queued jobs a drain wait counts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JobFilter {
    #[default]
    All,
    Cluster(u64),
    /// Jobs whose tag attribute equals `value`. `attr` defaults to the
    /// observer's tag attribute.
    Tag { attr: Option<String>, value: String },
}

/// Wait for the job queue to drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueWait {
    pub filter: JobFilter,
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for QueueWait {
    fn default() -> Self {
        Self {
            filter: JobFilter::All,
            interval: DEFAULT_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl QueueWait {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn cluster(cluster: u64) -> Self {
        Self {
            filter: JobFilter::Cluster(cluster),
            ..Self::default()
        }
    }

    pub fn tag(value: impl Into<String>) -> Self {
        Self {
            filter: JobFilter::Tag {
                attr: None,
                value: value.into(),
            },
            ..Self::default()
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

/// Samples pool state and waits for it to converge.
#[derive(Debug, Clone)]
pub struct PoolObserver<P, C> {
    sampler: StateSampler<P>,
    poller: ConvergencePoller<C>,
    tag_attr: String,
}

impl PoolObserver<CondorCli, SystemClock> {
    /// Observer running the status commands against the configured
    /// collector and schedd.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(CondorCli::from_config(config), SystemClock::default())
            .with_tag_attr(config.tag_attr.clone())
    }
}

impl<P: PoolStatus, C: Clock> PoolObserver<P, C> {
    pub fn new(pool: P, clock: C) -> Self {
        Self {
            sampler: StateSampler::new(pool),
            poller: ConvergencePoller::new(clock),
            tag_attr: HarnessConfig::default().tag_attr,
        }
    }

    pub fn with_tag_attr(mut self, attr: impl Into<String>) -> Self {
        self.tag_attr = attr.into();
        self
    }

    pub fn sampler(&self) -> &StateSampler<P> {
        &self.sampler
    }

    pub fn tag_attr(&self) -> &str {
        &self.tag_attr
    }

    /// Wait until at least `wait.count` startd slots report.
    ///
    /// Fails with `Timeout` unless the count (or the `required` count) is
    /// reached within `max_wait`.
    pub fn poll_for_slots(&self, wait: &SlotWait) -> HarnessResult<PollResult> {
        let group_filter = wait.group.clone().map(Constraint::group_member);
        let query = PoolQuery::startds().with_optional(group_filter);
        let what = wait.describe();
        let spec = PollSpec::growth(what.clone(), wait.count)
            .interval(wait.interval)
            .max_wait(wait.max_wait)
            .required(wait.required)
            .expected(wait.expected_nodes.clone());

        let groups: Vec<&str> = wait.group.as_deref().into_iter().collect();
        let result = self.poller.run(
            &spec,
            || self.sampler.count(&query),
            || {
                self.reporting_nodes(&groups).unwrap_or_else(|e| {
                    warn!(error = %e, "could not list reporting nodes");
                    Vec::new()
                })
            },
        );
        result.into_result(&what)
    }

    /// Wait until no job matching `wait.filter` is left in the queue.
    pub fn poll_for_empty_job_queue(&self, wait: &QueueWait) -> HarnessResult<PollResult> {
        let (constraint, what) = match &wait.filter {
            JobFilter::All => (None, "job queue to clear".to_string()),
            JobFilter::Cluster(cluster) => (
                Some(Constraint::cluster(*cluster)),
                format!("job queue to clear for cluster {cluster}"),
            ),
            JobFilter::Tag { attr, value } => {
                let attr = attr.as_deref().unwrap_or(&self.tag_attr);
                (
                    Some(Constraint::equals(attr, value.as_str())?),
                    format!("job queue to clear for {attr}==\"{value}\""),
                )
            }
        };
        let query = PoolQuery::jobs().with_optional(constraint);
        let spec = PollSpec::drain(what.clone())
            .interval(wait.interval)
            .max_wait(wait.max_wait);

        let result = self
            .poller
            .run(&spec, || self.sampler.count(&query), Vec::new);
        result.into_result(&what)
    }

    /// Names of nodes whose master reports to the collector, optionally
    /// restricted to nodes in all of `groups`.
    pub fn reporting_nodes<G: AsRef<str>>(&self, groups: &[G]) -> HarnessResult<Vec<String>> {
        let constraint = Constraint::in_groups(groups.iter().map(|g| g.as_ref().to_string()));
        let query = PoolQuery::masters().with_optional(constraint);
        let nodes = self.sampler.try_entities(&query)?;
        info!(count = nodes.len(), "reporting nodes");
        Ok(nodes)
    }

    /// Attribute tuples of the startd slots, optionally for one group.
    pub fn slot_attributes<A: AsRef<str>>(
        &self,
        group: Option<&str>,
        attrs: &[A],
    ) -> HarnessResult<Vec<Vec<String>>> {
        let query = PoolQuery::startds()
            .with_optional(group.map(Constraint::group_member))
            .with_attrs(attrs.iter().map(|a| a.as_ref().to_string()))?;
        Ok(self.sampler.try_attributes(&query)?)
    }
}
