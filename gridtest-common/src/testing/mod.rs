//! Test doubles for the pool side of the harness.
//!
//! [`ScriptedPool`] replays canned status output per query target and
//! [`ManualClock`] turns poller sleeps into virtual time, so convergence
//! waits run instantly. The store double lives in
//! [`crate::memory_store`].

pub mod log;

pub use log::init_test_logging;

use crate::poller::Clock;
use crate::query::{PoolQuery, QueryTarget};
use crate::sampler::{PoolStatus, SampleError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Clock that only moves when told to, or when something sleeps on it.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    elapsed_nanos: Arc<AtomicU64>,
    sleeps: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
    }

    /// Number of `sleep` calls so far.
    pub fn sleeps(&self) -> u64 {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.advance(duration);
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Lines(Vec<String>),
    Failure,
}

#[derive(Debug, Default)]
struct Script {
    pending: HashMap<QueryTarget, VecDeque<Reply>>,
    last: HashMap<QueryTarget, Reply>,
    queries: Vec<PoolQuery>,
}

/// Pool status double replaying scripted replies.
///
/// Each target has its own queue. Once a queue runs dry its last reply
/// repeats; a target that was never scripted answers with no ads.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPool {
    script: Arc<Mutex<Script>>,
}

impl ScriptedPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, target: QueryTarget, reply: Reply) {
        self.lock().pending.entry(target).or_default().push_back(reply);
    }

    pub fn push_lines(&self, target: QueryTarget, lines: &[&str]) {
        self.push(
            target,
            Reply::Lines(lines.iter().map(|l| (*l).to_string()).collect()),
        );
    }

    /// Queue a reply with `count` anonymous ads.
    pub fn push_count(&self, target: QueryTarget, count: u64) {
        let lines = (0..count).map(|i| format!("ad{i:06}")).collect();
        self.push(target, Reply::Lines(lines));
    }

    pub fn push_counts(&self, target: QueryTarget, counts: &[u64]) {
        for count in counts {
            self.push_count(target, *count);
        }
    }

    /// Queue a reply that fails as if the status command exited nonzero.
    pub fn push_failure(&self, target: QueryTarget) {
        self.push(target, Reply::Failure);
    }

    /// Every query run so far, in order.
    pub fn queries(&self) -> Vec<PoolQuery> {
        self.lock().queries.clone()
    }

    pub fn runs(&self, target: QueryTarget) -> usize {
        self.lock()
            .queries
            .iter()
            .filter(|q| q.target() == target)
            .count()
    }
}

impl PoolStatus for ScriptedPool {
    fn run(&self, query: &PoolQuery) -> Result<Vec<String>, SampleError> {
        let mut script = self.lock();
        script.queries.push(query.clone());
        let target = query.target();
        let next = script.pending.get_mut(&target).and_then(VecDeque::pop_front);
        let reply = match next {
            Some(reply) => {
                script.last.insert(target, reply.clone());
                reply
            }
            None => script
                .last
                .get(&target)
                .cloned()
                .unwrap_or(Reply::Lines(Vec::new())),
        };
        match reply {
            Reply::Lines(lines) => Ok(lines),
            Reply::Failure => Err(SampleError::Exit {
                program: query.program().to_string(),
                status: "exit status: 1".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        clock.sleep(Duration::from_secs(30));
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), Duration::from_secs(35));
        assert_eq!(clock.sleeps(), 1);
    }

    #[test]
    fn scripted_pool_repeats_last_reply() {
        let pool = ScriptedPool::new();
        pool.push_counts(QueryTarget::Queue, &[3, 1]);
        let q = PoolQuery::jobs();
        assert_eq!(pool.run(&q).unwrap().len(), 3);
        assert_eq!(pool.run(&q).unwrap().len(), 1);
        assert_eq!(pool.run(&q).unwrap().len(), 1);
        assert!(pool.run(&PoolQuery::masters()).unwrap().is_empty());
        assert_eq!(pool.runs(QueryTarget::Queue), 3);
    }
}
