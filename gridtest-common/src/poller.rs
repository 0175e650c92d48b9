//! Convergence polling.
//!
//! A poll sleeps one interval, takes a sample and compares it against the
//! target, until the target is reached or the maximum wait is exceeded.
//! Elapsed time is measured from the start of the loop. On timeout a lower
//! `required` threshold may still be accepted, and the expected entities
//! that never showed up are reported.
//!
//! Unreadable samples never count as progress: growth waits read them as
//! zero, drain waits repeat the previous reading.

use crate::errors::{HarnessError, HarnessResult};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Sentinel for a drain wait whose first sample is unreadable.
pub const UNREADABLE_DRAIN_COUNT: u64 = 999_999;

/// Time source for polling.
pub trait Clock {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Wall clock with blocking sleep.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Which way the sampled count has to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Wait until the count rises to the target.
    Growth,
    /// Wait until the count falls to the target.
    Drain,
}

impl Direction {
    pub fn reached(&self, sample: u64, bound: u64) -> bool {
        match self {
            Self::Growth => sample >= bound,
            Self::Drain => sample <= bound,
        }
    }

    /// Value used in place of an unreadable sample.
    pub fn fallback(&self, previous: Option<u64>) -> u64 {
        match self {
            Self::Growth => 0,
            Self::Drain => previous.unwrap_or(UNREADABLE_DRAIN_COUNT),
        }
    }
}

/// Parameters of one wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSpec {
    /// Short description used in logs and timeout errors.
    pub what: String,
    pub direction: Direction,
    pub target: u64,
    pub interval: Duration,
    pub max_wait: Duration,
    /// Lower bar accepted once `max_wait` is exceeded.
    pub required: Option<u64>,
    /// Entities expected to be observed, for timeout diagnostics.
    pub expected: Option<Vec<String>>,
}

impl PollSpec {
    pub fn growth(what: impl Into<String>, target: u64) -> Self {
        Self {
            what: what.into(),
            direction: Direction::Growth,
            target,
            interval: Duration::from_secs(30),
            max_wait: Duration::from_secs(600),
            required: None,
            expected: None,
        }
    }

    /// Wait for a count to reach zero.
    pub fn drain(what: impl Into<String>) -> Self {
        Self {
            direction: Direction::Drain,
            ..Self::growth(what, 0)
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

    pub fn required(mut self, required: Option<u64>) -> Self {
        self.required = required;
        self
    }

    pub fn expected(mut self, expected: Option<Vec<String>>) -> Self {
        self.expected = expected;
        self
    }
}

/// How a wait ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    Converged {
        count: u64,
        elapsed: Duration,
    },
    /// Timed out, but the `required` bar was met.
    PartiallyConverged {
        count: u64,
        elapsed: Duration,
    },
    TimedOut {
        last_sample: u64,
        elapsed: Duration,
        missing: Vec<String>,
    },
}

impl PollResult {
    pub fn count(&self) -> u64 {
        match self {
            Self::Converged { count, .. } | Self::PartiallyConverged { count, .. } => *count,
            Self::TimedOut { last_sample, .. } => *last_sample,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Converged { elapsed, .. }
            | Self::PartiallyConverged { elapsed, .. }
            | Self::TimedOut { elapsed, .. } => *elapsed,
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }

    /// `Err(Timeout)` for a timed-out wait, otherwise the result itself.
    pub fn into_result(self, what: &str) -> HarnessResult<Self> {
        match self {
            Self::TimedOut {
                last_sample,
                elapsed,
                missing,
            } => Err(HarnessError::Timeout {
                what: what.to_string(),
                waited: elapsed,
                last_sample,
                missing,
            }),
            done => Ok(done),
        }
    }
}

/// Interval-local and cumulative drain rate, in items per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrainRate {
    pub interval: f64,
    pub cumulative: f64,
}

impl DrainRate {
    pub fn compute(
        initial: u64,
        previous: u64,
        current: u64,
        elapsed: Duration,
        interval_elapsed: Duration,
    ) -> Self {
        fn rate(from: u64, to: u64, over: Duration) -> f64 {
            let secs = over.as_secs_f64();
            if secs <= 0.0 {
                return 0.0;
            }
            (from as f64 - to as f64) / secs
        }
        Self {
            interval: rate(previous, current, interval_elapsed),
            cumulative: rate(initial, current, elapsed),
        }
    }
}

/// Entities in `expected` that are absent from `observed`, in expected order.
pub fn missing_entities(expected: &[String], observed: &[String]) -> Vec<String> {
    let observed: BTreeSet<&str> = observed.iter().map(String::as_str).collect();
    let mut seen = BTreeSet::new();
    expected
        .iter()
        .filter(|e| !observed.contains(e.as_str()) && seen.insert(e.as_str()))
        .cloned()
        .collect()
}

/// Runs waits against a [`Clock`].
#[derive(Debug, Clone, Default)]
pub struct ConvergencePoller<C> {
    clock: C,
}

impl<C: Clock> ConvergencePoller<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Poll `sample` until `spec` is satisfied.
    ///
    /// `sample` returns `None` for an unreadable reading. `observed` is only
    /// called on timeout, when `spec.expected` is set.
    pub fn run<S, O>(&self, spec: &PollSpec, mut sample: S, observed: O) -> PollResult
    where
        S: FnMut() -> Option<u64>,
        O: FnOnce() -> Vec<String>,
    {
        let direction = spec.direction;

        // drain rates are measured against a reading taken before waiting
        let initial = match direction {
            Direction::Drain => Some(sample().unwrap_or_else(|| direction.fallback(None))),
            Direction::Growth => None,
        };

        let t0 = self.clock.now();
        let mut last_time = t0;
        let mut last_count = initial;
        let mut round: u64 = 0;

        loop {
            info!(
                what = %spec.what,
                interval_secs = spec.interval.as_secs(),
                target = spec.target,
                "Waiting for pool to converge"
            );
            self.clock.sleep(spec.interval);
            round += 1;

            let n = sample().unwrap_or_else(|| direction.fallback(last_count));
            let now = self.clock.now();
            let elapsed = now.saturating_sub(t0);

            match (direction, initial, last_count) {
                (Direction::Drain, Some(n0), Some(prev)) => {
                    let rate = DrainRate::compute(n0, prev, n, elapsed, now.saturating_sub(last_time));
                    info!(
                        what = %spec.what,
                        round,
                        elapsed_secs = elapsed.as_secs(),
                        sample = n,
                        rate = rate.interval,
                        cum_rate = rate.cumulative,
                        "poll sample"
                    );
                }
                _ => info!(
                    what = %spec.what,
                    round,
                    elapsed_secs = elapsed.as_secs(),
                    sample = n,
                    "poll sample"
                ),
            }

            if direction.reached(n, spec.target) {
                return PollResult::Converged { count: n, elapsed };
            }

            if elapsed > spec.max_wait {
                return Self::timed_out(spec, n, elapsed, observed);
            }

            last_count = Some(n);
            last_time = now;
        }
    }

    fn timed_out<O>(spec: &PollSpec, n: u64, elapsed: Duration, observed: O) -> PollResult
    where
        O: FnOnce() -> Vec<String>,
    {
        let missing = match &spec.expected {
            Some(expected) => {
                let missing = missing_entities(expected, &observed());
                warn!(what = %spec.what, ?missing, "expected entities not observed");
                missing
            }
            None => Vec::new(),
        };

        if let Some(required) = spec.required
            && spec.direction.reached(n, required)
        {
            warn!(
                what = %spec.what,
                sample = n,
                required,
                target = spec.target,
                "max wait exceeded, accepting required count"
            );
            return PollResult::PartiallyConverged { count: n, elapsed };
        }

        warn!(what = %spec.what, sample = n, elapsed_secs = elapsed.as_secs(), "Exceeded max polling time");
        PollResult::TimedOut {
            last_sample: n,
            elapsed,
            missing,
        }
    }
}
