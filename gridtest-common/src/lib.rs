//! Snapshot-bracketed configuration and convergence harness for grid pool
//! integration tests.
//!
//! A test opens a [`PoolTest`], which snapshots the configuration store,
//! edits the store through the `assert_*` and `build_*` operations, waits
//! for the live pool to catch up with a [`PoolObserver`], and ends with
//! [`PoolTest::teardown`], which restores and activates the snapshot.
#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod features;
pub mod logging;
pub mod memory_store;
pub mod mutator;
pub mod observer;
pub mod poller;
pub mod query;
pub mod sampler;
pub mod store;
pub mod testing;
pub mod transaction;
pub mod types;

pub use config::HarnessConfig;
pub use errors::{ErrorCode, HarnessError, HarnessResult};
pub use features::{
    AccessFeature, AccountingGroup, AccountingGroupFeature, CollectorFeature, ExecuteFeature,
    FeatureTemplate, SchedulerFeature, SlotCounts,
};
pub use logging::{LogConfig, LogFormat, init_logging};
pub use memory_store::InMemoryStore;
pub use mutator::NodeFilter;
pub use observer::{JobFilter, PoolObserver, QueueWait, SlotWait};
pub use poller::{Clock, ConvergencePoller, Direction, PollResult, PollSpec, SystemClock};
pub use query::{Constraint, PoolQuery, QueryTarget};
pub use sampler::{CondorCli, PoolStatus, SampleError, StateSampler};
pub use store::ConfigStore;
pub use transaction::{NameIndex, PoolTest};
pub use types::{EntityKind, MergeOp, NodeInfo, ParamBundle, ParamTarget, StoreReply};
