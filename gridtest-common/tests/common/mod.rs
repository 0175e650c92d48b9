use gridtest_common::InMemoryStore;
use gridtest_common::testing::{ManualClock, ScriptedPool};
use gridtest_common::{HarnessConfig, PoolObserver};

pub use gridtest_common::testing::init_test_logging;

#[ctor::ctor]
fn setup() {
    init_test_logging();
}

/// A small pool: a central manager with the Master feature, three execute
/// nodes, and a couple of spare features.
#[allow(dead_code)]
pub fn pool_store() -> InMemoryStore {
    let store = InMemoryStore::default()
        .with_feature("Master", &[("DAEMON_LIST", "MASTER")])
        .with_feature("NodeAccess", &[("ALLOW_READ", "*")])
        .with_feature("Scheduler", &[("SCHEDD_NAME", "sched")])
        .with_param("UPDATE_INTERVAL")
        .with_node("cm", &[])
        .with_node("n1", &["g1", "g2"])
        .with_node("n2", &[])
        .with_node("n3", &[]);
    store.seed_group("+++DEFAULT", &["Master", "NodeAccess"], &[]);
    store.seed_group("+++cm", &["Scheduler"], &[]);
    store
}

#[allow(dead_code)]
pub fn config() -> HarnessConfig {
    HarnessConfig {
        activation_timeout_secs: 60,
        ..HarnessConfig::default()
    }
}

#[allow(dead_code)]
pub fn observer(pool: &ScriptedPool, clock: &ManualClock) -> PoolObserver<ScriptedPool, ManualClock> {
    PoolObserver::new(pool.clone(), clock.clone())
}
