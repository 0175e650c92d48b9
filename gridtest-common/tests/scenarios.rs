//! End-to-end scenarios: configure a pool, activate, wait for it to react.

mod common;

use common::{config, init_test_logging, observer, pool_store};
use gridtest_common::testing::{ManualClock, ScriptedPool};
use gridtest_common::{
    ExecuteFeature, InMemoryStore, MergeOp, NodeFilter, PollResult, PoolTest, QueryTarget,
    QueueWait, SchedulerFeature, SlotWait,
};
use std::time::Duration;

#[test]
fn clear_node_empties_memberships_features_and_params() {
    init_test_logging();
    let store = InMemoryStore::default()
        .with_feature("f1", &[("X", "1")])
        .with_node("n1", &["g1", "g2"]);
    store.seed_group("+++n1", &["f1"], &[("X", "1")]);

    let mut test = PoolTest::setup(store.clone(), config()).unwrap();
    test.clear_node("n1").unwrap();

    assert_eq!(store.memberships("n1").unwrap(), Vec::<String>::new());
    let identity = store.group("+++n1").unwrap();
    assert!(identity.features.is_empty());
    assert!(identity.params.is_empty());
    test.teardown(true).unwrap();
    assert_eq!(store.memberships("n1").unwrap(), vec!["g1", "g2"]);
}

#[test]
fn execute_feature_with_two_startds() {
    init_test_logging();
    let store = pool_store();
    let mut test = PoolTest::setup(store.clone(), config()).unwrap();

    let counts = test
        .build_execute_feature("exec1", &ExecuteFeature::new(2, 1, 0))
        .unwrap();
    assert_eq!(counts.slots, 2);

    let params = store.feature_params("exec1").unwrap();
    assert_eq!(params["NUM_SLOTS"], "1");
    assert_eq!(params["NUM_CPUS"], "1");
    assert!(params["DAEMON_LIST"].contains("STARTD_ST000"));
    assert!(params["DAEMON_LIST"].contains("STARTD_ST001"));
    // every parameter written was declared first
    let declared = store.state().params;
    assert!(params.keys().all(|k| declared.contains_key(k)));
    test.teardown(true).unwrap();
}

#[test]
fn rebuilding_a_feature_declares_params_once() {
    init_test_logging();
    let store = pool_store();
    let mut test = PoolTest::setup(store.clone(), config()).unwrap();
    test.build_execute_feature("exec1", &ExecuteFeature::new(1, 1, 0))
        .unwrap();
    let creates = store.calls("create_entity");
    test.build_execute_feature("exec1", &ExecuteFeature::new(1, 1, 0))
        .unwrap();
    assert_eq!(store.calls("create_entity"), creates);
    test.teardown(true).unwrap();
}

#[test]
fn drain_converges_on_fourth_sample() {
    init_test_logging();
    let pool = ScriptedPool::new();
    let clock = ManualClock::new();
    // initial reading, then one reading per interval
    pool.push_counts(QueryTarget::Queue, &[10, 10, 7, 3, 0]);

    let wait = QueueWait::all()
        .interval(Duration::from_secs(1))
        .max_wait(Duration::from_secs(60));
    let result = observer(&pool, &clock)
        .poll_for_empty_job_queue(&wait)
        .unwrap();

    assert_eq!(
        result,
        PollResult::Converged {
            count: 0,
            elapsed: Duration::from_secs(4)
        }
    );
    assert_eq!(clock.sleeps(), 4);
}

#[test]
fn scale_test_setup() {
    init_test_logging();
    let store = pool_store();
    let pool = ScriptedPool::new();
    let clock = ManualClock::new();
    let mut test = PoolTest::setup(store.clone(), config()).unwrap();

    let targets = test
        .list_nodes(&NodeFilter::new().without_any_features(&["Scheduler"]))
        .unwrap();
    assert_eq!(targets, vec!["n1", "n2", "n3"]);

    test.declare_features(&["GridScaleTest"]).unwrap();
    let counts = test
        .build_execute_feature("GridScaleTestExecute", &ExecuteFeature::new(2, 2, 0))
        .unwrap();
    let schedds = test
        .build_scheduler_feature("GridScaleTestSched", &SchedulerFeature::new(1))
        .unwrap();
    assert_eq!(schedds, vec!["SCHEDD000"]);

    test.declare_groups(&["GridScaleTest"]).unwrap();
    test.assert_group_features(
        &["GridScaleTestExecute", "GridScaleTest", "Master", "NodeAccess"],
        &["GridScaleTest"],
        MergeOp::Replace,
    )
    .unwrap();
    test.clear_nodes(&targets).unwrap();
    test.assert_node_groups(&["GridScaleTest"], &targets, MergeOp::Replace)
        .unwrap();
    test.assert_node_features(&["GridScaleTestSched"], &["cm"], MergeOp::Insert)
        .unwrap();
    assert_eq!(
        store.group("+++cm").unwrap().features,
        vec!["GridScaleTestSched", "Scheduler"]
    );
    test.tag_feature_for_restart("GridScaleTest", "GRIDTEST_TAG")
        .unwrap();
    test.activate(Duration::from_secs(60)).unwrap();

    let in_group = test
        .list_nodes(&NodeFilter::new().with_all_features(&["GridScaleTestExecute"]))
        .unwrap();
    assert_eq!(in_group, targets);

    // two of three nodes report before the deadline
    let expected = targets.len() as u64 * counts.slots;
    pool.push_counts(QueryTarget::Startd, &[0, 4, 8]);
    pool.push_lines(QueryTarget::Master, &["n1", "n2"]);
    let wait = SlotWait::new(expected)
        .group("GridScaleTest")
        .max_wait(Duration::from_secs(300))
        .required(8)
        .expected_nodes(&targets);
    let result = observer(&pool, &clock).poll_for_slots(&wait).unwrap();
    assert!(matches!(result, PollResult::PartiallyConverged { count: 8, .. }));

    test.teardown(true).unwrap();
    assert_eq!(store.activations().len(), 2);
    assert!(!store.state().features.contains_key("GridScaleTestExecute"));
}

#[test]
fn slot_wait_timeout_lists_missing_nodes() {
    init_test_logging();
    let pool = ScriptedPool::new();
    let clock = ManualClock::new();
    pool.push_count(QueryTarget::Startd, 2);
    pool.push_lines(QueryTarget::Master, &["n1", "n3"]);

    let wait = SlotWait::new(3)
        .interval(Duration::from_secs(30))
        .max_wait(Duration::from_secs(60))
        .expected_nodes(&["n1", "n2", "n3"]);
    let err = observer(&pool, &clock).poll_for_slots(&wait).unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.missing(), ["n2".to_string()]);
    assert!(clock.elapsed() > Duration::from_secs(60));
}
