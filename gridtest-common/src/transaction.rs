//! Snapshot-bracketed test lifetime.
//!
//! [`PoolTest::setup`] snapshots the whole store before anything is touched,
//! optionally layers a preload snapshot on top, and caches the entity names
//! of the target namespace. [`PoolTest::teardown`] loads the pre-test
//! snapshot back and activates it.
//!
//! The store session is owned by the `PoolTest` and released in `Drop`, so
//! it is released on every exit path: a failed restore, a failed
//! activation, an early `?` return from the test body or a panic. A test
//! that never reaches `teardown` still gets its restore from `Drop` unless
//! restoration is disabled in the config.

use crate::config::HarnessConfig;
use crate::errors::HarnessResult;
use crate::store::{ConfigStore, check, check_value};
use crate::types::EntityKind;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{error, info, warn};

/// Suffix of the snapshot taken before a test mutates anything.
pub const PRETEST_SUFFIX: &str = "pretest";

/// Cached entity names, updated only after the store confirms a creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameIndex {
    names: BTreeMap<EntityKind, BTreeSet<String>>,
}

impl NameIndex {
    pub fn contains(&self, kind: EntityKind, name: &str) -> bool {
        self.names.get(&kind).is_some_and(|set| set.contains(name))
    }

    pub fn insert(&mut self, kind: EntityKind, name: impl Into<String>) {
        self.names.entry(kind).or_default().insert(name.into());
    }

    pub fn names(&self, kind: EntityKind) -> impl Iterator<Item = &str> {
        self.names
            .get(&kind)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.names.get(&kind).map_or(0, BTreeSet::len)
    }
}

/// A single test's exclusive session against the configuration store.
pub struct PoolTest<S: ConfigStore> {
    pub(crate) store: S,
    pub(crate) config: HarnessConfig,
    pub(crate) index: NameIndex,
    test_date: String,
    snapshot: String,
    snapshot_taken: bool,
    finished: bool,
}

impl<S: ConfigStore> std::fmt::Debug for PoolTest<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolTest")
            .field("snapshot", &self.snapshot)
            .field("snapshot_taken", &self.snapshot_taken)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<S: ConfigStore> PoolTest<S> {
    /// Snapshot the store, load any preload snapshot, and read the entity
    /// names of the configured namespace.
    pub fn setup(store: S, config: HarnessConfig) -> HarnessResult<Self> {
        let now = chrono::Local::now();
        let test_date = now.format("%Y-%m-%d_%H:%M:%S%.6f").to_string();
        let snapshot = format!("{}_{}_{}", config.snapshot_prefix, test_date, PRETEST_SUFFIX);

        // From here on Drop releases the session whatever happens.
        let mut test = Self {
            store,
            config,
            index: NameIndex::default(),
            test_date,
            snapshot,
            snapshot_taken: false,
            finished: false,
        };

        let pretest = test.snapshot.clone();
        test.take_snapshot(&pretest)?;
        test.snapshot_taken = true;

        // loading a snapshot reindexes, so the preload path reads once too
        match test.config.preload_snapshot.clone() {
            Some(preload) => test.load_snapshot(&preload)?,
            None => test.load_index()?,
        }
        Ok(test)
    }

    fn load_index(&mut self) -> HarnessResult<()> {
        let mut index = NameIndex::default();
        for kind in [
            EntityKind::Node,
            EntityKind::Group,
            EntityKind::Feature,
            EntityKind::Parameter,
        ] {
            info!(class = kind.class_name(), "Obtaining entities from config store");
            let names = check_value(
                format!("list_entities {}", kind.class_name()),
                self.store.list_entities(kind, &self.config.namespace),
            )?;
            for name in names {
                index.insert(kind, name);
            }
        }
        self.index = index;
        Ok(())
    }

    /// Capture the current store under `name`.
    pub fn take_snapshot(&mut self, name: &str) -> HarnessResult<()> {
        info!(snapshot = name, "Snapshotting current pool config");
        check(format!("make_snapshot {name}"), self.store.make_snapshot(name))?;
        info!(snapshot = name, "Finished config snapshot");
        Ok(())
    }

    /// Replace the store contents with snapshot `name`.
    ///
    /// The name index is reloaded from the store afterwards, since the
    /// snapshot may add or drop entities.
    pub fn load_snapshot(&mut self, name: &str) -> HarnessResult<()> {
        info!(snapshot = name, "Restoring pool config");
        check(format!("load_snapshot {name}"), self.store.load_snapshot(name))?;
        info!(snapshot = name, "Finished restoring snapshot");
        if self.snapshot_taken && !self.finished {
            self.load_index()?;
        }
        Ok(())
    }

    /// Push the current configuration out to the pool.
    pub fn activate(&mut self, timeout: Duration) -> HarnessResult<()> {
        info!(timeout_secs = timeout.as_secs(), "Activating pool configuration");
        check("activate", self.store.activate(timeout))
    }

    /// End the test. With `restore` the pre-test snapshot is loaded and
    /// activated; without it the mutated configuration stays live.
    ///
    /// The session is released even when restoring fails.
    pub fn teardown(mut self, restore: bool) -> HarnessResult<()> {
        self.finish(restore)
    }

    /// [`teardown`](Self::teardown) with the configured restore policy.
    pub fn close(self) -> HarnessResult<()> {
        let restore = self.config.restore();
        self.teardown(restore)
    }

    fn finish(&mut self, restore: bool) -> HarnessResult<()> {
        self.finished = true;
        if !restore {
            warn!(snapshot = %self.snapshot, "NOT restoring pre-test snapshot");
            return Ok(());
        }
        let snapshot = self.snapshot.clone();
        self.load_snapshot(&snapshot)?;
        let timeout = self.config.activation_timeout();
        self.activate(timeout).inspect_err(|e| {
            error!(snapshot = %snapshot, error = %e, "Failed to activate restored configuration");
        })
    }

    pub fn snapshot_name(&self) -> &str {
        &self.snapshot
    }

    /// Timestamp component shared by snapshots of this test.
    pub fn test_date(&self) -> &str {
        &self.test_date
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn index(&self) -> &NameIndex {
        &self.index
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: ConfigStore> Drop for PoolTest<S> {
    fn drop(&mut self) {
        if self.snapshot_taken && !self.finished {
            let restore = self.config.restore();
            if let Err(e) = self.finish(restore) {
                error!(snapshot = %self.snapshot, error = %e, "Restore on drop failed");
            }
        }
        self.store.release();
    }
}
