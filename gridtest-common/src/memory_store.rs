//! In-memory configuration store.
//!
//! Implements [`ConfigStore`] over plain maps so harness logic can be
//! exercised without a broker. Clones share state, which lets a test keep a
//! handle for inspection after handing another to a [`PoolTest`].
//!
//! Faults can be scripted per operation with [`InMemoryStore::fail_on`].
//!
//! [`PoolTest`]: crate::transaction::PoolTest

use crate::store::ConfigStore;
use crate::types::{
    DEFAULT_GROUP, EntityKind, MASTER_SUBSYSTEM, MergeOp, NodeInfo, ParamBundle, ParamTarget,
    StoreReply, identity_group_name,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default store namespace.
pub const DEFAULT_NAMESPACE: &str = "com.redhat.grid.config";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupState {
    pub features: Vec<String>,
    pub params: ParamBundle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeState {
    pub identity_group: String,
    pub memberships: Vec<String>,
    pub last_checkin_us: u64,
}

/// Everything a snapshot captures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreState {
    /// Parameter name to its requires-restart flag.
    pub params: BTreeMap<String, bool>,
    pub features: BTreeMap<String, ParamBundle>,
    pub groups: BTreeMap<String, GroupState>,
    pub nodes: BTreeMap<String, NodeState>,
    pub subsystems: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
struct Inner {
    namespace: String,
    state: StoreState,
    snapshots: BTreeMap<String, StoreState>,
    calls: BTreeMap<&'static str, usize>,
    faults: BTreeMap<&'static str, StoreReply>,
    activations: Vec<Duration>,
    releases: usize,
}

/// Shared-state in-memory store.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl InMemoryStore {
    /// Empty store with a `master` subsystem and the default group,
    /// serving `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        let mut state = StoreState::default();
        state
            .subsystems
            .insert(MASTER_SUBSYSTEM.to_string(), Vec::new());
        state
            .groups
            .insert(DEFAULT_GROUP.to_string(), GroupState::default());
        Self {
            inner: Arc::new(Mutex::new(Inner {
                namespace: namespace.into(),
                state,
                ..Inner::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a panicking test thread must not hide the store from the others
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---------------------------------------------------------------------
    // Seeding
    // ---------------------------------------------------------------------

    pub fn with_param(self, name: &str) -> Self {
        self.lock().state.params.entry(name.to_string()).or_insert(false);
        self
    }

    /// Seed a feature, declaring its parameters.
    pub fn with_feature(self, name: &str, params: &[(&str, &str)]) -> Self {
        {
            let mut inner = self.lock();
            let mut bundle = ParamBundle::new();
            for (key, value) in params {
                inner.state.params.entry((*key).to_string()).or_insert(false);
                bundle.insert((*key).to_string(), (*value).to_string());
            }
            inner.state.features.insert(name.to_string(), bundle);
        }
        self
    }

    pub fn with_group(self, name: &str, features: &[&str]) -> Self {
        self.lock().state.groups.insert(
            name.to_string(),
            GroupState {
                features: features.iter().map(|f| (*f).to_string()).collect(),
                params: ParamBundle::new(),
            },
        );
        self
    }

    /// Seed a node with its identity group and explicit memberships.
    pub fn with_node(self, name: &str, memberships: &[&str]) -> Self {
        {
            let mut inner = self.lock();
            let identity_group = identity_group_name(name);
            inner
                .state
                .groups
                .entry(identity_group.clone())
                .or_default();
            for group in memberships {
                inner.state.groups.entry((*group).to_string()).or_default();
            }
            inner.state.nodes.insert(
                name.to_string(),
                NodeState {
                    identity_group,
                    memberships: memberships.iter().map(|g| (*g).to_string()).collect(),
                    last_checkin_us: 0,
                },
            );
        }
        self
    }

    pub fn set_last_checkin(&self, node: &str, checkin_us: u64) {
        if let Some(state) = self.lock().state.nodes.get_mut(node) {
            state.last_checkin_us = checkin_us;
        }
    }

    /// Set features and params directly on a group, bypassing validation.
    pub fn seed_group(&self, group: &str, features: &[&str], params: &[(&str, &str)]) {
        let mut inner = self.lock();
        let entry = inner.state.groups.entry(group.to_string()).or_default();
        entry.features = features.iter().map(|f| (*f).to_string()).collect();
        entry.params = params
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
    }

    // ---------------------------------------------------------------------
    // Fault injection
    // ---------------------------------------------------------------------

    /// Answer every later call of `op` with the given nonzero status.
    pub fn fail_on(&self, op: &'static str, status: i32, text: &str) {
        self.lock().faults.insert(op, StoreReply::failed(status, text));
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    // ---------------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------------

    pub fn state(&self) -> StoreState {
        self.lock().state.clone()
    }

    /// Number of times `op` was called, including failed calls.
    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn activations(&self) -> Vec<Duration> {
        self.lock().activations.clone()
    }

    pub fn releases(&self) -> usize {
        self.lock().releases
    }

    pub fn snapshot_names(&self) -> Vec<String> {
        self.lock().snapshots.keys().cloned().collect()
    }

    pub fn feature_params(&self, feature: &str) -> Option<ParamBundle> {
        self.lock().state.features.get(feature).cloned()
    }

    pub fn group(&self, group: &str) -> Option<GroupState> {
        self.lock().state.groups.get(group).cloned()
    }

    pub fn memberships(&self, node: &str) -> Option<Vec<String>> {
        self.lock()
            .state
            .nodes
            .get(node)
            .map(|n| n.memberships.clone())
    }

    pub fn requires_restart(&self, param: &str) -> Option<bool> {
        self.lock().state.params.get(param).copied()
    }

    pub fn subsystem_params(&self, subsystem: &str) -> Option<Vec<String>> {
        self.lock().state.subsystems.get(subsystem).cloned()
    }

    /// Record the call and return the scripted fault for `op`, if any.
    fn enter(inner: &mut Inner, op: &'static str) -> Option<StoreReply> {
        *inner.calls.entry(op).or_insert(0) += 1;
        inner.faults.get(op).cloned()
    }
}

fn missing(kind: EntityKind, name: &str) -> StoreReply {
    StoreReply::failed(1, format!("no {kind} named {name}"))
}

/// Apply an ordered-list merge.
fn merge_list(current: &mut Vec<String>, op: MergeOp, incoming: &[String]) {
    match op {
        MergeOp::Replace => *current = incoming.to_vec(),
        MergeOp::Add => {
            for item in incoming {
                if !current.contains(item) {
                    current.push(item.clone());
                }
            }
        }
        MergeOp::Insert => {
            let mut merged = incoming.to_vec();
            merged.extend(current.iter().filter(|c| !incoming.contains(c)).cloned());
            *current = merged;
        }
        MergeOp::Remove => current.retain(|c| !incoming.contains(c)),
    }
}

fn merge_bundle(current: &mut ParamBundle, op: MergeOp, incoming: &ParamBundle) {
    match op {
        MergeOp::Replace => *current = incoming.clone(),
        MergeOp::Add | MergeOp::Insert => {
            current.extend(incoming.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        MergeOp::Remove => current.retain(|k, _| !incoming.contains_key(k)),
    }
}

impl ConfigStore for InMemoryStore {
    fn make_snapshot(&self, name: &str) -> StoreReply {
        let mut inner = self.lock();
        if let Some(fault) = Self::enter(&mut inner, "make_snapshot") {
            return fault;
        }
        let state = inner.state.clone();
        inner.snapshots.insert(name.to_string(), state);
        StoreReply::ok()
    }

    fn load_snapshot(&self, name: &str) -> StoreReply {
        let mut inner = self.lock();
        if let Some(fault) = Self::enter(&mut inner, "load_snapshot") {
            return fault;
        }
        let snapshot = inner.snapshots.get(name).cloned();
        match snapshot {
            Some(state) => {
                inner.state = state;
                StoreReply::ok()
            }
            None => StoreReply::failed(1, format!("no snapshot named {name}")),
        }
    }

    fn activate(&self, timeout: Duration) -> StoreReply {
        let mut inner = self.lock();
        if let Some(fault) = Self::enter(&mut inner, "activate") {
            return fault;
        }
        inner.activations.push(timeout);
        StoreReply::ok()
    }

    fn list_entities(&self, kind: EntityKind, namespace: &str) -> Result<Vec<String>, StoreReply> {
        let mut inner = self.lock();
        if let Some(fault) = Self::enter(&mut inner, "list_entities") {
            return Err(fault);
        }
        if namespace != inner.namespace {
            return Err(StoreReply::failed(2, format!("unknown package {namespace}")));
        }
        let state = &inner.state;
        Ok(match kind {
            EntityKind::Node => state.nodes.keys().cloned().collect(),
            EntityKind::Group => state.groups.keys().cloned().collect(),
            EntityKind::Feature => state.features.keys().cloned().collect(),
            EntityKind::Parameter => state.params.keys().cloned().collect(),
            EntityKind::Subsystem => state.subsystems.keys().cloned().collect(),
        })
    }

    fn create_entity(&self, kind: EntityKind, name: &str) -> StoreReply {
        let mut inner = self.lock();
        if let Some(fault) = Self::enter(&mut inner, "create_entity") {
            return fault;
        }
        let state = &mut inner.state;
        let exists = match kind {
            EntityKind::Node => state.nodes.contains_key(name),
            EntityKind::Group => state.groups.contains_key(name),
            EntityKind::Feature => state.features.contains_key(name),
            EntityKind::Parameter => state.params.contains_key(name),
            EntityKind::Subsystem => state.subsystems.contains_key(name),
        };
        if exists {
            return StoreReply::failed(1, format!("{kind} {name} already exists"));
        }
        match kind {
            EntityKind::Node => {
                let identity_group = identity_group_name(name);
                state.groups.entry(identity_group.clone()).or_default();
                state.nodes.insert(
                    name.to_string(),
                    NodeState {
                        identity_group,
                        ..NodeState::default()
                    },
                );
            }
            EntityKind::Group => {
                state.groups.insert(name.to_string(), GroupState::default());
            }
            EntityKind::Feature => {
                state.features.insert(name.to_string(), ParamBundle::new());
            }
            EntityKind::Parameter => {
                state.params.insert(name.to_string(), false);
            }
            EntityKind::Subsystem => {
                state.subsystems.insert(name.to_string(), Vec::new());
            }
        }
        StoreReply::ok()
    }

    fn modify_params(
        &self,
        target: ParamTarget<'_>,
        op: MergeOp,
        params: &ParamBundle,
    ) -> StoreReply {
        let mut inner = self.lock();
        if let Some(fault) = Self::enter(&mut inner, "modify_params") {
            return fault;
        }
        let state = &mut inner.state;
        if let Some(undeclared) = params.keys().find(|p| !state.params.contains_key(*p)) {
            return missing(EntityKind::Parameter, undeclared);
        }
        let bundle = match target {
            ParamTarget::Feature(name) => state.features.get_mut(name),
            ParamTarget::Group(name) => state.groups.get_mut(name).map(|g| &mut g.params),
        };
        match bundle {
            Some(bundle) => {
                merge_bundle(bundle, op, params);
                StoreReply::ok()
            }
            None => missing(target.kind(), target.name()),
        }
    }

    fn modify_features(&self, group: &str, op: MergeOp, features: &[String]) -> StoreReply {
        let mut inner = self.lock();
        if let Some(fault) = Self::enter(&mut inner, "modify_features") {
            return fault;
        }
        let state = &mut inner.state;
        if let Some(unknown) = features.iter().find(|f| !state.features.contains_key(*f)) {
            return missing(EntityKind::Feature, unknown);
        }
        match state.groups.get_mut(group) {
            Some(entry) => {
                merge_list(&mut entry.features, op, features);
                StoreReply::ok()
            }
            None => missing(EntityKind::Group, group),
        }
    }

    fn modify_memberships(&self, node: &str, op: MergeOp, groups: &[String]) -> StoreReply {
        let mut inner = self.lock();
        if let Some(fault) = Self::enter(&mut inner, "modify_memberships") {
            return fault;
        }
        let state = &mut inner.state;
        if let Some(unknown) = groups.iter().find(|g| !state.groups.contains_key(*g)) {
            return missing(EntityKind::Group, unknown);
        }
        match state.nodes.get_mut(node) {
            Some(entry) => {
                merge_list(&mut entry.memberships, op, groups);
                StoreReply::ok()
            }
            None => missing(EntityKind::Node, node),
        }
    }

    fn set_requires_restart(&self, param: &str, restart: bool) -> StoreReply {
        let mut inner = self.lock();
        if let Some(fault) = Self::enter(&mut inner, "set_requires_restart") {
            return fault;
        }
        match inner.state.params.get_mut(param) {
            Some(flag) => {
                *flag = restart;
                StoreReply::ok()
            }
            None => missing(EntityKind::Parameter, param),
        }
    }

    fn modify_subsystem_params(
        &self,
        subsystem: &str,
        op: MergeOp,
        params: &[String],
    ) -> StoreReply {
        let mut inner = self.lock();
        if let Some(fault) = Self::enter(&mut inner, "modify_subsystem_params") {
            return fault;
        }
        let state = &mut inner.state;
        if let Some(undeclared) = params.iter().find(|p| !state.params.contains_key(*p)) {
            return missing(EntityKind::Parameter, undeclared);
        }
        match state.subsystems.get_mut(subsystem) {
            Some(list) => {
                merge_list(list, op, params);
                StoreReply::ok()
            }
            None => missing(EntityKind::Subsystem, subsystem),
        }
    }

    fn node(&self, name: &str) -> Result<NodeInfo, StoreReply> {
        let mut inner = self.lock();
        if let Some(fault) = Self::enter(&mut inner, "node") {
            return Err(fault);
        }
        inner
            .state
            .nodes
            .get(name)
            .map(|n| NodeInfo {
                name: name.to_string(),
                identity_group: n.identity_group.clone(),
                memberships: n.memberships.clone(),
                last_checkin_us: n.last_checkin_us,
            })
            .ok_or_else(|| missing(EntityKind::Node, name))
    }

    fn group_features(&self, group: &str) -> Result<Vec<String>, StoreReply> {
        let mut inner = self.lock();
        if let Some(fault) = Self::enter(&mut inner, "group_features") {
            return Err(fault);
        }
        inner
            .state
            .groups
            .get(group)
            .map(|g| g.features.clone())
            .ok_or_else(|| missing(EntityKind::Group, group))
    }

    fn release(&mut self) {
        self.lock().releases += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn insert_prepends_without_removing() {
        let mut current = strings(&["a", "b", "c"]);
        merge_list(&mut current, MergeOp::Insert, &strings(&["x", "b"]));
        assert_eq!(current, strings(&["x", "b", "a", "c"]));
    }

    #[test]
    fn add_appends_only_new_entries() {
        let mut current = strings(&["a"]);
        merge_list(&mut current, MergeOp::Add, &strings(&["a", "b"]));
        assert_eq!(current, strings(&["a", "b"]));
    }

    #[test]
    fn snapshot_round_trip_restores_state() {
        let store = InMemoryStore::default().with_feature("F", &[("X", "1")]);
        assert!(store.make_snapshot("s1").is_ok());
        assert!(store.create_entity(EntityKind::Feature, "G").is_ok());
        assert_ne!(store.state().features.len(), 1);
        assert!(store.load_snapshot("s1").is_ok());
        assert_eq!(store.state().features.len(), 1);
    }

    #[test]
    fn params_must_be_declared() {
        let store = InMemoryStore::default().with_feature("F", &[]);
        let mut bundle = ParamBundle::new();
        bundle.insert("UNDECLARED".into(), "1".into());
        let reply = store.modify_params(ParamTarget::Feature("F"), MergeOp::Add, &bundle);
        assert!(!reply.is_ok());
        assert!(reply.text.contains("UNDECLARED"));
    }

    #[test]
    fn faults_are_returned_and_counted() {
        let store = InMemoryStore::default();
        store.fail_on("activate", 9, "agent down");
        let reply = store.activate(Duration::from_secs(1));
        assert_eq!(reply.status, 9);
        assert_eq!(store.calls("activate"), 1);
        assert!(store.activations().is_empty());
    }

    #[test]
    fn list_rejects_foreign_namespace() {
        let store = InMemoryStore::new("a.b.c");
        assert!(store.list_entities(EntityKind::Node, "x.y.z").is_err());
        assert!(store.list_entities(EntityKind::Node, "a.b.c").is_ok());
    }
}
