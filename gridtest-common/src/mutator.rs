//! Configuration edits made from inside a [`PoolTest`].
//!
//! The `assert_*` operations are idempotent: an entity already in the name
//! index is never created again, and the index only learns a name after the
//! store confirmed the creation. A failure part way through a sequence is
//! not compensated; the teardown restore is the rollback.

use crate::errors::{HarnessError, HarnessResult};
use crate::store::{ConfigStore, check, check_value};
use crate::transaction::PoolTest;
use crate::types::{EntityKind, MASTER_SUBSYSTEM, MergeOp, NodeInfo, ParamBundle, ParamTarget};
use tracing::{debug, info};

/// Selection criteria for [`PoolTest::list_nodes`]. Unset criteria match
/// every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
    pub with_all_features: Option<Vec<String>>,
    pub without_any_features: Option<Vec<String>>,
    pub with_all_groups: Option<Vec<String>>,
    pub without_any_groups: Option<Vec<String>>,
    /// Only nodes that checked in at or after this time, in epoch seconds.
    pub checkin_since: Option<u64>,
}

fn owned<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    names.iter().map(|n| n.as_ref().to_string()).collect()
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_all_features<S: AsRef<str>>(mut self, features: &[S]) -> Self {
        self.with_all_features = Some(owned(features));
        self
    }

    pub fn without_any_features<S: AsRef<str>>(mut self, features: &[S]) -> Self {
        self.without_any_features = Some(owned(features));
        self
    }

    pub fn with_all_groups<S: AsRef<str>>(mut self, groups: &[S]) -> Self {
        self.with_all_groups = Some(owned(groups));
        self
    }

    pub fn without_any_groups<S: AsRef<str>>(mut self, groups: &[S]) -> Self {
        self.without_any_groups = Some(owned(groups));
        self
    }

    pub fn checkin_since(mut self, epoch_secs: u64) -> Self {
        self.checkin_since = Some(epoch_secs);
        self
    }

    fn needs_features(&self) -> bool {
        self.with_all_features.is_some() || self.without_any_features.is_some()
    }

}

/// True when `have` holds every name in `all` and none of the names in
/// `none`.
fn accepts(have: &[String], all: Option<&[String]>, none: Option<&[String]>) -> bool {
    if let Some(all) = all
        && !all.iter().all(|x| have.contains(x))
    {
        return false;
    }
    if let Some(none) = none
        && none.iter().any(|x| have.contains(x))
    {
        return false;
    }
    true
}

impl<S: ConfigStore> PoolTest<S> {
    fn assert_entity(&mut self, kind: EntityKind, name: &str) -> HarnessResult<()> {
        if self.index.contains(kind, name) {
            return Ok(());
        }
        info!(%kind, name, "Adding to config store");
        check(
            format!("create_entity {kind} {name}"),
            self.store.create_entity(kind, name),
        )?;
        self.index.insert(kind, name);
        Ok(())
    }

    /// Declare parameter `name` unless it is already known.
    pub fn assert_param(&mut self, name: &str) -> HarnessResult<()> {
        self.assert_entity(EntityKind::Parameter, name)
    }

    /// Create feature `name` unless it is already known.
    pub fn assert_feature(&mut self, name: &str) -> HarnessResult<()> {
        self.assert_entity(EntityKind::Feature, name)
    }

    pub fn assert_group(&mut self, name: &str) -> HarnessResult<()> {
        self.assert_entity(EntityKind::Group, name)
    }

    pub fn declare_features<N: AsRef<str>>(&mut self, names: &[N]) -> HarnessResult<()> {
        names.iter().try_for_each(|n| self.assert_feature(n.as_ref()))
    }

    pub fn declare_groups<N: AsRef<str>>(&mut self, names: &[N]) -> HarnessResult<()> {
        names.iter().try_for_each(|n| self.assert_group(n.as_ref()))
    }

    fn require(&self, kind: EntityKind, names: &[String]) -> HarnessResult<()> {
        match names.iter().find(|n| !self.index.contains(kind, n)) {
            Some(name) => Err(HarnessError::not_found(kind, name.clone())),
            None => Ok(()),
        }
    }

    fn set_group_features(&self, group: &str, op: MergeOp, features: &[String]) -> HarnessResult<()> {
        check(
            format!("modify_features {group}"),
            self.store.modify_features(group, op, features),
        )
    }

    /// Apply `features` to every group in `groups`, creating missing groups.
    ///
    /// Features are never created here: an unknown feature name fails with
    /// `EntityNotFound` before any group's feature list is touched.
    pub fn assert_group_features<F, G>(&mut self, features: &[F], groups: &[G], op: MergeOp) -> HarnessResult<()>
    where
        F: AsRef<str>,
        G: AsRef<str>,
    {
        let features = owned(features);
        let groups = owned(groups);
        for group in &groups {
            self.assert_group(group)?;
        }
        self.require(EntityKind::Feature, &features)?;
        for group in &groups {
            self.set_group_features(group, op, &features)?;
        }
        Ok(())
    }

    /// Nodes join the store when they check in, so the lookup always goes
    /// to the store and the index learns late arrivals.
    fn node_info(&mut self, node: &str) -> HarnessResult<NodeInfo> {
        match self.store.node(node) {
            Ok(info) => {
                self.index.insert(EntityKind::Node, node);
                Ok(info)
            }
            Err(reply) => {
                debug!(node, status = reply.status, text = %reply.text, "Node lookup failed");
                Err(HarnessError::not_found(EntityKind::Node, node))
            }
        }
    }

    /// Apply `features` to the identity group of each node.
    ///
    /// With [`MergeOp::Insert`] the features go ahead of the group's
    /// current list and nothing is removed.
    pub fn assert_node_features<F, N>(&mut self, features: &[F], nodes: &[N], op: MergeOp) -> HarnessResult<()>
    where
        F: AsRef<str>,
        N: AsRef<str>,
    {
        let features = owned(features);
        self.require(EntityKind::Feature, &features)?;
        for node in nodes {
            let info = self.node_info(node.as_ref())?;
            self.set_group_features(&info.identity_group, op, &features)?;
        }
        Ok(())
    }

    /// Set the explicit group memberships of each node, creating missing
    /// groups.
    pub fn assert_node_groups<G, N>(&mut self, groups: &[G], nodes: &[N], op: MergeOp) -> HarnessResult<()>
    where
        G: AsRef<str>,
        N: AsRef<str>,
    {
        let groups = owned(groups);
        let nodes = owned(nodes);
        for node in &nodes {
            self.node_info(node)?;
        }
        for group in &groups {
            self.assert_group(group)?;
        }
        for node in &nodes {
            check(
                format!("modify_memberships {node}"),
                self.store.modify_memberships(node, op, &groups),
            )?;
        }
        Ok(())
    }

    /// Empty a node's memberships, then its identity group's features,
    /// then that group's parameters.
    pub fn clear_node(&mut self, node: &str) -> HarnessResult<()> {
        let info = self.node_info(node)?;
        info!(node, "Clearing node configuration");
        check(
            format!("modify_memberships {node}"),
            self.store.modify_memberships(node, MergeOp::Replace, &[]),
        )?;
        self.set_group_features(&info.identity_group, MergeOp::Replace, &[])?;
        check(
            format!("modify_params {}", info.identity_group),
            self.store.modify_params(
                ParamTarget::Group(&info.identity_group),
                MergeOp::Replace,
                &ParamBundle::new(),
            ),
        )
    }

    pub fn clear_nodes<N: AsRef<str>>(&mut self, nodes: &[N]) -> HarnessResult<()> {
        nodes.iter().try_for_each(|n| self.clear_node(n.as_ref()))
    }

    /// Make the next activation restart every node carrying `feature`.
    ///
    /// `param` is declared if needed, flagged as requiring a restart,
    /// registered with the master subsystem and written into the feature
    /// with the current time, so its value differs from any earlier one.
    pub fn tag_feature_for_restart(&mut self, feature: &str, param: &str) -> HarnessResult<String> {
        if !self.index.contains(EntityKind::Feature, feature) {
            return Err(HarnessError::not_found(EntityKind::Feature, feature));
        }
        self.assert_param(param)?;
        check(
            format!("set_requires_restart {param}"),
            self.store.set_requires_restart(param, true),
        )?;

        let now = chrono::Utc::now();
        let value = format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros());
        let mut bundle = ParamBundle::new();
        bundle.insert(param.to_string(), value.clone());
        check(
            format!("modify_params {feature}"),
            self.store
                .modify_params(ParamTarget::Feature(feature), MergeOp::Add, &bundle),
        )?;

        check(
            format!("modify_subsystem_params {MASTER_SUBSYSTEM}"),
            self.store
                .modify_subsystem_params(MASTER_SUBSYSTEM, MergeOp::Add, &[param.to_string()]),
        )?;
        info!(feature, param, value = %value, "Tagged feature for restart");
        Ok(value)
    }

    /// Ordered union of the features of a node's groups.
    pub fn node_features(&self, node: &NodeInfo) -> HarnessResult<Vec<String>> {
        let mut features: Vec<String> = Vec::new();
        for group in node.all_groups() {
            let group_features =
                check_value(format!("group_features {group}"), self.store.group_features(&group))?;
            for feature in group_features {
                if !features.contains(&feature) {
                    features.push(feature);
                }
            }
        }
        Ok(features)
    }

    /// Known nodes matching `filter`, in name order.
    pub fn list_nodes(&self, filter: &NodeFilter) -> HarnessResult<Vec<String>> {
        let mut selected = Vec::new();
        for name in self.index.names(EntityKind::Node) {
            let info = check_value(format!("node {name}"), self.store.node(name))?;

            if let Some(since) = filter.checkin_since
                && info.last_checkin_secs() < since
            {
                continue;
            }

            if filter.needs_features() {
                let features = self.node_features(&info)?;
                if !accepts(
                    &features,
                    filter.with_all_features.as_deref(),
                    filter.without_any_features.as_deref(),
                ) {
                    continue;
                }
            }

            let groups = info.all_groups();
            if !accepts(
                &groups,
                filter.with_all_groups.as_deref(),
                filter.without_any_groups.as_deref(),
            ) {
                continue;
            }

            selected.push(name.to_string());
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::memory_store::InMemoryStore;

    fn setup(store: &InMemoryStore) -> PoolTest<InMemoryStore> {
        PoolTest::setup(store.clone(), HarnessConfig::default()).unwrap()
    }

    #[test]
    fn assert_param_creates_once() {
        let store = InMemoryStore::default();
        let mut test = setup(&store);
        test.assert_param("X").unwrap();
        test.assert_param("X").unwrap();
        assert_eq!(store.calls("create_entity"), 1);
        assert!(test.index().contains(EntityKind::Parameter, "X"));
    }

    #[test]
    fn failed_create_leaves_index_untouched() {
        let store = InMemoryStore::default();
        let mut test = setup(&store);
        store.fail_on("create_entity", 5, "denied");
        let err = test.assert_feature("F").unwrap_err();
        assert!(matches!(err, HarnessError::Store { status: 5, .. }));
        assert!(!test.index().contains(EntityKind::Feature, "F"));
    }

    #[test]
    fn group_features_require_existing_features() {
        let store = InMemoryStore::default().with_feature("Exec", &[]);
        let mut test = setup(&store);
        let err = test
            .assert_group_features(&["Exec", "Typo"], &["g1"], MergeOp::Replace)
            .unwrap_err();
        assert_eq!(err.to_string(), "feature Typo not in config store");
        // the group was created, but no feature list was applied
        assert_eq!(store.group("g1").unwrap().features, Vec::<String>::new());
        assert_eq!(store.calls("modify_features"), 0);
    }

    #[test]
    fn group_features_create_groups_and_apply() {
        let store = InMemoryStore::default().with_feature("Exec", &[]);
        let mut test = setup(&store);
        test.assert_group_features(&["Exec"], &["g1", "g2"], MergeOp::Replace)
            .unwrap();
        assert_eq!(store.group("g2").unwrap().features, vec!["Exec"]);
        assert!(test.index().contains(EntityKind::Group, "g1"));
    }

    #[test]
    fn node_features_insert_prepends() {
        let store = InMemoryStore::default()
            .with_feature("Master", &[])
            .with_feature("Exec", &[])
            .with_node("n1", &[]);
        store.seed_group("+++n1", &["Master"], &[]);
        let mut test = setup(&store);
        test.assert_node_features(&["Exec"], &["n1"], MergeOp::Insert)
            .unwrap();
        assert_eq!(store.group("+++n1").unwrap().features, vec!["Exec", "Master"]);
    }

    #[test]
    fn unknown_node_is_entity_not_found() {
        let store = InMemoryStore::default().with_feature("Exec", &[]);
        let mut test = setup(&store);
        let err = test
            .assert_node_features(&["Exec"], &["ghost"], MergeOp::Replace)
            .unwrap_err();
        assert_eq!(err.code(), crate::errors::ErrorCode::EntityNodeMissing);
    }

    #[test]
    fn node_checked_in_after_setup_is_found() {
        let store = InMemoryStore::default().with_feature("Exec", &[]);
        let mut test = setup(&store);
        assert!(store.create_entity(EntityKind::Node, "late").is_ok());
        assert!(!test.index().contains(EntityKind::Node, "late"));

        test.assert_node_features(&["Exec"], &["late"], MergeOp::Replace)
            .unwrap();
        assert_eq!(store.group("+++late").unwrap().features, vec!["Exec"]);
        assert!(test.index().contains(EntityKind::Node, "late"));

        test.assert_node_groups(&["g"], &["late"], MergeOp::Replace)
            .unwrap();
        assert_eq!(store.memberships("late").unwrap(), vec!["g"]);

        test.clear_node("late").unwrap();
        assert!(store.memberships("late").unwrap().is_empty());
        assert!(store.group("+++late").unwrap().features.is_empty());
        assert_eq!(
            test.list_nodes(&NodeFilter::new()).unwrap(),
            vec!["late".to_string()]
        );
    }

    #[test]
    fn unknown_node_in_group_assignment_touches_nothing() {
        let store = InMemoryStore::default().with_node("n1", &[]);
        let mut test = setup(&store);
        let err = test
            .assert_node_groups(&["g"], &["n1", "ghost"], MergeOp::Replace)
            .unwrap_err();
        assert_eq!(err.to_string(), "node ghost not in config store");
        assert!(store.group("g").is_none());
        assert_eq!(store.calls("modify_memberships"), 0);
    }

    #[test]
    fn node_groups_create_missing_groups() {
        let store = InMemoryStore::default().with_node("n1", &["old"]);
        let mut test = setup(&store);
        test.assert_node_groups(&["GridScaleTest"], &["n1"], MergeOp::Replace)
            .unwrap();
        assert_eq!(store.memberships("n1").unwrap(), vec!["GridScaleTest"]);
    }

    #[test]
    fn tag_marks_param_for_restart() {
        let store = InMemoryStore::default().with_feature("Exec", &[]);
        let mut test = setup(&store);
        let value = test.tag_feature_for_restart("Exec", "GRIDTEST_TAG").unwrap();
        assert_eq!(store.requires_restart("GRIDTEST_TAG"), Some(true));
        assert_eq!(
            store.feature_params("Exec").unwrap().get("GRIDTEST_TAG"),
            Some(&value)
        );
        assert_eq!(
            store.subsystem_params(MASTER_SUBSYSTEM).unwrap(),
            vec!["GRIDTEST_TAG"]
        );
    }

    #[test]
    fn list_nodes_filters_on_groups_features_and_checkin() {
        let store = InMemoryStore::default()
            .with_feature("Exec", &[])
            .with_feature("Scheduler", &[])
            .with_node("n1", &["g1"])
            .with_node("n2", &[])
            .with_node("n3", &["g1"]);
        store.seed_group("g1", &["Exec"], &[]);
        store.seed_group("+++n3", &["Scheduler"], &[]);
        store.set_last_checkin("n1", 2_000_000_000);
        store.set_last_checkin("n3", 9_000_000);
        let test = setup(&store);

        let all = test.list_nodes(&NodeFilter::new()).unwrap();
        assert_eq!(all, vec!["n1", "n2", "n3"]);

        let exec = test
            .list_nodes(&NodeFilter::new().with_all_features(&["Exec"]).without_any_features(&["Scheduler"]))
            .unwrap();
        assert_eq!(exec, vec!["n1"]);

        let ungrouped = test
            .list_nodes(&NodeFilter::new().without_any_groups(&["g1"]))
            .unwrap();
        assert_eq!(ungrouped, vec!["n2"]);

        let default = test
            .list_nodes(&NodeFilter::new().with_all_groups(&["+++DEFAULT", "+++n2"]))
            .unwrap();
        assert_eq!(default, vec!["n2"]);

        let recent = test.list_nodes(&NodeFilter::new().checkin_since(100)).unwrap();
        assert_eq!(recent, vec!["n1"]);
    }
}
