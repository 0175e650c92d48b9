//! Shared types for the configuration store and pool harness.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Parameter assignments for a feature or group, keyed by parameter name.
pub type ParamBundle = BTreeMap<String, String>;

/// Name of the implicit group every node belongs to.
pub const DEFAULT_GROUP: &str = "+++DEFAULT";

/// Subsystem whose restart parameters decide service bounces on activation.
pub const MASTER_SUBSYSTEM: &str = "master";

/// How a new bundle combines with the bundle already on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MergeOp {
    /// Discard prior content.
    #[default]
    Replace,
    /// Union with existing content; new values win on conflict.
    Add,
    /// Prepend new entries ahead of existing ones (ordered lists only).
    Insert,
    /// Drop the named entries.
    Remove,
}

impl MergeOp {
    /// Wire name understood by the store.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Add => "add",
            Self::Insert => "insert",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for MergeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MergeOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "add" => Ok(Self::Add),
            "insert" => Ok(Self::Insert),
            "remove" => Ok(Self::Remove),
            other => Err(format!("unknown merge op '{other}'")),
        }
    }
}

/// Kinds of named objects held by the configuration store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Node,
    Group,
    Feature,
    Parameter,
    Subsystem,
}

impl EntityKind {
    /// Class name used when listing objects in a store namespace.
    pub const fn class_name(&self) -> &'static str {
        match self {
            Self::Node => "Node",
            Self::Group => "Group",
            Self::Feature => "Feature",
            Self::Parameter => "Parameter",
            Self::Subsystem => "Subsystem",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Node => "node",
            Self::Group => "group",
            Self::Feature => "feature",
            Self::Parameter => "parameter",
            Self::Subsystem => "subsystem",
        };
        f.write_str(label)
    }
}

/// Entity that can carry a parameter bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamTarget<'a> {
    Feature(&'a str),
    Group(&'a str),
}

impl ParamTarget<'_> {
    pub fn name(&self) -> &str {
        match self {
            Self::Feature(name) | Self::Group(name) => name,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Feature(_) => EntityKind::Feature,
            Self::Group(_) => EntityKind::Group,
        }
    }
}

/// Status plus message returned by every store call. Status 0 is success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReply {
    pub status: i32,
    pub text: String,
}

impl StoreReply {
    pub fn ok() -> Self {
        Self {
            status: 0,
            text: String::new(),
        }
    }

    pub fn failed(status: i32, text: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}

/// Node as seen by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    /// Group that exists solely for this node.
    pub identity_group: String,
    /// Explicit memberships, highest priority first.
    pub memberships: Vec<String>,
    /// Last check-in, microseconds since the epoch. Zero if never.
    pub last_checkin_us: u64,
}

impl NodeInfo {
    /// Last check-in in whole seconds since the epoch.
    pub fn last_checkin_secs(&self) -> u64 {
        self.last_checkin_us / 1_000_000
    }

    /// Identity group, explicit memberships, then the default group.
    pub fn all_groups(&self) -> Vec<String> {
        let mut groups = Vec::with_capacity(self.memberships.len() + 2);
        groups.push(self.identity_group.clone());
        groups.extend(self.memberships.iter().cloned());
        groups.push(DEFAULT_GROUP.to_string());
        groups
    }
}

/// Identity group name the store assigns to a node.
pub fn identity_group_name(node: &str) -> String {
    format!("+++{node}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_op_parses_case_insensitively() {
        assert_eq!("Insert".parse::<MergeOp>().unwrap(), MergeOp::Insert);
        assert_eq!("replace".parse::<MergeOp>().unwrap(), MergeOp::Replace);
        assert!("merge".parse::<MergeOp>().is_err());
    }

    #[test]
    fn merge_op_serializes_lowercase() {
        let json = serde_json::to_string(&MergeOp::Add).unwrap();
        assert_eq!(json, "\"add\"");
    }

    #[test]
    fn node_groups_include_identity_and_default() {
        let node = NodeInfo {
            name: "n1".into(),
            identity_group: identity_group_name("n1"),
            memberships: vec!["g1".into(), "g2".into()],
            last_checkin_us: 5_000_000,
        };
        assert_eq!(
            node.all_groups(),
            vec!["+++n1", "g1", "g2", DEFAULT_GROUP]
        );
        assert_eq!(node.last_checkin_secs(), 5);
    }
}
