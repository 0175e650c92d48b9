//! Typed pool status queries.
//!
//! Queries are built from [`Constraint`] values and rendered to ClassAd
//! expressions only when the argument vector for the status command is
//! produced. Nothing goes through a shell: attribute names are validated
//! when a constraint is built and string literals are escaped.

use crate::errors::{HarnessError, HarnessResult};
use regex::Regex;
use std::fmt;

/// Machine ad attribute listing the store groups a node belongs to.
pub const GROUPS_ATTR: &str = "WallabyGroups";

/// Check that `attr` is a plain ClassAd attribute reference.
pub fn validate_attr(attr: &str) -> HarnessResult<()> {
    let pattern = Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$")
        .map_err(|e| HarnessError::InvalidQuery(format!("attribute pattern: {e}")))?;
    if pattern.is_match(attr) {
        Ok(())
    } else {
        Err(HarnessError::InvalidQuery(format!(
            "'{attr}' is not a valid attribute name"
        )))
    }
}

/// Quote `value` as a ClassAd string literal.
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Right-hand side of an equality test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Int(i64),
    /// Ids such as `ClusterId`, never negative.
    Uint(u64),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Uint(value)
    }
}

/// Filter over machine or job ads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// The ad's group list contains this group.
    GroupMember(String),
    Equals { attr: String, value: Value },
    And(Vec<Constraint>),
}

impl Constraint {
    pub fn group_member(group: impl Into<String>) -> Self {
        Self::GroupMember(group.into())
    }

    /// Conjunction of group memberships. `None` for an empty list.
    pub fn in_groups<I, S>(groups: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let terms: Vec<_> = groups.into_iter().map(Self::group_member).collect();
        match terms.len() {
            0 => None,
            1 => terms.into_iter().next(),
            _ => Some(Self::And(terms)),
        }
    }

    pub fn equals(attr: impl Into<String>, value: impl Into<Value>) -> HarnessResult<Self> {
        let attr = attr.into();
        validate_attr(&attr)?;
        Ok(Self::Equals {
            attr,
            value: value.into(),
        })
    }

    /// Jobs of one cluster.
    pub fn cluster(id: u64) -> Self {
        Self::Equals {
            attr: "ClusterId".to_string(),
            value: Value::Uint(id),
        }
    }

    pub fn and(self, other: Constraint) -> Self {
        match self {
            Self::And(mut terms) => {
                terms.push(other);
                Self::And(terms)
            }
            first => Self::And(vec![first, other]),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GroupMember(group) => {
                write!(f, "stringListMember({}, {GROUPS_ATTR})", quote(group))
            }
            Self::Equals {
                attr,
                value: Value::Str(s),
            } => write!(f, "{attr}=={}", quote(s)),
            Self::Equals {
                attr,
                value: Value::Int(n),
            } => write!(f, "{attr}=={n}"),
            Self::Equals {
                attr,
                value: Value::Uint(n),
            } => write!(f, "{attr}=={n}"),
            Self::And(terms) => {
                for (i, term) in terms.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" && ")?;
                    }
                    match term {
                        Self::And(_) => write!(f, "({term})")?,
                        _ => write!(f, "{term}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// Which ads a query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryTarget {
    /// Execute daemons in the collector.
    Startd,
    /// Master daemons in the collector, one per reporting node.
    Master,
    /// Jobs in the schedd queue.
    Queue,
}

impl QueryTarget {
    pub const fn program(&self) -> &'static str {
        match self {
            Self::Startd | Self::Master => "condor_status",
            Self::Queue => "condor_q",
        }
    }

    const fn default_attr(&self) -> &'static str {
        match self {
            Self::Startd | Self::Master => "Name",
            Self::Queue => "GlobalJobId",
        }
    }
}

/// A read-only query against the pool status interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolQuery {
    target: QueryTarget,
    constraint: Option<Constraint>,
    attrs: Vec<String>,
}

impl PoolQuery {
    pub fn new(target: QueryTarget) -> Self {
        Self {
            target,
            constraint: None,
            attrs: vec![target.default_attr().to_string()],
        }
    }

    pub fn startds() -> Self {
        Self::new(QueryTarget::Startd)
    }

    pub fn masters() -> Self {
        Self::new(QueryTarget::Master)
    }

    pub fn jobs() -> Self {
        Self::new(QueryTarget::Queue)
    }

    /// Add a constraint, and-ing it with any existing one.
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(match self.constraint.take() {
            Some(existing) => existing.and(constraint),
            None => constraint,
        });
        self
    }

    pub fn with_optional(self, constraint: Option<Constraint>) -> Self {
        match constraint {
            Some(c) => self.with_constraint(c),
            None => self,
        }
    }

    /// Attributes printed per ad, tab separated.
    pub fn with_attrs<I, S>(mut self, attrs: I) -> HarnessResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let attrs: Vec<String> = attrs.into_iter().map(Into::into).collect();
        if attrs.is_empty() {
            return Err(HarnessError::InvalidQuery("no attributes requested".into()));
        }
        for attr in &attrs {
            validate_attr(attr)?;
        }
        self.attrs = attrs;
        Ok(self)
    }

    pub fn target(&self) -> QueryTarget {
        self.target
    }

    pub fn constraint(&self) -> Option<&Constraint> {
        self.constraint.as_ref()
    }

    pub fn attrs(&self) -> &[String] {
        &self.attrs
    }

    pub fn program(&self) -> &'static str {
        self.target.program()
    }

    /// Argument vector for [`program`](Self::program).
    ///
    /// `schedd` only applies to queue queries.
    pub fn args(&self, collector: Option<&str>, schedd: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        match self.target {
            QueryTarget::Startd => args.extend(["-subsystem".to_string(), "startd".to_string()]),
            QueryTarget::Master => args.push("-master".to_string()),
            QueryTarget::Queue => {}
        }
        let last = self.attrs.len().saturating_sub(1);
        for (i, attr) in self.attrs.iter().enumerate() {
            let format = if i == last { "%s\n" } else { "%s\t" };
            args.extend(["-format".to_string(), format.to_string(), attr.clone()]);
        }
        if let Some(constraint) = &self.constraint {
            args.extend(["-constraint".to_string(), constraint.to_string()]);
        }
        if let (QueryTarget::Queue, Some(schedd)) = (self.target, schedd) {
            args.extend(["-name".to_string(), schedd.to_string()]);
        }
        if let Some(collector) = collector {
            args.extend(["-pool".to_string(), collector.to_string()]);
        }
        args
    }
}

impl fmt::Display for PoolQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())?;
        for arg in self.args(None, None) {
            if arg.contains(|c: char| c.is_whitespace() || c == '"') {
                write!(f, " '{}'", arg.escape_default())?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_constraint_renders_string_list_member() {
        let c = Constraint::group_member("GridScaleTest");
        assert_eq!(c.to_string(), r#"stringListMember("GridScaleTest", WallabyGroups)"#);
    }

    #[test]
    fn multiple_groups_are_conjoined() {
        let c = Constraint::in_groups(["a", "b"]).unwrap();
        assert_eq!(
            c.to_string(),
            r#"stringListMember("a", WallabyGroups) && stringListMember("b", WallabyGroups)"#
        );
        assert!(Constraint::in_groups(Vec::<String>::new()).is_none());
    }

    #[test]
    fn string_values_are_escaped() {
        let c = Constraint::equals("GridScaleTestTag", r#"x" || true || "y"#).unwrap();
        assert_eq!(c.to_string(), r#"GridScaleTestTag=="x\" || true || \"y""#);
    }

    #[test]
    fn cluster_ids_render_unsigned() {
        assert_eq!(Constraint::cluster(42).to_string(), "ClusterId==42");
        assert_eq!(
            Constraint::cluster(u64::MAX).to_string(),
            "ClusterId==18446744073709551615"
        );
    }

    #[test]
    fn attribute_names_are_validated() {
        assert!(Constraint::equals("ClusterId) || (1", 1i64).is_err());
        assert!(Constraint::equals("", "x").is_err());
        assert!(PoolQuery::jobs().with_attrs(["Owner", "bad attr"]).is_err());
        assert!(PoolQuery::jobs().with_attrs(Vec::<String>::new()).is_err());
    }

    #[test]
    fn startd_query_args() {
        let q = PoolQuery::startds().with_constraint(Constraint::group_member("g"));
        assert_eq!(
            q.args(None, Some("ignored")),
            vec![
                "-subsystem",
                "startd",
                "-format",
                "%s\n",
                "Name",
                "-constraint",
                r#"stringListMember("g", WallabyGroups)"#,
            ]
        );
        assert_eq!(q.program(), "condor_status");
    }

    #[test]
    fn queue_query_carries_schedd_and_pool() {
        let q = PoolQuery::jobs()
            .with_constraint(Constraint::cluster(42))
            .with_attrs(["ClusterId", "ProcId"])
            .unwrap();
        assert_eq!(
            q.args(Some("cm.example:9618"), Some("SCHEDD000@host")),
            vec![
                "-format",
                "%s\t",
                "ClusterId",
                "-format",
                "%s\n",
                "ProcId",
                "-constraint",
                "ClusterId==42",
                "-name",
                "SCHEDD000@host",
                "-pool",
                "cm.example:9618",
            ]
        );
        assert_eq!(q.program(), "condor_q");
    }

    #[test]
    fn constraints_accumulate() {
        let q = PoolQuery::masters()
            .with_constraint(Constraint::group_member("a"))
            .with_constraint(Constraint::group_member("b"));
        assert!(matches!(q.constraint(), Some(Constraint::And(terms)) if terms.len() == 2));
        assert_eq!(q.args(None, None)[0], "-master");
    }
}
