//! Configuration templates for standard pool roles.
//!
//! Each template renders a parameter bundle; [`PoolTest::build_template`]
//! creates the feature, declares every parameter it uses and writes the
//! bundle. Daemon instances are named with zero-padded indexes, so the
//! first of two startds is `STARTD_ST000`.

use crate::errors::{HarnessError, HarnessResult};
use crate::store::{ConfigStore, check};
use crate::transaction::PoolTest;
use crate::types::{MergeOp, ParamBundle, ParamTarget};
use serde::Serialize;
use tracing::info;

/// A role whose configuration can be rendered as a parameter bundle.
pub trait FeatureTemplate {
    /// What building the template reports back, e.g. slot counts.
    type Output;

    fn params(&self) -> ParamBundle;

    fn output(&self) -> Self::Output;
}

fn set(params: &mut ParamBundle, key: impl Into<String>, value: impl Into<String>) {
    params.insert(key.into(), value.into());
}

/// `DAEMON_LIST` value for the given daemons.
///
/// With `append` the store's append form is used so the daemons are added
/// to whatever list the node already has.
pub fn daemon_list(append: bool, daemons: &[String]) -> String {
    if append {
        format!(">= {}", daemons.join(","))
    } else if daemons.is_empty() {
        "MASTER".to_string()
    } else {
        format!("MASTER,{}", daemons.join(","))
    }
}

/// Slot totals for an execute feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotCounts {
    /// Static or partitionable slots across all startds.
    pub slots: u64,
    /// Dynamic slots the partitionable slots can be carved into.
    pub dynamic_slots: u64,
}

/// Execute node running one or more startds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteFeature {
    pub startd: u32,
    /// Slots per startd.
    pub slots: u32,
    /// Cpus per partitionable slot. Zero means static slots.
    pub dynamic: u32,
    pub dl_append: bool,
    /// Always start jobs and never suspend or vacate them.
    pub dedicated: bool,
    pub preemption: bool,
    /// Advertise a distinct `Machine` per startd.
    pub ad_machine: bool,
    /// Open read/write access with claim-to-be authentication.
    pub open_access: bool,
    pub collector_host: Option<String>,
}

impl Default for ExecuteFeature {
    fn default() -> Self {
        Self {
            startd: 1,
            slots: 1,
            dynamic: 0,
            dl_append: false,
            dedicated: true,
            preemption: false,
            ad_machine: false,
            open_access: true,
            collector_host: None,
        }
    }
}

impl ExecuteFeature {
    pub fn new(startd: u32, slots: u32, dynamic: u32) -> Self {
        Self {
            startd,
            slots,
            dynamic,
            ..Self::default()
        }
    }

    pub fn collector_host(mut self, host: impl Into<String>) -> Self {
        self.collector_host = Some(host.into());
        self
    }

    fn tags(&self) -> impl Iterator<Item = String> {
        (0..self.startd).map(|s| format!("ST{s:03}"))
    }
}

impl FeatureTemplate for ExecuteFeature {
    type Output = SlotCounts;

    fn params(&self) -> ParamBundle {
        let mut p = ParamBundle::new();
        set(&mut p, "USE_PROCD", "FALSE");
        if let Some(host) = &self.collector_host {
            set(&mut p, "COLLECTOR_HOST", host.as_str());
        }
        if self.open_access {
            set(&mut p, "ALLOW_WRITE", "*");
            set(&mut p, "ALLOW_READ", "*");
            set(&mut p, "SEC_DEFAULT_AUTHENTICATION_METHODS", "CLAIMTOBE");
        }

        if self.dedicated {
            set(&mut p, "START", "TRUE");
            set(&mut p, "SUSPEND", "FALSE");
            set(&mut p, "KILL", "FALSE");
            set(&mut p, "CONTINUE", "TRUE");
            set(&mut p, "WANT_VACATE", "FALSE");
            set(&mut p, "WANT_SUSPEND", "FALSE");
        }

        if !self.preemption {
            set(&mut p, "CLAIM_WORKLIFE", "0");
            set(&mut p, "MAXJOBRETIREMENTTIME", "3600 * 24");
            set(&mut p, "PREEMPT", "FALSE");
            set(&mut p, "PREEMPTION_REQUIREMENTS", "FALSE");
            set(&mut p, "RANK", "0");
            set(&mut p, "NEGOTIATOR_CONSIDER_PREEMPTION", "FALSE");
        }

        if self.dynamic > 0 {
            set(&mut p, "SLOT_TYPE_1", format!("cpus={}", self.dynamic));
            set(&mut p, "SLOT_TYPE_1_PARTITIONABLE", "TRUE");
            set(&mut p, "NUM_SLOTS_TYPE_1", self.slots.to_string());
            set(
                &mut p,
                "NUM_CPUS",
                (u64::from(self.slots) * u64::from(self.dynamic)).to_string(),
            );
        } else {
            set(&mut p, "NUM_SLOTS", self.slots.to_string());
            set(&mut p, "NUM_CPUS", self.slots.to_string());
        }

        let mut daemons = Vec::new();
        for tag in self.tags() {
            let daemon = format!("STARTD_{tag}");
            set(&mut p, daemon.as_str(), "$(STARTD)");
            set(&mut p, format!("{daemon}_ARGS"), format!("-f -local-name {tag}"));
            set(&mut p, format!("STARTD.{tag}.STARTD_NAME"), tag.as_str());
            set(&mut p, format!("STARTD.{tag}.ADDRESS_FILE"), format!("$(LOG)/.{tag}-address"));
            set(&mut p, format!("STARTD.{tag}.STARTD_LOG"), format!("$(LOG)/{tag}_Log"));
            if self.ad_machine {
                set(&mut p, format!("STARTD.{tag}.STARTD_ATTRS"), "$(STARTD_ATTRS), Machine");
                set(&mut p, format!("STARTD.{tag}.Machine"), format!("\"s{tag}.$(FULL_HOSTNAME)\""));
            }
            daemons.push(daemon);
        }
        set(&mut p, "DAEMON_LIST", daemon_list(self.dl_append, &daemons));
        p
    }

    fn output(&self) -> SlotCounts {
        let slots = u64::from(self.startd) * u64::from(self.slots);
        SlotCounts {
            slots,
            dynamic_slots: slots * u64::from(self.dynamic),
        }
    }
}

/// Additional schedds on a submit node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerFeature {
    pub schedd: u32,
    pub dl_append: bool,
}

impl Default for SchedulerFeature {
    fn default() -> Self {
        Self {
            schedd: 1,
            dl_append: true,
        }
    }
}

impl SchedulerFeature {
    pub fn new(schedd: u32) -> Self {
        Self {
            schedd,
            ..Self::default()
        }
    }
}

impl FeatureTemplate for SchedulerFeature {
    /// Local names of the schedds.
    type Output = Vec<String>;

    fn params(&self) -> ParamBundle {
        let mut p = ParamBundle::new();
        set(&mut p, "USE_PROCD", "FALSE");
        for s in 0..self.schedd {
            let tag = format!("{s:03}");
            let name = format!("SCHEDD{tag}");
            set(&mut p, name.as_str(), "$(SCHEDD)");
            set(&mut p, format!("{name}_ARGS"), format!("-f -local-name {name}"));
            set(&mut p, format!("SCHEDD.{name}.SCHEDD_NAME"), name.as_str());
            set(&mut p, format!("SCHEDD.{name}.SCHEDD_LOG"), format!("$(LOG)/SchedLog{tag}"));
            set(
                &mut p,
                format!("SCHEDD.{name}.SCHEDD_ADDRESS_FILE"),
                format!("$(LOG)/.schedd{tag}-address"),
            );
        }
        set(&mut p, "DAEMON_LIST", daemon_list(self.dl_append, &self.output()));
        p
    }

    fn output(&self) -> Vec<String> {
        (0..self.schedd).map(|s| format!("SCHEDD{s:03}")).collect()
    }
}

/// Additional collectors listening on consecutive ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorFeature {
    pub collector: u32,
    pub port_start: u16,
    pub dl_append: bool,
    pub disable_plugins: bool,
}

impl Default for CollectorFeature {
    fn default() -> Self {
        Self {
            collector: 1,
            port_start: 10000,
            dl_append: true,
            disable_plugins: true,
        }
    }
}

impl CollectorFeature {
    pub fn new(collector: u32) -> Self {
        Self {
            collector,
            ..Self::default()
        }
    }

    /// Fails with `Config` when the last collector's port would pass 65535.
    pub fn validate(&self) -> HarnessResult<()> {
        let last = u64::from(self.port_start) + u64::from(self.collector);
        if self.collector > 0 && last - 1 > u64::from(u16::MAX) {
            return Err(HarnessError::Config(format!(
                "{} collectors starting at port {} run past port 65535",
                self.collector, self.port_start
            )));
        }
        Ok(())
    }
}

impl FeatureTemplate for CollectorFeature {
    /// Local names of the collectors.
    type Output = Vec<String>;

    fn params(&self) -> ParamBundle {
        let mut p = ParamBundle::new();
        for s in 0..self.collector {
            let tag = format!("{s:03}");
            let name = format!("COLLECTOR{tag}");
            let port = u64::from(self.port_start) + u64::from(s);
            set(&mut p, name.as_str(), "$(COLLECTOR)");
            set(&mut p, format!("{name}_ARGS"), format!("-f -p {port} -local-name {name}"));
            set(
                &mut p,
                format!("{name}_ENVIRONMENT"),
                format!("_CONDOR_COLLECTOR_LOG=$(LOG)/CollectorLog{tag}"),
            );
            set(&mut p, format!("COLLECTOR.{name}.COLLECTOR_NAME"), name.as_str());
            set(&mut p, format!("COLLECTOR.{name}.CONDOR_VIEW_HOST"), "$(COLLECTOR_HOST)");
            if self.disable_plugins {
                set(&mut p, format!("COLLECTOR.{name}.PLUGINS"), "");
            }
        }
        set(&mut p, "DAEMON_LIST", daemon_list(self.dl_append, &self.output()));
        p
    }

    fn output(&self) -> Vec<String> {
        (0..self.collector).map(|s| format!("COLLECTOR{s:03}")).collect()
    }
}

/// Open access for test traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessFeature {
    pub collector_host: Option<String>,
}

impl FeatureTemplate for AccessFeature {
    type Output = ();

    fn params(&self) -> ParamBundle {
        let mut p = ParamBundle::new();
        set(&mut p, "ALLOW_READ", "*");
        set(&mut p, "ALLOW_WRITE", "*");
        set(&mut p, "SEC_DEFAULT_AUTHENTICATION_METHODS", "CLAIMTOBE");
        if let Some(host) = &self.collector_host {
            set(&mut p, "COLLECTOR_HOST", host.as_str());
        }
        p
    }

    fn output(&self) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountingGroup {
    pub name: String,
    /// Slot count for a static quota, fraction of the pool otherwise.
    pub quota: f64,
    /// Overrides the feature-wide surplus policy.
    pub accept_surplus: Option<bool>,
    pub is_static: bool,
}

impl AccountingGroup {
    pub fn dynamic(name: impl Into<String>, fraction: f64) -> Self {
        Self {
            name: name.into(),
            quota: fraction,
            accept_surplus: None,
            is_static: false,
        }
    }

    pub fn fixed(name: impl Into<String>, slots: u64) -> Self {
        Self {
            name: name.into(),
            quota: slots as f64,
            accept_surplus: None,
            is_static: true,
        }
    }

    pub fn accept_surplus(mut self, accept: bool) -> Self {
        self.accept_surplus = Some(accept);
        self
    }
}

/// Negotiator accounting groups and their quotas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountingGroupFeature {
    pub groups: Vec<AccountingGroup>,
    pub accept_surplus: bool,
}

fn flag(value: bool) -> &'static str {
    if value { "TRUE" } else { "FALSE" }
}

impl FeatureTemplate for AccountingGroupFeature {
    type Output = ();

    fn params(&self) -> ParamBundle {
        let mut p = ParamBundle::new();
        let names: Vec<&str> = self.groups.iter().map(|g| g.name.as_str()).collect();
        set(&mut p, "GROUP_NAMES", names.join(","));
        set(&mut p, "GROUP_ACCEPT_SURPLUS", flag(self.accept_surplus));
        for group in &self.groups {
            if group.is_static {
                set(
                    &mut p,
                    format!("GROUP_QUOTA_{}", group.name),
                    format!("{}", group.quota.trunc() as i64),
                );
            } else {
                set(
                    &mut p,
                    format!("GROUP_QUOTA_DYNAMIC_{}", group.name),
                    format!("{:.6}", group.quota),
                );
            }
            let accept = group.accept_surplus.unwrap_or(self.accept_surplus);
            if accept != self.accept_surplus {
                set(&mut p, format!("GROUP_ACCEPT_SURPLUS_{}", group.name), flag(accept));
            }
        }
        p
    }

    fn output(&self) {}
}

impl<S: ConfigStore> PoolTest<S> {
    /// Create feature `name` if needed, declare every parameter in `params`
    /// and write them with `op`.
    pub fn build_feature(&mut self, name: &str, params: &ParamBundle, op: MergeOp) -> HarnessResult<()> {
        self.assert_feature(name)?;
        for param in params.keys() {
            self.assert_param(param)?;
        }
        check(
            format!("modify_params {name}"),
            self.store.modify_params(ParamTarget::Feature(name), op, params),
        )
    }

    /// Render `template` into feature `name`, replacing its parameters.
    pub fn build_template<T: FeatureTemplate>(&mut self, name: &str, template: &T) -> HarnessResult<T::Output> {
        let params = template.params();
        info!(feature = name, params = params.len(), "Building feature");
        self.build_feature(name, &params, MergeOp::Replace)?;
        Ok(template.output())
    }

    /// Execute feature pointing at the configured collector unless the
    /// template names one.
    pub fn build_execute_feature(&mut self, name: &str, template: &ExecuteFeature) -> HarnessResult<SlotCounts> {
        let mut template = template.clone();
        if template.collector_host.is_none() {
            template.collector_host = self.config.collector_host.clone();
        }
        info!(
            feature = name,
            startd = template.startd,
            slots = template.slots,
            dynamic = template.dynamic,
            "building execute feature"
        );
        self.build_template(name, &template)
    }

    pub fn build_scheduler_feature(&mut self, name: &str, template: &SchedulerFeature) -> HarnessResult<Vec<String>> {
        self.build_template(name, template)
    }

    pub fn build_collector_feature(&mut self, name: &str, template: &CollectorFeature) -> HarnessResult<Vec<String>> {
        template.validate()?;
        self.build_template(name, template)
    }

    pub fn build_access_feature(&mut self, name: &str, template: &AccessFeature) -> HarnessResult<()> {
        self.build_template(name, template)
    }

    pub fn build_accounting_group_feature(
        &mut self,
        name: &str,
        template: &AccountingGroupFeature,
    ) -> HarnessResult<()> {
        self.build_template(name, template)
    }
}
