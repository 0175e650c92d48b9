//! Configuration store client interface.
//!
//! The harness never talks to the store transport directly. Session
//! establishment and the RPC wire format live behind [`ConfigStore`]; every
//! call answers with a [`StoreReply`] whose status is zero on success.

use crate::errors::{HarnessError, HarnessResult};
use crate::types::{EntityKind, MergeOp, NodeInfo, ParamBundle, ParamTarget, StoreReply};
use std::time::Duration;

/// Operations the harness needs from a configuration store session.
pub trait ConfigStore {
    /// Capture the whole store under `name`.
    fn make_snapshot(&self, name: &str) -> StoreReply;

    /// Replace the store contents with the snapshot `name`.
    fn load_snapshot(&self, name: &str) -> StoreReply;

    /// Push the current configuration out to the pool.
    fn activate(&self, timeout: Duration) -> StoreReply;

    /// Names of all entities of `kind` in `namespace`.
    fn list_entities(&self, kind: EntityKind, namespace: &str) -> Result<Vec<String>, StoreReply>;

    fn create_entity(&self, kind: EntityKind, name: &str) -> StoreReply;

    fn modify_params(&self, target: ParamTarget<'_>, op: MergeOp, params: &ParamBundle)
    -> StoreReply;

    /// Edit the ordered feature list of a group.
    fn modify_features(&self, group: &str, op: MergeOp, features: &[String]) -> StoreReply;

    /// Edit the ordered explicit membership list of a node.
    fn modify_memberships(&self, node: &str, op: MergeOp, groups: &[String]) -> StoreReply;

    fn set_requires_restart(&self, param: &str, restart: bool) -> StoreReply;

    /// Edit the parameters whose change restarts `subsystem`.
    fn modify_subsystem_params(&self, subsystem: &str, op: MergeOp, params: &[String])
    -> StoreReply;

    fn node(&self, name: &str) -> Result<NodeInfo, StoreReply>;

    /// Ordered feature list of a group.
    fn group_features(&self, group: &str) -> Result<Vec<String>, StoreReply>;

    /// Release per-test session resources. Must be safe to call twice.
    fn release(&mut self);
}

/// Turn a store reply into a harness result, logging failures.
pub(crate) fn check(op: impl AsRef<str>, reply: StoreReply) -> HarnessResult<()> {
    if reply.is_ok() {
        return Ok(());
    }
    let op = op.as_ref();
    tracing::error!(op, status = reply.status, message = %reply.text, "store call failed");
    Err(HarnessError::store(op, reply.status, reply.text))
}

/// Like [`check`] for calls that return data.
pub(crate) fn check_value<T>(op: impl AsRef<str>, result: Result<T, StoreReply>) -> HarnessResult<T> {
    result.map_err(|reply| {
        let op = op.as_ref();
        // a read that fails with status 0 is still a failure
        let status = if reply.is_ok() { -1 } else { reply.status };
        tracing::error!(op, status, message = %reply.text, "store read failed");
        HarnessError::store(op, status, reply.text)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_zero_status() {
        assert!(check("activate", StoreReply::ok()).is_ok());
    }

    #[test]
    fn check_surfaces_status_and_message() {
        let err = check("create_entity feature F", StoreReply::failed(7, "exists")).unwrap_err();
        match err {
            HarnessError::Store { op, status, message } => {
                assert_eq!(op, "create_entity feature F");
                assert_eq!(status, 7);
                assert_eq!(message, "exists");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn check_value_never_accepts_zero_status_error() {
        let result: Result<Vec<String>, StoreReply> = Err(StoreReply::ok());
        let err = check_value("list_entities Node", result).unwrap_err();
        assert!(matches!(err, HarnessError::Store { status: -1, .. }));
    }
}
