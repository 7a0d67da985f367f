//! Snapshots of rule groups taken before they are mutated, replayed when a
//! later step of the same policy update fails.

use crate::api::{DescribeRuleGroupResponse, FirewallApi, RuleGroupType, UpdateRuleGroupRequest};
use crate::error::ReconcileError;

use super::retry;

/// Rule group snapshots in replay order: stateless first, then stateful,
/// each in insertion order.
#[derive(Debug, Default, Clone)]
pub struct RollbackBuffer {
    stateless: Vec<DescribeRuleGroupResponse>,
    stateful: Vec<DescribeRuleGroupResponse>,
}

impl RollbackBuffer {
    pub fn push(&mut self, snapshot: DescribeRuleGroupResponse) {
        match snapshot.rule_group_response.rule_group_type {
            Some(RuleGroupType::Stateless) => self.stateless.push(snapshot),
            _ => self.stateful.push(snapshot),
        }
    }

    pub fn len(&self) -> usize {
        self.stateless.len() + self.stateful.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &DescribeRuleGroupResponse> {
        self.stateless.iter().chain(self.stateful.iter())
    }

    /// Restores every snapshot. A failed restore does not stop the others;
    /// the failures are returned.
    pub async fn replay(&self, api: &dyn FirewallApi) -> Vec<String> {
        let mut failures = Vec::new();
        for snapshot in self.iter() {
            let arn = &snapshot.rule_group_response.rule_group_arn;
            log::warn!("Rolling back rule group {}", arn);
            if let Err(e) = retry::update_rule_group(api, UpdateRuleGroupRequest::restore(snapshot)).await
            {
                log::error!("Failed to roll back rule group {}: {}", arn, e);
                failures.push(format!("{}: {}", arn, e));
            }
        }
        failures
    }

    /// Replays the buffer after `cause` and returns the error to report.
    pub async fn roll_back(&self, api: &dyn FirewallApi, cause: ReconcileError) -> ReconcileError {
        if self.is_empty() {
            return cause;
        }
        log::error!("{}; rolling back {} rule group(s)", cause, self.len());
        let rollback_failures = self.replay(api).await;
        ReconcileError::RolledBack {
            source: Box::new(cause),
            rollback_failures,
        }
    }
}
