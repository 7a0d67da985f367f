//! Drives remote rule groups, policies and firewalls towards the state
//! declared on disk.

pub mod firewall;
pub mod logging;
pub mod policy;
pub mod retry;
pub mod rollback;
pub mod rule_group;

pub use firewall::{FirewallOutcome, FirewallPhase, FirewallReconciler};
pub use logging::{apply_logging, build_log_destinations};
pub use policy::{PolicyOutcome, PolicyReconciler};
pub use rollback::RollbackBuffer;
pub use rule_group::{prune_rule_groups, RuleGroupReconciler};

use crate::api::Tag;

/// Desired tags that are missing from `live` or carry a different value.
pub(crate) fn changed_tags(desired: &[Tag], live: &[Tag]) -> Vec<Tag> {
    desired
        .iter()
        .filter(|tag| !live.contains(tag))
        .cloned()
        .collect()
}
