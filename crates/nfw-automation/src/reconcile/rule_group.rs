//! Creates or updates the rule groups a policy references, and prunes the
//! ones it no longer references.

use std::collections::BTreeSet;

use crate::api::{FirewallApi, FirewallPolicy, UpdateRuleGroupRequest};
use crate::config::{ConfigReader, RuleGroupContent, RuleGroupSpec};
use crate::error::{ConfigError, ReconcileError};

use super::retry;
use super::rollback::RollbackBuffer;

pub struct RuleGroupReconciler<'a> {
    api: &'a dyn FirewallApi,
    reader: &'a ConfigReader,
}

impl<'a> RuleGroupReconciler<'a> {
    pub fn new(api: &'a dyn FirewallApi, reader: &'a ConfigReader) -> Self {
        Self { api, reader }
    }

    /// Reconciles every rule group referenced by `policy`, stateless first,
    /// and rewrites each reference from its file path to the group's ARN.
    ///
    /// On success the snapshots of the groups that were updated are returned
    /// so that a later failure can still restore them. On failure they have
    /// already been replayed.
    pub async fn resolve_references(
        &self,
        policy: &mut FirewallPolicy,
    ) -> Result<RollbackBuffer, ReconcileError> {
        log::info!("Checking rule groups found in the firewall policy");
        let mut rollback = RollbackBuffer::default();
        match self.walk(policy, &mut rollback).await {
            Ok(()) => Ok(rollback),
            Err(e) => Err(rollback.roll_back(self.api, e).await),
        }
    }

    async fn walk(
        &self,
        policy: &mut FirewallPolicy,
        rollback: &mut RollbackBuffer,
    ) -> Result<(), ReconcileError> {
        for reference in &mut policy.stateless_rule_group_references {
            reference.resource_arn = self.reconcile(&reference.resource_arn, rollback).await?;
        }
        for reference in &mut policy.stateful_rule_group_references {
            reference.resource_arn = self.reconcile(&reference.resource_arn, rollback).await?;
        }
        Ok(())
    }

    /// Creates or updates the rule group defined in `reference` and returns its ARN.
    async fn reconcile(
        &self,
        reference: &str,
        rollback: &mut RollbackBuffer,
    ) -> Result<String, ReconcileError> {
        let spec = self.reader.load_rule_group(reference)?;
        let request = spec.create_request(self.rules_text(&spec)?);

        log::info!(
            "Checking if {} rule group exists: {}",
            spec.rule_group_type,
            spec.rule_group_name
        );
        let existing = self
            .api
            .describe_rule_group(&spec.rule_group_name, spec.rule_group_type)
            .await?;

        match existing {
            Some(current) => {
                let arn = current.rule_group_response.rule_group_arn.clone();
                log::info!("Found existing rule group {}, updating it", arn);
                let update = UpdateRuleGroupRequest {
                    update_token: current.update_token.clone(),
                    rule_group_arn: arn.clone(),
                    rule_group_type: request.rule_group_type,
                    rule_group: request.rule_group,
                    rules: request.rules,
                    description: request.description,
                };
                rollback.push(current);
                retry::update_rule_group(self.api, update).await?;
                Ok(arn)
            }
            None => {
                log::info!("Creating rule group: {}", spec.rule_group_name);
                let created = self.api.create_rule_group(&request).await?;
                log::info!(
                    "Created rule group {}",
                    created.rule_group_response.rule_group_arn
                );
                Ok(created.rule_group_response.rule_group_arn)
            }
        }
    }

    fn rules_text(&self, spec: &RuleGroupSpec) -> Result<Option<String>, ConfigError> {
        match &spec.content {
            RuleGroupContent::Structured(_) => Ok(None),
            RuleGroupContent::RulesFile(reference) => self
                .reader
                .read_rules(reference)
                .map(Some)
                .ok_or_else(|| ConfigError::EmptyRules {
                    path: self.reader.resolve(reference),
                }),
        }
    }
}

/// Deletes every ARN in `previous` that is not in `current`.
///
/// Deletion is best effort: the service refuses to delete a group that is
/// still referenced elsewhere, and such failures are only logged. Returns the
/// ARNs actually deleted.
pub async fn prune_rule_groups(
    api: &dyn FirewallApi,
    previous: &[String],
    current: &[String],
) -> Vec<String> {
    log::debug!("Rule groups attached before this run: {:?}", previous);
    log::debug!("Rule groups referenced by the policy file: {:?}", current);

    let keep: BTreeSet<&str> = current.iter().map(String::as_str).collect();
    let mut seen = BTreeSet::new();
    let mut deleted = Vec::new();

    for arn in previous {
        if keep.contains(arn.as_str()) || !seen.insert(arn.as_str()) {
            continue;
        }
        log::info!("Deleting rule group no longer referenced: {}", arn);
        match api.delete_rule_group(arn).await {
            Ok(()) => deleted.push(arn.clone()),
            Err(e) => log::info!("Unable to delete rule group {}: {}", arn, e),
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::InMemoryFirewallApi;
    use crate::api::{
        ApiError, CreateFirewallPolicyRequest, CreateRuleGroupRequest, RuleGroupType,
        StatefulRuleGroupReference, StatelessRuleGroupReference,
    };
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn stateless_file(name: &str, version: u32) -> String {
        format!(
            r#"{{"RuleGroupName": "{}", "Type": "STATELESS", "Capacity": 10, "RuleGroup": {{"version": {}}}}}"#,
            name, version
        )
    }

    fn seed_stateless(api: &InMemoryFirewallApi, name: &str) -> String {
        api.seed_rule_group(&CreateRuleGroupRequest {
            rule_group_name: name.into(),
            rule_group_type: Some(RuleGroupType::Stateless),
            rule_group: Some(json!({ "version": 1 })),
            ..CreateRuleGroupRequest::default()
        })
    }

    fn policy(stateless: &[&str], stateful: &[&str]) -> FirewallPolicy {
        FirewallPolicy {
            stateless_rule_group_references: stateless
                .iter()
                .enumerate()
                .map(|(i, r)| StatelessRuleGroupReference {
                    resource_arn: r.to_string(),
                    priority: i as i32 + 1,
                })
                .collect(),
            stateful_rule_group_references: stateful
                .iter()
                .map(|r| StatefulRuleGroupReference {
                    resource_arn: r.to_string(),
                    priority: None,
                })
                .collect(),
            ..FirewallPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_creates_and_updates_and_rewrites_references() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "rg/a.json", &stateless_file("a", 2));
        write(
            temp.path(),
            "rg/b.json",
            r#"{"RuleGroupName": "b", "Type": "STATEFUL", "Capacity": 10, "Rules": "rules/b.rules"}"#,
        );
        write(temp.path(), "rules/b.rules", "drop tcp any any -> any 23 (sid:1;)");

        let api = InMemoryFirewallApi::new();
        let a_arn = seed_stateless(&api, "a");
        let reader = ConfigReader::new(temp.path());

        let mut body = policy(&["rg/a.json"], &["rg/b.json"]);
        let rollback = RuleGroupReconciler::new(&api, &reader)
            .resolve_references(&mut body)
            .await
            .unwrap();

        assert_eq!(body.stateless_rule_group_references[0].resource_arn, a_arn);
        let b_arn = &body.stateful_rule_group_references[0].resource_arn;
        assert!(b_arn.ends_with("stateful-rulegroup/b"));
        assert_eq!(rollback.len(), 1);

        assert_eq!(api.rule_group(&a_arn).unwrap().rule_group, Some(json!({ "version": 2 })));
        assert_eq!(
            api.rule_group(b_arn).unwrap().rule_group,
            Some(json!({ "RulesSource": { "RulesString": "drop tcp any any -> any 23 (sid:1;)" } }))
        );
    }

    #[tokio::test]
    async fn test_failure_restores_every_updated_group() {
        let temp = TempDir::new().unwrap();
        for (name, file) in [("a", "rg/a.json"), ("b", "rg/b.json"), ("c", "rg/c.json")] {
            write(temp.path(), file, &stateless_file(name, 2));
        }

        let api = InMemoryFirewallApi::new();
        let a = seed_stateless(&api, "a");
        let b = seed_stateless(&api, "b");
        let c = seed_stateless(&api, "c");
        api.fail_on(
            "UpdateRuleGroup",
            Some(c.as_str()),
            ApiError::Service {
                code: "InvalidRequestException".into(),
                message: "capacity".into(),
            },
        );

        let reader = ConfigReader::new(temp.path());
        let mut body = policy(&["rg/a.json", "rg/b.json", "rg/c.json"], &[]);
        let err = RuleGroupReconciler::new(&api, &reader)
            .resolve_references(&mut body)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::RolledBack { .. }));
        assert!(err.rollback_failures().is_empty());
        for arn in [&a, &b, &c] {
            assert_eq!(api.rule_group(arn).unwrap().rule_group, Some(json!({ "version": 1 })));
        }
        // a and b were updated, so their snapshot tokens are stale and each
        // restore is retried once; c was never updated
        assert_eq!(
            api.targets("UpdateRuleGroup"),
            vec![a.clone(), b.clone(), c.clone(), a.clone(), a, b.clone(), b, c]
        );
    }

    #[tokio::test]
    async fn test_missing_rule_group_file_fails_without_rollback() {
        let temp = TempDir::new().unwrap();
        let api = InMemoryFirewallApi::new();
        let reader = ConfigReader::new(temp.path());
        let mut body = policy(&["rg/missing.json"], &[]);
        let err = RuleGroupReconciler::new(&api, &reader)
            .resolve_references(&mut body)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Config(ConfigError::ReadFile { .. })));
    }

    #[tokio::test]
    async fn test_prune_deletes_exactly_the_difference() {
        let api = InMemoryFirewallApi::new();
        let old_a = seed_stateless(&api, "old-a");
        let old_b = seed_stateless(&api, "old-b");
        let kept = seed_stateless(&api, "kept");
        let fresh = seed_stateless(&api, "fresh");

        let previous = vec![old_a.clone(), kept.clone(), old_b.clone(), old_a.clone()];
        let current = vec![kept.clone(), fresh.clone()];
        let deleted = prune_rule_groups(&api, &previous, &current).await;

        assert_eq!(deleted, vec![old_a.clone(), old_b.clone()]);
        assert_eq!(api.targets("DeleteRuleGroup"), vec![old_a, old_b]);
        assert!(api.rule_group(&kept).is_some());
        assert!(api.rule_group(&fresh).is_some());
    }

    #[tokio::test]
    async fn test_prune_tolerates_groups_in_use() {
        let api = InMemoryFirewallApi::new();
        let shared = seed_stateless(&api, "shared");
        api.seed_policy(&CreateFirewallPolicyRequest {
            firewall_policy_name: "other".into(),
            firewall_policy: policy(&[shared.as_str()], &[]),
            ..CreateFirewallPolicyRequest::default()
        });

        let deleted = prune_rule_groups(&api, &[shared.clone()], &[]).await;
        assert!(deleted.is_empty());
        assert!(api.rule_group(&shared).is_some());
    }
}
