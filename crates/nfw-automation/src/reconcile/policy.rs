//! Creates or updates a firewall policy from its file.

use serde::Serialize;
use tracing::Instrument;

use crate::api::{
    DescribeFirewallPolicyResponse, FirewallApi, FirewallPolicy, UpdateFirewallPolicyRequest,
};
use crate::config::{unique_name, ConfigReader, PolicySpec, ReconcileOptions};
use crate::error::ReconcileError;

use super::rollback::RollbackBuffer;
use super::rule_group::{prune_rule_groups, RuleGroupReconciler};
use super::{changed_tags, retry};

/// Result of reconciling one policy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOutcome {
    pub firewall_policy_name: String,
    pub firewall_policy_arn: String,
    pub created: bool,
    /// Rule groups deleted because the policy no longer references them.
    pub pruned: Vec<String>,
}

pub struct PolicyReconciler<'a> {
    api: &'a dyn FirewallApi,
    reader: &'a ConfigReader,
    stack_id: &'a str,
    options: &'a ReconcileOptions,
}

impl<'a> PolicyReconciler<'a> {
    pub fn new(
        api: &'a dyn FirewallApi,
        reader: &'a ConfigReader,
        stack_id: &'a str,
        options: &'a ReconcileOptions,
    ) -> Self {
        Self {
            api,
            reader,
            stack_id,
            options,
        }
    }

    /// Reconciles the policy defined in `reference` and its rule groups.
    pub async fn reconcile(&self, reference: &str) -> Result<PolicyOutcome, ReconcileError> {
        let spec = self.reader.load_policy(reference)?;
        let name = unique_name(&spec.firewall_policy_name, self.stack_id)?;
        let span = tracing::info_span!("reconcile.policy", policy = %name);
        self.reconcile_named(spec, name).instrument(span).await
    }

    async fn reconcile_named(
        &self,
        spec: PolicySpec,
        name: String,
    ) -> Result<PolicyOutcome, ReconcileError> {
        let previous = self.attached_rule_groups(&name).await;

        let mut body = spec.firewall_policy.clone();
        let rollback = RuleGroupReconciler::new(self.api, self.reader)
            .resolve_references(&mut body)
            .await?;

        log::info!("Checking if firewall policy exists: {}", name);
        let existing = match self.api.describe_firewall_policy(&name).await {
            Ok(existing) => existing,
            Err(e) => return Err(rollback.roll_back(self.api, e.into()).await),
        };

        match existing {
            Some(live) => self.update(&spec, name, body, live, rollback, &previous).await,
            None => self.create(&spec, name, body, rollback).await,
        }
    }

    async fn update(
        &self,
        spec: &PolicySpec,
        name: String,
        body: FirewallPolicy,
        live: DescribeFirewallPolicyResponse,
        rollback: RollbackBuffer,
        previous: &[String],
    ) -> Result<PolicyOutcome, ReconcileError> {
        let arn = live.firewall_policy_response.firewall_policy_arn.clone();
        log::info!("Found existing firewall policy {}, updating it", arn);

        let current = body.rule_group_arns();
        let request = UpdateFirewallPolicyRequest {
            update_token: live.update_token.clone(),
            firewall_policy_arn: arn.clone(),
            firewall_policy_name: name.clone(),
            firewall_policy: body,
            description: spec.description.clone(),
        };
        if let Err(e) = retry::update_firewall_policy(self.api, request).await {
            return Err(rollback.roll_back(self.api, e.into()).await);
        }

        let tags = changed_tags(&spec.tags, &live.firewall_policy_response.tags);
        if !tags.is_empty() {
            if let Err(e) = self.api.tag_resource(&arn, &tags).await {
                log::warn!("Failed to tag firewall policy {}: {}", arn, e);
            }
        }

        if !self.options.settle_delay.is_zero() {
            log::info!(
                "Waiting {}s before deleting detached rule groups",
                self.options.settle_delay.as_secs()
            );
            tokio::time::sleep(self.options.settle_delay).await;
        }
        let pruned = prune_rule_groups(self.api, previous, &current).await;

        Ok(PolicyOutcome {
            firewall_policy_name: name,
            firewall_policy_arn: arn,
            created: false,
            pruned,
        })
    }

    async fn create(
        &self,
        spec: &PolicySpec,
        name: String,
        body: FirewallPolicy,
        rollback: RollbackBuffer,
    ) -> Result<PolicyOutcome, ReconcileError> {
        log::info!("Creating firewall policy: {}", name);
        let mut request = spec.create_request(false);
        request.firewall_policy_name = name.clone();
        request.firewall_policy = body;

        match self.api.create_firewall_policy(&request).await {
            Ok(created) => {
                let arn = created.firewall_policy_response.firewall_policy_arn;
                log::info!("Created firewall policy {}", arn);
                Ok(PolicyOutcome {
                    firewall_policy_name: name,
                    firewall_policy_arn: arn,
                    created: true,
                    pruned: Vec::new(),
                })
            }
            Err(e) => Err(rollback.roll_back(self.api, e.into()).await),
        }
    }

    /// Rule group ARNs attached to the live policy before this run.
    async fn attached_rule_groups(&self, name: &str) -> Vec<String> {
        match self.api.describe_firewall_policy(name).await {
            Ok(Some(live)) => live
                .firewall_policy
                .map(|policy| policy.rule_group_arns())
                .unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("Unable to list rule groups attached to {}: {}", name, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::InMemoryFirewallApi;
    use crate::api::{
        ApiError, CreateFirewallPolicyRequest, CreateRuleGroupRequest, RuleGroupType,
        StatelessRuleGroupReference, Tag,
    };
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    const STACK_ID: &str = "stack/nfw/4e4e1a10-0a1ed2d8c2a1";

    fn options() -> ReconcileOptions {
        ReconcileOptions {
            poll_interval: Duration::ZERO,
            settle_delay: Duration::ZERO,
            convergence_timeout: None,
        }
    }

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn write_group(dir: &Path, name: &str, version: u32) {
        write(
            dir,
            &format!("rg/{}.json", name),
            &format!(
                r#"{{"RuleGroupName": "{}", "Type": "STATELESS", "Capacity": 10, "RuleGroup": {{"version": {}}}}}"#,
                name, version
            ),
        );
    }

    fn write_policy(dir: &Path, groups: &[&str]) {
        let references: Vec<_> = groups
            .iter()
            .enumerate()
            .map(|(i, g)| json!({ "ResourceArn": format!("rg/{}.json", g), "Priority": i + 1 }))
            .collect();
        let policy = json!({
            "FirewallPolicyName": "pol",
            "FirewallPolicy": {
                "StatelessDefaultActions": ["aws:forward_to_sfe"],
                "StatelessFragmentDefaultActions": ["aws:forward_to_sfe"],
                "StatelessRuleGroupReferences": references
            },
            "Description": "desired",
            "Tags": [{ "Key": "team", "Value": "net" }]
        });
        write(dir, "policy.json", &policy.to_string());
    }

    fn seed_group(api: &InMemoryFirewallApi, name: &str) -> String {
        api.seed_rule_group(&CreateRuleGroupRequest {
            rule_group_name: name.into(),
            rule_group_type: Some(RuleGroupType::Stateless),
            rule_group: Some(json!({ "version": 1 })),
            ..CreateRuleGroupRequest::default()
        })
    }

    fn seed_policy(api: &InMemoryFirewallApi, groups: &[&str], tags: Vec<Tag>) -> String {
        api.seed_policy(&CreateFirewallPolicyRequest {
            firewall_policy_name: "pol-0a1ed2d8c2a1".into(),
            firewall_policy: FirewallPolicy {
                stateless_rule_group_references: groups
                    .iter()
                    .enumerate()
                    .map(|(i, arn)| StatelessRuleGroupReference {
                        resource_arn: arn.to_string(),
                        priority: i as i32 + 1,
                    })
                    .collect(),
                ..FirewallPolicy::default()
            },
            tags,
            ..CreateFirewallPolicyRequest::default()
        })
    }

    #[tokio::test]
    async fn test_creates_policy_with_unique_name() {
        let temp = TempDir::new().unwrap();
        write_group(temp.path(), "a", 1);
        write_policy(temp.path(), &["a"]);

        let api = InMemoryFirewallApi::new();
        let reader = ConfigReader::new(temp.path());
        let options = options();
        let outcome = PolicyReconciler::new(&api, &reader, STACK_ID, &options)
            .reconcile("policy.json")
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.firewall_policy_name, "pol-0a1ed2d8c2a1");
        let live = api.policy("pol-0a1ed2d8c2a1").unwrap();
        assert_eq!(live.firewall_policy_response.firewall_policy_arn, outcome.firewall_policy_arn);
        let body = live.firewall_policy.unwrap();
        assert!(body.stateless_rule_group_references[0]
            .resource_arn
            .ends_with("stateless-rulegroup/a"));
        assert_eq!(body.settings["StatelessDefaultActions"], json!(["aws:forward_to_sfe"]));
    }

    #[tokio::test]
    async fn test_update_prunes_detached_groups() {
        let temp = TempDir::new().unwrap();
        write_group(temp.path(), "kept", 2);
        write_group(temp.path(), "fresh", 1);
        write_policy(temp.path(), &["kept", "fresh"]);

        let api = InMemoryFirewallApi::new();
        let kept = seed_group(&api, "kept");
        let old = seed_group(&api, "old");
        seed_policy(&api, &[&kept, &old], vec![Tag::new("team", "net")]);

        let reader = ConfigReader::new(temp.path());
        let options = options();
        let outcome = PolicyReconciler::new(&api, &reader, STACK_ID, &options)
            .reconcile("policy.json")
            .await
            .unwrap();

        assert!(!outcome.created);
        assert_eq!(outcome.pruned, vec![old.clone()]);
        assert!(api.rule_group(&old).is_none());
        assert_eq!(api.rule_group(&kept).unwrap().rule_group, Some(json!({ "version": 2 })));
        assert_eq!(
            api.policy("pol-0a1ed2d8c2a1")
                .unwrap()
                .firewall_policy_response
                .description
                .as_deref(),
            Some("desired")
        );
        // tags already match
        assert_eq!(api.call_count("TagResource"), 0);
    }

    #[tokio::test]
    async fn test_missing_tags_are_applied() {
        let temp = TempDir::new().unwrap();
        write_group(temp.path(), "a", 1);
        write_policy(temp.path(), &["a"]);

        let api = InMemoryFirewallApi::new();
        let policy_arn = seed_policy(&api, &[], Vec::new());
        let reader = ConfigReader::new(temp.path());
        let options = options();
        PolicyReconciler::new(&api, &reader, STACK_ID, &options)
            .reconcile("policy.json")
            .await
            .unwrap();

        assert_eq!(api.targets("TagResource"), vec![policy_arn]);
        assert_eq!(
            api.policy("pol-0a1ed2d8c2a1").unwrap().firewall_policy_response.tags,
            vec![Tag::new("team", "net")]
        );
    }

    #[tokio::test]
    async fn test_policy_failure_restores_rule_groups() {
        let temp = TempDir::new().unwrap();
        write_group(temp.path(), "a", 2);
        write_policy(temp.path(), &["a"]);

        let api = InMemoryFirewallApi::new();
        let a = seed_group(&api, "a");
        seed_policy(&api, &[&a], Vec::new());
        api.fail_on(
            "UpdateFirewallPolicy",
            None,
            ApiError::Service {
                code: "InvalidRequestException".into(),
                message: "bad policy".into(),
            },
        );

        let reader = ConfigReader::new(temp.path());
        let options = options();
        let err = PolicyReconciler::new(&api, &reader, STACK_ID, &options)
            .reconcile("policy.json")
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::RolledBack { .. }));
        assert_eq!(api.rule_group(&a).unwrap().rule_group, Some(json!({ "version": 1 })));
        assert_eq!(api.call_count("DeleteRuleGroup"), 0);
    }
}
