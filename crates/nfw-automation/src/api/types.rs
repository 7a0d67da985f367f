//! Request and response shapes for the remote firewall and networking APIs.
//!
//! Field names follow the remote JSON protocol (`PascalCase`), which is also
//! the format of the declarative configuration files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Overall firewall status once provisioning has finished.
pub const FIREWALL_READY: &str = "READY";
/// Configuration sync summary once every zone runs the latest policy.
pub const CONFIG_IN_SYNC: &str = "IN_SYNC";
/// Attachment status once a zone's endpoint can carry traffic.
pub const ATTACHMENT_READY: &str = "READY";

// ============================================================================
// Shared
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubnetMapping {
    pub subnet_id: String,
}

/// The two families of rule groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleGroupType {
    Stateless,
    Stateful,
}

impl std::fmt::Display for RuleGroupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleGroupType::Stateless => write!(f, "STATELESS"),
            RuleGroupType::Stateful => write!(f, "STATEFUL"),
        }
    }
}

// ============================================================================
// Rule groups
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleGroupResponse {
    pub rule_group_arn: String,
    pub rule_group_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_group_id: Option<String>,
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub rule_group_type: Option<RuleGroupType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

/// Full descriptor of a live rule group, including its update token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeRuleGroupResponse {
    pub update_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_group: Option<serde_json::Value>,
    pub rule_group_response: RuleGroupResponse,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRuleGroupRequest {
    pub rule_group_name: String,
    #[serde(rename = "Type")]
    pub rule_group_type: Option<RuleGroupType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_group: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateRuleGroupRequest {
    pub update_token: String,
    pub rule_group_arn: String,
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub rule_group_type: Option<RuleGroupType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_group: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl UpdateRuleGroupRequest {
    /// Builds the request that restores a previously described rule group.
    pub fn restore(snapshot: &DescribeRuleGroupResponse) -> Self {
        Self {
            update_token: snapshot.update_token.clone(),
            rule_group_arn: snapshot.rule_group_response.rule_group_arn.clone(),
            rule_group_type: snapshot.rule_group_response.rule_group_type,
            rule_group: snapshot.rule_group.clone(),
            rules: None,
            description: snapshot.rule_group_response.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleGroupMutationResponse {
    pub update_token: String,
    pub rule_group_response: RuleGroupResponse,
}

// ============================================================================
// Firewall policies
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatelessRuleGroupReference {
    pub resource_arn: String,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatefulRuleGroupReference {
    pub resource_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// Policy body. Rule group references are typed; every other setting
/// (default actions, engine options, custom actions) is carried verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FirewallPolicy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stateless_rule_group_references: Vec<StatelessRuleGroupReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stateful_rule_group_references: Vec<StatefulRuleGroupReference>,
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl FirewallPolicy {
    /// Every rule group ARN referenced by the policy, stateful first.
    pub fn rule_group_arns(&self) -> Vec<String> {
        self.stateful_rule_group_references
            .iter()
            .map(|r| r.resource_arn.clone())
            .chain(
                self.stateless_rule_group_references
                    .iter()
                    .map(|r| r.resource_arn.clone()),
            )
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FirewallPolicyResponse {
    pub firewall_policy_name: String,
    pub firewall_policy_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall_policy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeFirewallPolicyResponse {
    pub update_token: String,
    pub firewall_policy_response: FirewallPolicyResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall_policy: Option<FirewallPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateFirewallPolicyRequest {
    pub firewall_policy_name: String,
    pub firewall_policy: FirewallPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateFirewallPolicyRequest {
    pub update_token: String,
    pub firewall_policy_arn: String,
    pub firewall_policy_name: String,
    pub firewall_policy: FirewallPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FirewallPolicyMutationResponse {
    pub update_token: String,
    pub firewall_policy_response: FirewallPolicyResponse,
}

// ============================================================================
// Firewalls
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Firewall {
    pub firewall_name: String,
    #[serde(default)]
    pub firewall_arn: String,
    pub firewall_policy_arn: String,
    pub vpc_id: String,
    #[serde(default)]
    pub subnet_mappings: Vec<SubnetMapping>,
    #[serde(default)]
    pub delete_protection: bool,
    #[serde(default)]
    pub subnet_change_protection: bool,
    #[serde(default)]
    pub firewall_policy_change_protection: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PerObjectStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_token: Option<String>,
}

/// Per availability zone propagation state of a firewall.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, PerObjectStatus>,
}

/// Sync states keyed by availability zone.
pub type SyncStates = BTreeMap<String, SyncState>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FirewallStatus {
    pub status: String,
    #[serde(default)]
    pub configuration_sync_state_summary: String,
    #[serde(default)]
    pub sync_states: SyncStates,
}

impl FirewallStatus {
    /// True when the firewall, its configuration and every zone attachment are ready.
    pub fn is_converged(&self) -> bool {
        self.status == FIREWALL_READY
            && self.configuration_sync_state_summary == CONFIG_IN_SYNC
            && self.sync_states.values().all(|state| {
                state
                    .attachment
                    .as_ref()
                    .map_or(true, |a| a.status.as_deref() == Some(ATTACHMENT_READY))
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeFirewallResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall: Option<Firewall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall_status: Option<FirewallStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateFirewallRequest {
    pub firewall_name: String,
    pub firewall_policy_arn: String,
    pub vpc_id: String,
    pub subnet_mappings: Vec<SubnetMapping>,
    pub delete_protection: bool,
    pub subnet_change_protection: bool,
    pub firewall_policy_change_protection: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

// ============================================================================
// Logging configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogType {
    Alert,
    Flow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogDestinationType {
    S3,
    CloudWatchLogs,
    KinesisDataFirehose,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogDestinationConfig {
    pub log_type: LogType,
    pub log_destination_type: LogDestinationType,
    pub log_destination: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoggingConfiguration {
    #[serde(default)]
    pub log_destination_configs: Vec<LogDestinationConfig>,
}

// ============================================================================
// Networking
// ============================================================================

/// Destination of the default route.
pub const DEFAULT_ROUTE: &str = "0.0.0.0/0";
/// State of a route that carries traffic.
pub const ROUTE_ACTIVE: &str = "active";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Route {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_cidr_block: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transit_gateway_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl Route {
    /// True for an active route to `0.0.0.0/0`.
    pub fn is_active_default(&self) -> bool {
        self.destination_cidr_block.as_deref() == Some(DEFAULT_ROUTE)
            && self.state.as_deref() == Some(ROUTE_ACTIVE)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteTable {
    pub route_table_id: String,
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeRouteTablesPage {
    #[serde(default)]
    pub route_tables: Vec<RouteTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRouteRequest {
    pub destination_cidr_block: String,
    pub vpc_endpoint_id: String,
    pub route_table_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteRouteRequest {
    pub destination_cidr_block: String,
    pub route_table_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_keeps_unknown_settings() {
        let json = r#"{
            "StatelessDefaultActions": ["aws:forward_to_sfe"],
            "StatelessRuleGroupReferences": [{"ResourceArn": "a.json", "Priority": 10}],
            "StatefulRuleGroupReferences": [{"ResourceArn": "b.json"}]
        }"#;
        let policy: FirewallPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.stateless_rule_group_references[0].priority, 10);
        assert!(policy.settings.contains_key("StatelessDefaultActions"));

        let round = serde_json::to_value(&policy).unwrap();
        assert_eq!(round["StatelessDefaultActions"][0], "aws:forward_to_sfe");
        assert_eq!(policy.rule_group_arns(), vec!["b.json", "a.json"]);
    }

    #[test]
    fn test_convergence_requires_every_attachment_ready() {
        let mut status = FirewallStatus {
            status: FIREWALL_READY.to_string(),
            configuration_sync_state_summary: CONFIG_IN_SYNC.to_string(),
            sync_states: SyncStates::new(),
        };
        status.sync_states.insert(
            "us-east-1a".to_string(),
            SyncState {
                attachment: Some(Attachment {
                    subnet_id: None,
                    endpoint_id: Some("vpce-1".to_string()),
                    status: Some("CREATING".to_string()),
                }),
                config: BTreeMap::new(),
            },
        );
        assert!(!status.is_converged());

        if let Some(attachment) = status
            .sync_states
            .get_mut("us-east-1a")
            .and_then(|s| s.attachment.as_mut())
        {
            attachment.status = Some(ATTACHMENT_READY.to_string());
        }
        assert!(status.is_converged());
    }

    #[test]
    fn test_log_destination_serialization() {
        let config = LogDestinationConfig {
            log_type: LogType::Alert,
            log_destination_type: LogDestinationType::CloudWatchLogs,
            log_destination: BTreeMap::from([("logGroup".to_string(), "fw".to_string())]),
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["LogType"], "ALERT");
        assert_eq!(value["LogDestinationType"], "CloudWatchLogs");
        assert_eq!(value["LogDestination"]["logGroup"], "fw");
    }
}
