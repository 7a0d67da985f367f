//! Declarative configuration documents.
//!
//! Fields that hold remote ARNs at runtime (`FirewallPolicyArn`,
//! `ResourceArn`) hold file references in the documents on disk and are
//! rewritten as reconciliation resolves them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{
    CreateFirewallPolicyRequest, CreateRuleGroupRequest, FirewallPolicy, RuleGroupType,
    SubnetMapping, Tag,
};
use crate::error::ConfigError;

/// A firewall file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FirewallSpec {
    #[serde(default)]
    pub firewall_name: String,
    /// Policy file reference before resolution, policy ARN after.
    #[serde(default)]
    pub firewall_policy_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnet_mappings: Vec<SubnetMapping>,
    #[serde(default)]
    pub delete_protection: bool,
    #[serde(default)]
    pub firewall_policy_change_protection: bool,
    #[serde(default)]
    pub subnet_change_protection: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

impl FirewallSpec {
    /// Both the name and the policy reference must be present.
    pub fn has_required_fields(&self) -> bool {
        !self.firewall_name.trim().is_empty() && !self.firewall_policy_arn.trim().is_empty()
    }
}

/// A firewall policy file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicySpec {
    #[serde(default)]
    pub firewall_policy_name: String,
    pub firewall_policy: FirewallPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

impl PolicySpec {
    pub fn create_request(&self, dry_run: bool) -> CreateFirewallPolicyRequest {
        CreateFirewallPolicyRequest {
            firewall_policy_name: self.firewall_policy_name.clone(),
            firewall_policy: self.firewall_policy.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            dry_run,
        }
    }
}

/// A rule group file exactly as written on disk.
///
/// `RuleGroup` and `Rules` are both optional here so that conflicts can be
/// reported per file; [`RuleGroupSpec`] is the validated form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleGroupDocument {
    #[serde(default)]
    pub rule_group_name: String,
    #[serde(rename = "Type", default)]
    pub rule_group_type: Option<RuleGroupType>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub rule_group: Option<Value>,
    /// Reference to a file holding the rule text.
    #[serde(default)]
    pub rules: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl RuleGroupDocument {
    /// Dry-run create request. `rules` is the rule text, already read.
    pub fn dry_run_request(&self, rules: Option<String>) -> CreateRuleGroupRequest {
        CreateRuleGroupRequest {
            rule_group_name: self.rule_group_name.clone(),
            rule_group_type: self.rule_group_type,
            capacity: self.capacity,
            rule_group: self.rule_group.clone(),
            rules,
            description: self.description.clone(),
            tags: self.tags.clone(),
            dry_run: true,
        }
    }
}

/// What a rule group is made of.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleGroupContent {
    /// A structured rule group body, sent as `RuleGroup`.
    Structured(Value),
    /// A reference to a rule text file, sent as `Rules` once read.
    RulesFile(String),
}

/// A validated rule group file.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleGroupSpec {
    pub rule_group_name: String,
    pub rule_group_type: RuleGroupType,
    pub capacity: Option<u32>,
    pub content: RuleGroupContent,
    pub description: Option<String>,
    pub tags: Vec<Tag>,
}

impl TryFrom<RuleGroupDocument> for RuleGroupSpec {
    type Error = ConfigError;

    fn try_from(doc: RuleGroupDocument) -> Result<Self, Self::Error> {
        let invalid = |reason: &str| ConfigError::InvalidRuleGroup {
            name: doc.rule_group_name.clone(),
            reason: reason.to_string(),
        };

        if doc.rule_group_name.trim().is_empty() {
            return Err(invalid("RuleGroupName is required"));
        }
        let rule_group_type = doc.rule_group_type.ok_or_else(|| invalid("Type is required"))?;

        let content = match (doc.rule_group.clone(), doc.rules.clone()) {
            (Some(body), None) => RuleGroupContent::Structured(body),
            (None, Some(rules)) => RuleGroupContent::RulesFile(rules),
            (Some(_), Some(_)) => {
                return Err(invalid("RuleGroup and Rules are mutually exclusive"));
            }
            (None, None) => return Err(invalid("either RuleGroup or Rules is required")),
        };

        Ok(Self {
            rule_group_name: doc.rule_group_name,
            rule_group_type,
            capacity: doc.capacity,
            content,
            description: doc.description,
            tags: doc.tags,
        })
    }
}

impl RuleGroupSpec {
    /// Create request. `rules` is the rule text for [`RuleGroupContent::RulesFile`].
    pub fn create_request(&self, rules: Option<String>) -> CreateRuleGroupRequest {
        let (rule_group, rules) = match &self.content {
            RuleGroupContent::Structured(body) => (Some(body.clone()), None),
            RuleGroupContent::RulesFile(_) => (None, rules),
        };
        CreateRuleGroupRequest {
            rule_group_name: self.rule_group_name.clone(),
            rule_group_type: Some(self.rule_group_type),
            capacity: self.capacity,
            rule_group,
            rules,
            description: self.description.clone(),
            tags: self.tags.clone(),
            dry_run: false,
        }
    }
}
