//! Seams to the remote firewall appliance and networking services.
//!
//! The reconcilers only talk to these traits. Two implementations ship with
//! the crate:
//! - [`http`]: JSON-protocol clients for real endpoints
//! - [`memory`]: an in-process backend used for simulation and tests

pub mod error;
pub mod http;
pub mod memory;
pub mod types;

use async_trait::async_trait;

pub use error::{ApiError, Result};
pub use types::*;

/// Operations on firewalls, firewall policies and rule groups.
///
/// Describe calls translate "not found" into `Ok(None)`; every other remote
/// error is returned unchanged so callers can branch on its class.
#[async_trait]
pub trait FirewallApi: Send + Sync {
    async fn describe_firewall(&self, firewall_name: &str)
        -> Result<Option<DescribeFirewallResponse>>;

    async fn create_firewall(&self, request: &CreateFirewallRequest)
        -> Result<DescribeFirewallResponse>;

    async fn update_firewall_delete_protection(
        &self,
        firewall_name: &str,
        delete_protection: bool,
    ) -> Result<()>;

    async fn update_firewall_policy_change_protection(
        &self,
        firewall_name: &str,
        change_protection: bool,
    ) -> Result<()>;

    async fn update_subnet_change_protection(
        &self,
        firewall_name: &str,
        change_protection: bool,
    ) -> Result<()>;

    async fn update_firewall_description(
        &self,
        firewall_name: &str,
        description: Option<&str>,
    ) -> Result<()>;

    async fn associate_firewall_policy(
        &self,
        firewall_name: &str,
        firewall_policy_arn: &str,
    ) -> Result<()>;

    async fn tag_resource(&self, resource_arn: &str, tags: &[Tag]) -> Result<()>;

    async fn describe_firewall_policy(
        &self,
        firewall_policy_name: &str,
    ) -> Result<Option<DescribeFirewallPolicyResponse>>;

    async fn create_firewall_policy(
        &self,
        request: &CreateFirewallPolicyRequest,
    ) -> Result<FirewallPolicyMutationResponse>;

    async fn update_firewall_policy(
        &self,
        request: &UpdateFirewallPolicyRequest,
    ) -> Result<FirewallPolicyMutationResponse>;

    async fn describe_rule_group(
        &self,
        rule_group_name: &str,
        rule_group_type: RuleGroupType,
    ) -> Result<Option<DescribeRuleGroupResponse>>;

    async fn describe_rule_group_by_arn(
        &self,
        rule_group_arn: &str,
    ) -> Result<Option<DescribeRuleGroupResponse>>;

    async fn create_rule_group(
        &self,
        request: &CreateRuleGroupRequest,
    ) -> Result<RuleGroupMutationResponse>;

    async fn update_rule_group(
        &self,
        request: &UpdateRuleGroupRequest,
    ) -> Result<RuleGroupMutationResponse>;

    async fn delete_rule_group(&self, rule_group_arn: &str) -> Result<()>;

    async fn describe_logging_configuration(
        &self,
        firewall_name: &str,
    ) -> Result<LoggingConfiguration>;

    /// Replaces the logging configuration. The service accepts at most one
    /// destination added or removed per call.
    async fn update_logging_configuration(
        &self,
        firewall_name: &str,
        configuration: &LoggingConfiguration,
    ) -> Result<LoggingConfiguration>;
}

/// Operations on route tables and transit attachments.
#[async_trait]
pub trait NetworkApi: Send + Sync {
    /// Returns one page of route tables matching the id.
    async fn describe_route_tables(
        &self,
        route_table_id: &str,
        next_token: Option<&str>,
    ) -> Result<DescribeRouteTablesPage>;

    async fn create_route(&self, request: &CreateRouteRequest) -> Result<()>;

    async fn delete_route(&self, request: &DeleteRouteRequest) -> Result<()>;

    async fn modify_appliance_mode(
        &self,
        transit_gateway_attachment_id: &str,
        appliance_mode: &str,
    ) -> Result<()>;
}

/// Maps a not-found error to `None`.
pub(crate) fn found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
