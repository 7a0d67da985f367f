//! JSON-protocol HTTP clients for the remote services.
//!
//! Requests are `POST`ed to the configured endpoint with an `X-Amz-Target`
//! header naming the operation and a JSON body in the service's native
//! shape. Requests are unsigned, so the endpoint must be a signing proxy or
//! a local emulator. These clients only handle transport, error
//! classification and bounded retries of throttled or transient failures.
//! [`HttpNetworkApi`] additionally needs a JSON-speaking front end, since the
//! real networking service only accepts the Query protocol.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::{ApiError, Result};
use super::types::*;
use super::{found, FirewallApi, NetworkApi};

const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const FIREWALL_TARGET_PREFIX: &str = "NetworkFirewall_20201112";
const NETWORK_TARGET_PREFIX: &str = "AmazonEC2";

/// Default connect timeout for HTTP requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default request timeout for HTTP requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Bounded exponential backoff for throttled and transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled on every further retry.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Error body returned by JSON-protocol services.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", alias = "Code", alias = "code")]
    error_type: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

fn parse_error(status: reqwest::StatusCode, body: &str) -> ApiError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|b| b.message.clone())
        .unwrap_or_else(|| body.trim().to_string());

    match parsed.and_then(|b| b.error_type) {
        Some(code) => ApiError::classify(&code, &message),
        None if status == reqwest::StatusCode::TOO_MANY_REQUESTS => ApiError::Throttled(message),
        None if status.is_server_error() => ApiError::Service {
            code: "ServiceUnavailable".to_string(),
            message,
        },
        None => ApiError::Service {
            code: format!("HTTP{}", status.as_u16()),
            message,
        },
    }
}

/// Shared transport for one JSON-protocol service endpoint.
#[derive(Clone)]
pub struct JsonTransport {
    client: Client,
    endpoint: String,
    target_prefix: &'static str,
    retry: RetryPolicy,
}

impl JsonTransport {
    /// Creates a transport with default timeouts.
    pub fn new(
        endpoint: impl Into<String>,
        target_prefix: &'static str,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            target_prefix,
            retry,
        })
    }

    /// Calls `operation`, retrying retryable failures with exponential backoff.
    pub async fn call<I, O>(&self, operation: &str, input: &I) -> Result<O>
    where
        I: Serialize + ?Sized + Sync,
        O: DeserializeOwned,
    {
        let mut last_error = None;

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt);
                log::info!(
                    "Retrying {} (attempt {}/{}) after {:?}",
                    operation,
                    attempt + 1,
                    self.retry.max_retries + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            match self.send(operation, input).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    if e.is_retryable() && attempt < self.retry.max_retries {
                        log::warn!("{} failed with retryable error: {}", operation, e);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ApiError::Transport(format!("{} failed after all retries", operation))
        }))
    }

    async fn send<I, O>(&self, operation: &str, input: &I) -> Result<O>
    where
        I: Serialize + ?Sized + Sync,
        O: DeserializeOwned,
    {
        log::debug!("Calling {}.{}", self.target_prefix, operation);

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Amz-Target", format!("{}.{}", self.target_prefix, operation))
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .json(input)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(parse_error(status, &body));
        }

        let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
        serde_json::from_str(body).map_err(|e| ApiError::Decode {
            operation: operation.to_string(),
            message: e.to_string(),
        })
    }

    /// Calls an operation whose response carries nothing the caller needs.
    pub async fn call_unit<I>(&self, operation: &str, input: &I) -> Result<()>
    where
        I: Serialize + ?Sized + Sync,
    {
        let _: serde_json::Value = self.call(operation, input).await?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LoggingConfigurationEnvelope {
    #[serde(default)]
    logging_configuration: Option<LoggingConfiguration>,
}

/// HTTP client for the firewall appliance API.
#[derive(Clone)]
pub struct HttpFirewallApi {
    transport: JsonTransport,
}

impl HttpFirewallApi {
    pub fn new(endpoint: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            transport: JsonTransport::new(endpoint, FIREWALL_TARGET_PREFIX, retry)?,
        })
    }
}

#[async_trait]
impl FirewallApi for HttpFirewallApi {
    async fn describe_firewall(
        &self,
        firewall_name: &str,
    ) -> Result<Option<DescribeFirewallResponse>> {
        found(
            self.transport
                .call("DescribeFirewall", &json!({ "FirewallName": firewall_name }))
                .await,
        )
    }

    async fn create_firewall(
        &self,
        request: &CreateFirewallRequest,
    ) -> Result<DescribeFirewallResponse> {
        self.transport.call("CreateFirewall", request).await
    }

    async fn update_firewall_delete_protection(
        &self,
        firewall_name: &str,
        delete_protection: bool,
    ) -> Result<()> {
        self.transport
            .call_unit(
                "UpdateFirewallDeleteProtection",
                &json!({ "FirewallName": firewall_name, "DeleteProtection": delete_protection }),
            )
            .await
    }

    async fn update_firewall_policy_change_protection(
        &self,
        firewall_name: &str,
        change_protection: bool,
    ) -> Result<()> {
        self.transport
            .call_unit(
                "UpdateFirewallPolicyChangeProtection",
                &json!({
                    "FirewallName": firewall_name,
                    "FirewallPolicyChangeProtection": change_protection
                }),
            )
            .await
    }

    async fn update_subnet_change_protection(
        &self,
        firewall_name: &str,
        change_protection: bool,
    ) -> Result<()> {
        self.transport
            .call_unit(
                "UpdateSubnetChangeProtection",
                &json!({
                    "FirewallName": firewall_name,
                    "SubnetChangeProtection": change_protection
                }),
            )
            .await
    }

    async fn update_firewall_description(
        &self,
        firewall_name: &str,
        description: Option<&str>,
    ) -> Result<()> {
        self.transport
            .call_unit(
                "UpdateFirewallDescription",
                &json!({ "FirewallName": firewall_name, "Description": description }),
            )
            .await
    }

    async fn associate_firewall_policy(
        &self,
        firewall_name: &str,
        firewall_policy_arn: &str,
    ) -> Result<()> {
        self.transport
            .call_unit(
                "AssociateFirewallPolicy",
                &json!({ "FirewallName": firewall_name, "FirewallPolicyArn": firewall_policy_arn }),
            )
            .await
    }

    async fn tag_resource(&self, resource_arn: &str, tags: &[Tag]) -> Result<()> {
        self.transport
            .call_unit(
                "TagResource",
                &json!({ "ResourceArn": resource_arn, "Tags": tags }),
            )
            .await
    }

    async fn describe_firewall_policy(
        &self,
        firewall_policy_name: &str,
    ) -> Result<Option<DescribeFirewallPolicyResponse>> {
        found(
            self.transport
                .call(
                    "DescribeFirewallPolicy",
                    &json!({ "FirewallPolicyName": firewall_policy_name }),
                )
                .await,
        )
    }

    async fn create_firewall_policy(
        &self,
        request: &CreateFirewallPolicyRequest,
    ) -> Result<FirewallPolicyMutationResponse> {
        self.transport.call("CreateFirewallPolicy", request).await
    }

    async fn update_firewall_policy(
        &self,
        request: &UpdateFirewallPolicyRequest,
    ) -> Result<FirewallPolicyMutationResponse> {
        self.transport.call("UpdateFirewallPolicy", request).await
    }

    async fn describe_rule_group(
        &self,
        rule_group_name: &str,
        rule_group_type: RuleGroupType,
    ) -> Result<Option<DescribeRuleGroupResponse>> {
        found(
            self.transport
                .call(
                    "DescribeRuleGroup",
                    &json!({ "RuleGroupName": rule_group_name, "Type": rule_group_type }),
                )
                .await,
        )
    }

    async fn describe_rule_group_by_arn(
        &self,
        rule_group_arn: &str,
    ) -> Result<Option<DescribeRuleGroupResponse>> {
        found(
            self.transport
                .call("DescribeRuleGroup", &json!({ "RuleGroupArn": rule_group_arn }))
                .await,
        )
    }

    async fn create_rule_group(
        &self,
        request: &CreateRuleGroupRequest,
    ) -> Result<RuleGroupMutationResponse> {
        self.transport.call("CreateRuleGroup", request).await
    }

    async fn update_rule_group(
        &self,
        request: &UpdateRuleGroupRequest,
    ) -> Result<RuleGroupMutationResponse> {
        self.transport.call("UpdateRuleGroup", request).await
    }

    async fn delete_rule_group(&self, rule_group_arn: &str) -> Result<()> {
        self.transport
            .call_unit("DeleteRuleGroup", &json!({ "RuleGroupArn": rule_group_arn }))
            .await
    }

    async fn describe_logging_configuration(
        &self,
        firewall_name: &str,
    ) -> Result<LoggingConfiguration> {
        let envelope: LoggingConfigurationEnvelope = self
            .transport
            .call(
                "DescribeLoggingConfiguration",
                &json!({ "FirewallName": firewall_name }),
            )
            .await?;
        Ok(envelope.logging_configuration.unwrap_or_default())
    }

    async fn update_logging_configuration(
        &self,
        firewall_name: &str,
        configuration: &LoggingConfiguration,
    ) -> Result<LoggingConfiguration> {
        let envelope: LoggingConfigurationEnvelope = self
            .transport
            .call(
                "UpdateLoggingConfiguration",
                &json!({ "FirewallName": firewall_name, "LoggingConfiguration": configuration }),
            )
            .await?;
        Ok(envelope.logging_configuration.unwrap_or_default())
    }
}

/// HTTP client for a JSON rendition of the networking API.
///
/// Requests are JSON bodies with an `X-Amz-Target` header and are not
/// signed. EC2 itself only accepts the signed Query protocol, so this client
/// needs a gateway or emulator that speaks JSON in front of it. It does not
/// reach EC2 directly, not even through a signing proxy.
#[derive(Clone)]
pub struct HttpNetworkApi {
    transport: JsonTransport,
}

impl HttpNetworkApi {
    pub fn new(endpoint: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            transport: JsonTransport::new(endpoint, NETWORK_TARGET_PREFIX, retry)?,
        })
    }
}

#[async_trait]
impl NetworkApi for HttpNetworkApi {
    async fn describe_route_tables(
        &self,
        route_table_id: &str,
        next_token: Option<&str>,
    ) -> Result<DescribeRouteTablesPage> {
        self.transport
            .call(
                "DescribeRouteTables",
                &json!({ "RouteTableIds": [route_table_id], "NextToken": next_token }),
            )
            .await
    }

    async fn create_route(&self, request: &CreateRouteRequest) -> Result<()> {
        self.transport.call_unit("CreateRoute", request).await
    }

    async fn delete_route(&self, request: &DeleteRouteRequest) -> Result<()> {
        self.transport.call_unit("DeleteRoute", request).await
    }

    async fn modify_appliance_mode(
        &self,
        transit_gateway_attachment_id: &str,
        appliance_mode: &str,
    ) -> Result<()> {
        self.transport
            .call_unit(
                "ModifyTransitGatewayVpcAttachment",
                &json!({
                    "TransitGatewayAttachmentId": transit_gateway_attachment_id,
                    "Options": { "ApplianceModeSupport": appliance_mode }
                }),
            )
            .await
    }
}
