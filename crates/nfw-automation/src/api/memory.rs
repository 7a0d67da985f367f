//! In-process implementations of the remote APIs.
//!
//! They keep the same contracts as the real services that matter to the
//! reconcilers: update tokens rotate on every mutation and stale tokens are
//! rejected, describes report absence, logging configuration changes are
//! limited to one destination per call, and firewalls take a configurable
//! number of polls to converge. Every call is recorded and failures can be
//! injected per operation and target.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::error::{ApiError, Result};
use super::types::*;
use super::{FirewallApi, NetworkApi};

const ARN_PREFIX: &str = "arn:aws:network-firewall:us-east-1:000000000000";

/// A recorded API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCall {
    pub operation: &'static str,
    pub target: String,
}

#[derive(Debug)]
struct InjectedFailure {
    operation: &'static str,
    target: Option<String>,
    error: ApiError,
}

/// Call log plus one-shot failure plan shared by both backends.
#[derive(Debug, Default)]
struct Recorder {
    calls: Vec<ApiCall>,
    failures: Vec<InjectedFailure>,
}

impl Recorder {
    /// Records the call and returns the first matching injected failure.
    fn record(&mut self, operation: &'static str, target: &str) -> Result<()> {
        self.calls.push(ApiCall {
            operation,
            target: target.to_string(),
        });

        let position = self.failures.iter().position(|f| {
            f.operation == operation && f.target.as_deref().map_or(true, |t| t == target)
        });
        match position {
            Some(index) => Err(self.failures.remove(index).error),
            None => Ok(()),
        }
    }

    fn inject(&mut self, operation: &'static str, target: Option<String>, error: ApiError) {
        self.failures.push(InjectedFailure {
            operation,
            target,
            error,
        });
    }

    fn count(&self, operation: &str) -> usize {
        self.calls.iter().filter(|c| c.operation == operation).count()
    }
}

fn service_error(code: &str, message: impl Into<String>) -> ApiError {
    ApiError::Service {
        code: code.to_string(),
        message: message.into(),
    }
}

fn validation_error(message: impl Into<String>) -> ApiError {
    ApiError::Validation {
        code: "MultipleValidationErrors".to_string(),
        message: message.into(),
    }
}

#[derive(Debug)]
struct StoredFirewall {
    firewall: Firewall,
    update_token: String,
    polls_remaining: u32,
    endpoints: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct FirewallState {
    recorder: Recorder,
    rule_groups: BTreeMap<String, DescribeRuleGroupResponse>,
    policies: BTreeMap<String, DescribeFirewallPolicyResponse>,
    firewalls: BTreeMap<String, StoredFirewall>,
    logging: BTreeMap<String, LoggingConfiguration>,
    races: Vec<String>,
    sequence: u64,
    polls_until_ready: u32,
    zones: Vec<String>,
    terse_creates: bool,
}

impl FirewallState {
    fn next_token(&mut self) -> String {
        self.sequence += 1;
        format!("token-{:06}", self.sequence)
    }

    /// Simulates a concurrent writer touching the target before this call.
    fn apply_race(&mut self, target: &str) -> bool {
        match self.races.iter().position(|r| r == target) {
            Some(index) => {
                self.races.remove(index);
                true
            }
            None => false,
        }
    }

    fn rule_group_by_name(
        &self,
        name: &str,
        rule_group_type: RuleGroupType,
    ) -> Option<&DescribeRuleGroupResponse> {
        self.rule_groups.values().find(|rg| {
            rg.rule_group_response.rule_group_name == name
                && rg.rule_group_response.rule_group_type == Some(rule_group_type)
        })
    }

    fn policy_by_arn_mut(&mut self, arn: &str) -> Option<&mut DescribeFirewallPolicyResponse> {
        self.policies
            .values_mut()
            .find(|p| p.firewall_policy_response.firewall_policy_arn == arn)
    }

    fn status_of(&self, stored: &StoredFirewall) -> FirewallStatus {
        let ready = stored.polls_remaining == 0;
        let subnets = &stored.firewall.subnet_mappings;
        let sync_states = stored
            .endpoints
            .iter()
            .enumerate()
            .map(|(i, (zone, endpoint))| {
                let subnet = (!subnets.is_empty()).then(|| subnets[i % subnets.len()].subnet_id.clone());
                let state = SyncState {
                    attachment: Some(Attachment {
                        subnet_id: subnet,
                        endpoint_id: Some(endpoint.clone()),
                        status: Some(if ready { ATTACHMENT_READY } else { "CREATING" }.to_string()),
                    }),
                    config: BTreeMap::from([(
                        stored.firewall.firewall_policy_arn.clone(),
                        PerObjectStatus {
                            sync_status: Some(if ready { "IN_SYNC" } else { "PENDING" }.to_string()),
                            update_token: None,
                        },
                    )]),
                };
                (zone.clone(), state)
            })
            .collect();

        FirewallStatus {
            status: if ready { FIREWALL_READY } else { "PROVISIONING" }.to_string(),
            configuration_sync_state_summary: if ready { CONFIG_IN_SYNC } else { "PENDING" }
                .to_string(),
            sync_states,
        }
    }
}

fn rule_group_arn(name: &str, rule_group_type: Option<RuleGroupType>) -> String {
    let family = match rule_group_type {
        Some(RuleGroupType::Stateless) => "stateless-rulegroup",
        _ => "stateful-rulegroup",
    };
    format!("{}:{}/{}", ARN_PREFIX, family, name)
}

/// Stored body for a rule group defined by rule text.
fn rules_body(rules: &str) -> serde_json::Value {
    serde_json::json!({ "RulesSource": { "RulesString": rules } })
}

/// In-process firewall appliance.
#[derive(Debug)]
pub struct InMemoryFirewallApi {
    state: Mutex<FirewallState>,
}

impl Default for InMemoryFirewallApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFirewallApi {
    /// Creates an empty appliance with one zone and immediate convergence.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FirewallState {
                zones: vec!["us-east-1a".to_string()],
                ..FirewallState::default()
            }),
        }
    }

    /// Availability zones new firewalls attach to.
    pub fn with_zones<I, S>(self, zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().zones = zones.into_iter().map(Into::into).collect();
        self
    }

    /// Number of describe calls a firewall reports as not ready after a change.
    pub fn with_polls_until_ready(self, polls: u32) -> Self {
        self.lock().polls_until_ready = polls;
        self
    }

    /// Firewall create responses leave out the firewall description.
    pub fn with_terse_creates(self) -> Self {
        self.lock().terse_creates = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, FirewallState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next call of `operation` fail. `target` matches the resource
    /// name or ARN the call addresses; `None` matches any target.
    pub fn fail_on(&self, operation: &'static str, target: Option<&str>, error: ApiError) {
        self.lock()
            .recorder
            .inject(operation, target.map(str::to_string), error);
    }

    /// Rotates the token of `target` (name or ARN) right before the next
    /// mutation addressing it, as a concurrent writer would.
    pub fn race_next_update(&self, target: &str) {
        self.lock().races.push(target.to_string());
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().recorder.calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.lock().recorder.count(operation)
    }

    /// Targets of every call to `operation`, in call order.
    pub fn targets(&self, operation: &str) -> Vec<String> {
        self.lock()
            .recorder
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .map(|c| c.target.clone())
            .collect()
    }

    pub fn rule_group(&self, arn: &str) -> Option<DescribeRuleGroupResponse> {
        self.lock().rule_groups.get(arn).cloned()
    }

    pub fn rule_group_arns(&self) -> Vec<String> {
        self.lock().rule_groups.keys().cloned().collect()
    }

    pub fn policy(&self, name: &str) -> Option<DescribeFirewallPolicyResponse> {
        self.lock().policies.get(name).cloned()
    }

    pub fn firewall(&self, name: &str) -> Option<Firewall> {
        self.lock().firewalls.get(name).map(|f| f.firewall.clone())
    }

    pub fn logging(&self, firewall_name: &str) -> LoggingConfiguration {
        self.lock()
            .logging
            .get(firewall_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Seeds an existing rule group without recording a call.
    pub fn seed_rule_group(&self, request: &CreateRuleGroupRequest) -> String {
        let mut state = self.lock();
        let arn = rule_group_arn(&request.rule_group_name, request.rule_group_type);
        let token = state.next_token();
        let body = match (&request.rule_group, &request.rules) {
            (Some(body), _) => Some(body.clone()),
            (None, Some(rules)) => Some(rules_body(rules)),
            (None, None) => None,
        };
        state.rule_groups.insert(
            arn.clone(),
            DescribeRuleGroupResponse {
                update_token: token,
                rule_group: body,
                rule_group_response: RuleGroupResponse {
                    rule_group_arn: arn.clone(),
                    rule_group_name: request.rule_group_name.clone(),
                    rule_group_id: None,
                    rule_group_type: request.rule_group_type,
                    capacity: request.capacity,
                    description: request.description.clone(),
                    tags: request.tags.clone(),
                },
            },
        );
        arn
    }

    /// Seeds an existing policy without recording a call.
    pub fn seed_policy(&self, request: &CreateFirewallPolicyRequest) -> String {
        let mut state = self.lock();
        let arn = format!("{}:firewall-policy/{}", ARN_PREFIX, request.firewall_policy_name);
        let token = state.next_token();
        state.policies.insert(
            request.firewall_policy_name.clone(),
            DescribeFirewallPolicyResponse {
                update_token: token,
                firewall_policy_response: FirewallPolicyResponse {
                    firewall_policy_name: request.firewall_policy_name.clone(),
                    firewall_policy_arn: arn.clone(),
                    firewall_policy_id: None,
                    description: request.description.clone(),
                    tags: request.tags.clone(),
                },
                firewall_policy: Some(request.firewall_policy.clone()),
            },
        );
        arn
    }

    /// Seeds an existing, converged firewall without recording a call.
    pub fn seed_firewall(&self, request: &CreateFirewallRequest) -> String {
        let mut state = self.lock();
        let arn = self::insert_firewall(&mut state, request);
        if let Some(stored) = state.firewalls.get_mut(&request.firewall_name) {
            stored.polls_remaining = 0;
        }
        arn
    }
}

fn insert_firewall(state: &mut FirewallState, request: &CreateFirewallRequest) -> String {
    let arn = format!("{}:firewall/{}", ARN_PREFIX, request.firewall_name);
    let token = state.next_token();
    let generation = state.sequence;
    let endpoints = state
        .zones
        .iter()
        .enumerate()
        .map(|(i, zone)| (zone.clone(), format!("vpce-{:04}{:02}", generation, i)))
        .collect();

    state.firewalls.insert(
        request.firewall_name.clone(),
        StoredFirewall {
            firewall: Firewall {
                firewall_name: request.firewall_name.clone(),
                firewall_arn: arn.clone(),
                firewall_policy_arn: request.firewall_policy_arn.clone(),
                vpc_id: request.vpc_id.clone(),
                subnet_mappings: request.subnet_mappings.clone(),
                delete_protection: request.delete_protection,
                subnet_change_protection: request.subnet_change_protection,
                firewall_policy_change_protection: request.firewall_policy_change_protection,
                description: request.description.clone(),
                tags: request.tags.clone(),
            },
            update_token: token,
            polls_remaining: state.polls_until_ready,
            endpoints,
        },
    );
    arn
}

impl InMemoryFirewallApi {
    fn with_firewall<T>(
        &self,
        operation: &'static str,
        firewall_name: &str,
        apply: impl FnOnce(&mut StoredFirewall) -> T,
    ) -> Result<T> {
        let mut state = self.lock();
        state.recorder.record(operation, firewall_name)?;
        let token = state.next_token();
        let stored = state
            .firewalls
            .get_mut(firewall_name)
            .ok_or_else(|| ApiError::NotFound(format!("Firewall {}", firewall_name)))?;
        stored.update_token = token;
        Ok(apply(stored))
    }
}

#[async_trait]
impl FirewallApi for InMemoryFirewallApi {
    async fn describe_firewall(
        &self,
        firewall_name: &str,
    ) -> Result<Option<DescribeFirewallResponse>> {
        let mut state = self.lock();
        state.recorder.record("DescribeFirewall", firewall_name)?;

        let Some(stored) = state.firewalls.get_mut(firewall_name) else {
            return Ok(None);
        };
        stored.polls_remaining = stored.polls_remaining.saturating_sub(1);

        let stored = &state.firewalls[firewall_name];
        Ok(Some(DescribeFirewallResponse {
            update_token: Some(stored.update_token.clone()),
            firewall: Some(stored.firewall.clone()),
            firewall_status: Some(state.status_of(stored)),
        }))
    }

    async fn create_firewall(
        &self,
        request: &CreateFirewallRequest,
    ) -> Result<DescribeFirewallResponse> {
        let mut state = self.lock();
        state.recorder.record("CreateFirewall", &request.firewall_name)?;

        if state.firewalls.contains_key(&request.firewall_name) {
            return Err(service_error(
                "InvalidRequestException",
                format!("Firewall {} already exists", request.firewall_name),
            ));
        }
        if !state
            .policies
            .values()
            .any(|p| p.firewall_policy_response.firewall_policy_arn == request.firewall_policy_arn)
        {
            return Err(ApiError::NotFound(format!(
                "Firewall policy {}",
                request.firewall_policy_arn
            )));
        }

        insert_firewall(&mut state, request);
        let stored = &state.firewalls[&request.firewall_name];
        Ok(DescribeFirewallResponse {
            update_token: Some(stored.update_token.clone()),
            firewall: (!state.terse_creates).then(|| stored.firewall.clone()),
            firewall_status: Some(state.status_of(stored)),
        })
    }

    async fn update_firewall_delete_protection(
        &self,
        firewall_name: &str,
        delete_protection: bool,
    ) -> Result<()> {
        self.with_firewall("UpdateFirewallDeleteProtection", firewall_name, |f| {
            f.firewall.delete_protection = delete_protection;
        })
    }

    async fn update_firewall_policy_change_protection(
        &self,
        firewall_name: &str,
        change_protection: bool,
    ) -> Result<()> {
        self.with_firewall("UpdateFirewallPolicyChangeProtection", firewall_name, |f| {
            f.firewall.firewall_policy_change_protection = change_protection;
        })
    }

    async fn update_subnet_change_protection(
        &self,
        firewall_name: &str,
        change_protection: bool,
    ) -> Result<()> {
        self.with_firewall("UpdateSubnetChangeProtection", firewall_name, |f| {
            f.firewall.subnet_change_protection = change_protection;
        })
    }

    async fn update_firewall_description(
        &self,
        firewall_name: &str,
        description: Option<&str>,
    ) -> Result<()> {
        self.with_firewall("UpdateFirewallDescription", firewall_name, |f| {
            f.firewall.description = description.map(str::to_string);
        })
    }

    async fn associate_firewall_policy(
        &self,
        firewall_name: &str,
        firewall_policy_arn: &str,
    ) -> Result<()> {
        let polls = self.lock().polls_until_ready;
        self.with_firewall("AssociateFirewallPolicy", firewall_name, |f| {
            f.firewall.firewall_policy_arn = firewall_policy_arn.to_string();
            f.polls_remaining = polls;
        })
    }

    async fn tag_resource(&self, resource_arn: &str, tags: &[Tag]) -> Result<()> {
        let mut state = self.lock();
        state.recorder.record("TagResource", resource_arn)?;
        let is_firewall = state
            .firewalls
            .values()
            .any(|f| f.firewall.firewall_arn == resource_arn);
        let existing = if is_firewall {
            state
                .firewalls
                .values_mut()
                .find(|f| f.firewall.firewall_arn == resource_arn)
                .map(|f| &mut f.firewall.tags)
        } else {
            state
                .policy_by_arn_mut(resource_arn)
                .map(|p| &mut p.firewall_policy_response.tags)
        }
        .ok_or_else(|| ApiError::NotFound(format!("Resource {}", resource_arn)))?;
        for tag in tags {
            match existing.iter_mut().find(|t| t.key == tag.key) {
                Some(current) => current.value = tag.value.clone(),
                None => existing.push(tag.clone()),
            }
        }
        Ok(())
    }

    async fn describe_firewall_policy(
        &self,
        firewall_policy_name: &str,
    ) -> Result<Option<DescribeFirewallPolicyResponse>> {
        let mut state = self.lock();
        state
            .recorder
            .record("DescribeFirewallPolicy", firewall_policy_name)?;
        Ok(state.policies.get(firewall_policy_name).cloned())
    }

    async fn create_firewall_policy(
        &self,
        request: &CreateFirewallPolicyRequest,
    ) -> Result<FirewallPolicyMutationResponse> {
        let mut state = self.lock();
        state
            .recorder
            .record("CreateFirewallPolicy", &request.firewall_policy_name)?;

        if request.firewall_policy_name.is_empty() {
            return Err(validation_error("Missing required key 'FirewallPolicyName' in params"));
        }
        let arn = format!("{}:firewall-policy/{}", ARN_PREFIX, request.firewall_policy_name);
        let response = FirewallPolicyResponse {
            firewall_policy_name: request.firewall_policy_name.clone(),
            firewall_policy_arn: arn,
            firewall_policy_id: None,
            description: request.description.clone(),
            tags: request.tags.clone(),
        };
        if request.dry_run {
            return Ok(FirewallPolicyMutationResponse {
                update_token: String::new(),
                firewall_policy_response: response,
            });
        }
        if state.policies.contains_key(&request.firewall_policy_name) {
            return Err(service_error(
                "InvalidRequestException",
                format!("Firewall policy {} already exists", request.firewall_policy_name),
            ));
        }

        let token = state.next_token();
        state.policies.insert(
            request.firewall_policy_name.clone(),
            DescribeFirewallPolicyResponse {
                update_token: token.clone(),
                firewall_policy_response: response.clone(),
                firewall_policy: Some(request.firewall_policy.clone()),
            },
        );
        Ok(FirewallPolicyMutationResponse {
            update_token: token,
            firewall_policy_response: response,
        })
    }

    async fn update_firewall_policy(
        &self,
        request: &UpdateFirewallPolicyRequest,
    ) -> Result<FirewallPolicyMutationResponse> {
        let mut state = self.lock();
        state
            .recorder
            .record("UpdateFirewallPolicy", &request.firewall_policy_name)?;

        let raced = state.apply_race(&request.firewall_policy_name);
        let token = state.next_token();
        let stored = state
            .policy_by_arn_mut(&request.firewall_policy_arn)
            .ok_or_else(|| {
                ApiError::NotFound(format!("Firewall policy {}", request.firewall_policy_arn))
            })?;
        if raced {
            stored.update_token = token;
            return Err(ApiError::InvalidToken);
        }
        if stored.update_token != request.update_token {
            return Err(ApiError::InvalidToken);
        }

        stored.update_token = token;
        stored.firewall_policy = Some(request.firewall_policy.clone());
        stored.firewall_policy_response.description = request.description.clone();
        Ok(FirewallPolicyMutationResponse {
            update_token: stored.update_token.clone(),
            firewall_policy_response: stored.firewall_policy_response.clone(),
        })
    }

    async fn describe_rule_group(
        &self,
        rule_group_name: &str,
        rule_group_type: RuleGroupType,
    ) -> Result<Option<DescribeRuleGroupResponse>> {
        let mut state = self.lock();
        state.recorder.record("DescribeRuleGroup", rule_group_name)?;
        Ok(state
            .rule_group_by_name(rule_group_name, rule_group_type)
            .cloned())
    }

    async fn describe_rule_group_by_arn(
        &self,
        rule_group_arn: &str,
    ) -> Result<Option<DescribeRuleGroupResponse>> {
        let mut state = self.lock();
        state.recorder.record("DescribeRuleGroup", rule_group_arn)?;
        Ok(state.rule_groups.get(rule_group_arn).cloned())
    }

    async fn create_rule_group(
        &self,
        request: &CreateRuleGroupRequest,
    ) -> Result<RuleGroupMutationResponse> {
        let mut state = self.lock();
        state
            .recorder
            .record("CreateRuleGroup", &request.rule_group_name)?;

        if request.rule_group.is_some() && request.rules.is_some() {
            return Err(validation_error(
                "RuleGroup and Rules are mutually exclusive",
            ));
        }
        if request.rule_group_type.is_none() {
            return Err(validation_error("Missing required key 'Type' in params"));
        }

        let arn = rule_group_arn(&request.rule_group_name, request.rule_group_type);
        let response = RuleGroupResponse {
            rule_group_arn: arn.clone(),
            rule_group_name: request.rule_group_name.clone(),
            rule_group_id: None,
            rule_group_type: request.rule_group_type,
            capacity: request.capacity,
            description: request.description.clone(),
            tags: request.tags.clone(),
        };
        if request.dry_run {
            return Ok(RuleGroupMutationResponse {
                update_token: String::new(),
                rule_group_response: response,
            });
        }
        if state.rule_groups.contains_key(&arn) {
            return Err(service_error(
                "InvalidRequestException",
                format!("Rule group {} already exists", request.rule_group_name),
            ));
        }

        let token = state.next_token();
        let body = match (&request.rule_group, &request.rules) {
            (Some(body), _) => Some(body.clone()),
            (None, Some(rules)) => Some(rules_body(rules)),
            (None, None) => None,
        };
        state.rule_groups.insert(
            arn,
            DescribeRuleGroupResponse {
                update_token: token.clone(),
                rule_group: body,
                rule_group_response: response.clone(),
            },
        );
        Ok(RuleGroupMutationResponse {
            update_token: token,
            rule_group_response: response,
        })
    }

    async fn update_rule_group(
        &self,
        request: &UpdateRuleGroupRequest,
    ) -> Result<RuleGroupMutationResponse> {
        let mut state = self.lock();
        state
            .recorder
            .record("UpdateRuleGroup", &request.rule_group_arn)?;

        let raced = state.apply_race(&request.rule_group_arn);
        let token = state.next_token();
        let stored = state
            .rule_groups
            .get_mut(&request.rule_group_arn)
            .ok_or_else(|| ApiError::NotFound(format!("Rule group {}", request.rule_group_arn)))?;
        if raced {
            stored.update_token = token;
            return Err(ApiError::InvalidToken);
        }
        if stored.update_token != request.update_token {
            return Err(ApiError::InvalidToken);
        }

        stored.update_token = token;
        stored.rule_group = match (&request.rule_group, &request.rules) {
            (Some(body), _) => Some(body.clone()),
            (None, Some(rules)) => Some(rules_body(rules)),
            (None, None) => stored.rule_group.take(),
        };
        stored.rule_group_response.description = request.description.clone();
        Ok(RuleGroupMutationResponse {
            update_token: stored.update_token.clone(),
            rule_group_response: stored.rule_group_response.clone(),
        })
    }

    async fn delete_rule_group(&self, rule_group_arn: &str) -> Result<()> {
        let mut state = self.lock();
        state.recorder.record("DeleteRuleGroup", rule_group_arn)?;

        let in_use = state.policies.values().any(|p| {
            p.firewall_policy
                .as_ref()
                .is_some_and(|body| body.rule_group_arns().iter().any(|a| a == rule_group_arn))
        });
        if in_use {
            return Err(service_error(
                "InvalidOperationException",
                format!("Rule group {} is in use", rule_group_arn),
            ));
        }
        state
            .rule_groups
            .remove(rule_group_arn)
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(format!("Rule group {}", rule_group_arn)))
    }

    async fn describe_logging_configuration(
        &self,
        firewall_name: &str,
    ) -> Result<LoggingConfiguration> {
        let mut state = self.lock();
        state
            .recorder
            .record("DescribeLoggingConfiguration", firewall_name)?;
        if !state.firewalls.contains_key(firewall_name) {
            return Err(ApiError::NotFound(format!("Firewall {}", firewall_name)));
        }
        Ok(state.logging.get(firewall_name).cloned().unwrap_or_default())
    }

    async fn update_logging_configuration(
        &self,
        firewall_name: &str,
        configuration: &LoggingConfiguration,
    ) -> Result<LoggingConfiguration> {
        let mut state = self.lock();
        state
            .recorder
            .record("UpdateLoggingConfiguration", firewall_name)?;
        if !state.firewalls.contains_key(firewall_name) {
            return Err(ApiError::NotFound(format!("Firewall {}", firewall_name)));
        }

        let current = state.logging.get(firewall_name).cloned().unwrap_or_default();
        let before = current.log_destination_configs.len();
        let after = configuration.log_destination_configs.len();
        if before.abs_diff(after) > 1 {
            return Err(service_error(
                "InvalidRequestException",
                "You can only add or remove one log destination configuration per update",
            ));
        }

        state
            .logging
            .insert(firewall_name.to_string(), configuration.clone());
        Ok(configuration.clone())
    }
}

// ============================================================================
// Networking
// ============================================================================

#[derive(Debug, Default)]
struct NetworkState {
    recorder: Recorder,
    route_tables: Vec<RouteTable>,
    page_size: usize,
    appliance_modes: Vec<(String, String)>,
}

/// In-process networking service.
#[derive(Debug)]
pub struct InMemoryNetworkApi {
    state: Mutex<NetworkState>,
}

impl Default for InMemoryNetworkApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryNetworkApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NetworkState {
                page_size: 100,
                ..NetworkState::default()
            }),
        }
    }

    /// Maximum number of route tables per describe page.
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.lock().page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a route table. Duplicate ids are kept to model a misbehaving service.
    pub fn add_route_table(&self, route_table: RouteTable) {
        self.lock().route_tables.push(route_table);
    }

    pub fn route_table(&self, route_table_id: &str) -> Option<RouteTable> {
        self.lock()
            .route_tables
            .iter()
            .find(|t| t.route_table_id == route_table_id)
            .cloned()
    }

    pub fn fail_on(&self, operation: &'static str, target: Option<&str>, error: ApiError) {
        self.lock()
            .recorder
            .inject(operation, target.map(str::to_string), error);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().recorder.calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.lock().recorder.count(operation)
    }

    pub fn appliance_modes(&self) -> Vec<(String, String)> {
        self.lock().appliance_modes.clone()
    }
}

#[async_trait]
impl NetworkApi for InMemoryNetworkApi {
    // unknown ids yield an empty page, like a `route-table-id` filter
    async fn describe_route_tables(
        &self,
        route_table_id: &str,
        next_token: Option<&str>,
    ) -> Result<DescribeRouteTablesPage> {
        let mut state = self.lock();
        state.recorder.record("DescribeRouteTables", route_table_id)?;

        let start = match next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| service_error("InvalidNextToken", token))?,
            None => 0,
        };
        let matching: Vec<&RouteTable> = state
            .route_tables
            .iter()
            .filter(|t| t.route_table_id == route_table_id)
            .collect();
        let end = (start + state.page_size).min(matching.len());
        Ok(DescribeRouteTablesPage {
            route_tables: matching[start.min(end)..end].iter().map(|t| (*t).clone()).collect(),
            next_token: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn create_route(&self, request: &CreateRouteRequest) -> Result<()> {
        let mut state = self.lock();
        state.recorder.record("CreateRoute", &request.route_table_id)?;

        let table = state
            .route_tables
            .iter_mut()
            .find(|t| t.route_table_id == request.route_table_id)
            .ok_or_else(|| ApiError::NotFound(request.route_table_id.clone()))?;
        if table
            .routes
            .iter()
            .any(|r| r.destination_cidr_block.as_deref() == Some(request.destination_cidr_block.as_str()))
        {
            return Err(service_error(
                "RouteAlreadyExists",
                format!(
                    "The route identified by {} already exists.",
                    request.destination_cidr_block
                ),
            ));
        }
        table.routes.push(Route {
            destination_cidr_block: Some(request.destination_cidr_block.clone()),
            gateway_id: Some(request.vpc_endpoint_id.clone()),
            state: Some(ROUTE_ACTIVE.to_string()),
            ..Route::default()
        });
        Ok(())
    }

    async fn delete_route(&self, request: &DeleteRouteRequest) -> Result<()> {
        let mut state = self.lock();
        state.recorder.record("DeleteRoute", &request.route_table_id)?;

        let table = state
            .route_tables
            .iter_mut()
            .find(|t| t.route_table_id == request.route_table_id)
            .ok_or_else(|| ApiError::NotFound(request.route_table_id.clone()))?;
        let before = table.routes.len();
        table
            .routes
            .retain(|r| r.destination_cidr_block.as_deref() != Some(request.destination_cidr_block.as_str()));
        if table.routes.len() == before {
            return Err(service_error(
                "InvalidRoute.NotFound",
                format!("no route with destination-cidr-block {}", request.destination_cidr_block),
            ));
        }
        Ok(())
    }

    async fn modify_appliance_mode(
        &self,
        transit_gateway_attachment_id: &str,
        appliance_mode: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        state
            .recorder
            .record("ModifyTransitGatewayVpcAttachment", transit_gateway_attachment_id)?;
        state.appliance_modes.push((
            transit_gateway_attachment_id.to_string(),
            appliance_mode.to_string(),
        ));
        Ok(())
    }
}
