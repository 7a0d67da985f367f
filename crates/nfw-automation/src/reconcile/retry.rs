//! Optimistic concurrency: mutations that present a stale update token are
//! retried with a freshly described one until they succeed or fail for
//! another reason.

use crate::api::{
    ApiError, FirewallApi, FirewallPolicyMutationResponse, RuleGroupMutationResponse,
    UpdateFirewallPolicyRequest, UpdateRuleGroupRequest,
};

/// Updates a rule group, refreshing the token on every stale-token rejection.
pub async fn update_rule_group(
    api: &dyn FirewallApi,
    mut request: UpdateRuleGroupRequest,
) -> Result<RuleGroupMutationResponse, ApiError> {
    let mut refreshes: u32 = 0;
    loop {
        log::info!("Updating rule group {}", request.rule_group_arn);
        match api.update_rule_group(&request).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_invalid_token() => {
                refreshes += 1;
                log::info!(
                    "Update token for rule group {} is stale, refreshing (attempt {})",
                    request.rule_group_arn,
                    refreshes
                );
                let current = api
                    .describe_rule_group_by_arn(&request.rule_group_arn)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(request.rule_group_arn.clone()))?;
                request.update_token = current.update_token;
            }
            Err(e) => {
                log::info!(
                    "Error while trying to update the rule group {}: {}",
                    request.rule_group_arn,
                    e
                );
                return Err(e);
            }
        }
    }
}

/// Updates a firewall policy, refreshing the token on every stale-token rejection.
pub async fn update_firewall_policy(
    api: &dyn FirewallApi,
    mut request: UpdateFirewallPolicyRequest,
) -> Result<FirewallPolicyMutationResponse, ApiError> {
    let mut refreshes: u32 = 0;
    loop {
        log::info!("Updating firewall policy {}", request.firewall_policy_name);
        match api.update_firewall_policy(&request).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_invalid_token() => {
                refreshes += 1;
                log::info!(
                    "Update token for firewall policy {} is stale, refreshing (attempt {})",
                    request.firewall_policy_name,
                    refreshes
                );
                let current = api
                    .describe_firewall_policy(&request.firewall_policy_name)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(request.firewall_policy_name.clone()))?;
                request.update_token = current.update_token;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::InMemoryFirewallApi;
    use crate::api::{CreateFirewallPolicyRequest, CreateRuleGroupRequest, RuleGroupType};
    use serde_json::json;

    #[tokio::test]
    async fn test_rule_group_update_survives_races() {
        let api = InMemoryFirewallApi::new();
        let arn = api.seed_rule_group(&CreateRuleGroupRequest {
            rule_group_name: "rg".into(),
            rule_group_type: Some(RuleGroupType::Stateful),
            rules: Some("old".into()),
            ..CreateRuleGroupRequest::default()
        });
        api.race_next_update(&arn);
        api.race_next_update(&arn);

        let snapshot = api.rule_group(&arn).unwrap();
        let mut request = UpdateRuleGroupRequest::restore(&snapshot);
        request.rule_group = None;
        request.rules = Some("new".into());
        update_rule_group(&api, request).await.unwrap();

        assert_eq!(api.call_count("UpdateRuleGroup"), 3);
        assert_eq!(
            api.rule_group(&arn).unwrap().rule_group,
            Some(json!({ "RulesSource": { "RulesString": "new" } }))
        );
    }

    #[tokio::test]
    async fn test_other_errors_are_returned() {
        let api = InMemoryFirewallApi::new();
        let arn = api.seed_rule_group(&CreateRuleGroupRequest {
            rule_group_name: "rg".into(),
            rule_group_type: Some(RuleGroupType::Stateless),
            rule_group: Some(json!({})),
            ..CreateRuleGroupRequest::default()
        });
        api.fail_on(
            "UpdateRuleGroup",
            None,
            ApiError::Service {
                code: "InvalidRequestException".into(),
                message: "capacity exceeded".into(),
            },
        );
        let request = UpdateRuleGroupRequest::restore(&api.rule_group(&arn).unwrap());
        let err = update_rule_group(&api, request).await.unwrap_err();
        assert!(matches!(err, ApiError::Service { .. }));
        assert_eq!(api.call_count("UpdateRuleGroup"), 1);
    }

    #[tokio::test]
    async fn test_policy_update_refreshes_by_name() {
        let api = InMemoryFirewallApi::new();
        api.seed_policy(&CreateFirewallPolicyRequest {
            firewall_policy_name: "p".into(),
            ..CreateFirewallPolicyRequest::default()
        });
        let current = api.policy("p").unwrap();
        api.race_next_update("p");

        let request = UpdateFirewallPolicyRequest {
            update_token: current.update_token.clone(),
            firewall_policy_arn: current.firewall_policy_response.firewall_policy_arn.clone(),
            firewall_policy_name: "p".into(),
            firewall_policy: Default::default(),
            description: Some("updated".into()),
        };
        update_firewall_policy(&api, request).await.unwrap();
        assert_eq!(api.call_count("UpdateFirewallPolicy"), 2);
        assert_eq!(
            api.policy("p")
                .unwrap()
                .firewall_policy_response
                .description
                .as_deref(),
            Some("updated")
        );
    }
}
