//! End-to-end deployment against the in-memory backends.

mod common;

use common::{copy_fixture, fast_options, fixtures_path, named, settings, write};
use nfw_automation::api::memory::{InMemoryFirewallApi, InMemoryNetworkApi};
use nfw_automation::api::{ApiError, RouteTable, Tag};
use nfw_automation::{AutomationError, ConfigReader, Deployment, FirewallPhase, ReconcileError};

fn backends() -> (InMemoryFirewallApi, InMemoryNetworkApi) {
    let firewall = InMemoryFirewallApi::new()
        .with_zones(["us-east-1a", "us-east-1b"])
        .with_polls_until_ready(2);
    let network = InMemoryNetworkApi::new().with_page_size(1);
    for id in ["rtb-a", "rtb-b"] {
        network.add_route_table(RouteTable {
            route_table_id: id.into(),
            routes: Vec::new(),
        });
    }
    (firewall, network)
}

fn arn_ending(api: &InMemoryFirewallApi, suffix: &str) -> String {
    api.rule_group_arns()
        .into_iter()
        .find(|arn| arn.ends_with(suffix))
        .unwrap_or_else(|| panic!("no rule group ending in {}", suffix))
}

#[tokio::test]
async fn test_deploys_valid_tree() {
    let (firewall_api, network_api) = backends();
    let reader = ConfigReader::new(fixtures_path("valid"));
    let settings = settings();

    let reports = Deployment::new(&firewall_api, &network_api, &reader, &settings)
        .with_options(fast_options())
        .run("firewalls")
        .await
        .expect("Should deploy the valid tree");

    let names: Vec<_> = reports
        .iter()
        .map(|r| r.firewall.firewall_name.clone())
        .collect();
    assert_eq!(names, vec![named("egress"), named("inspection")]);
    for report in &reports {
        assert!(report.firewall.created);
        assert_eq!(report.firewall.phases.last(), Some(&FirewallPhase::Ready));
        assert_eq!(
            report.firewall.sync_states.keys().collect::<Vec<_>>(),
            vec!["us-east-1a", "us-east-1b"]
        );
        assert!(report.routes.iter().all(|r| r.default_route_created));
    }

    assert_eq!(firewall_api.rule_group_arns().len(), 3);
    assert!(firewall_api.policy(&named("central")).is_some());
    assert!(firewall_api.policy(&named("egress")).is_some());

    let inspection = firewall_api.firewall(&named("inspection")).unwrap();
    assert_eq!(inspection.tags, vec![Tag::new("Environment", "test")]);
    assert_eq!(
        inspection.description.as_deref(),
        Some("Centralized inspection firewall")
    );
    assert_eq!(
        inspection.firewall_policy_arn,
        reports[1].firewall.policy.firewall_policy_arn
    );

    // the second firewall takes over both route tables
    assert_eq!(network_api.call_count("DeleteRoute"), 2);
    assert_eq!(network_api.call_count("CreateRoute"), 4);
    let endpoint = &reports[1].routes[0].vpc_endpoint_id;
    let route_table = network_api.route_table("rtb-a").unwrap();
    assert!(route_table
        .routes
        .iter()
        .any(|r| r.is_active_default() && r.gateway_id.as_ref() == Some(endpoint)));
}

#[tokio::test]
async fn test_second_run_changes_nothing_structural() {
    let (firewall_api, network_api) = backends();
    let reader = ConfigReader::new(fixtures_path("valid"));
    let settings = settings();
    let deployment = Deployment::new(&firewall_api, &network_api, &reader, &settings)
        .with_options(fast_options());

    deployment.run("firewalls").await.unwrap();
    let reports = deployment.run("firewalls").await.unwrap();

    assert!(reports.iter().all(|r| !r.firewall.created));
    assert_eq!(
        reports[0].firewall.phases,
        vec![
            FirewallPhase::Present,
            FirewallPhase::PolicyResolving,
            FirewallPhase::UpdatingProperties,
            FirewallPhase::Converging,
            FirewallPhase::Ready
        ]
    );
    assert_eq!(firewall_api.call_count("CreateFirewall"), 2);
    assert_eq!(firewall_api.call_count("AssociateFirewallPolicy"), 0);
    assert_eq!(firewall_api.call_count("UpdateFirewallDeleteProtection"), 0);
    assert_eq!(firewall_api.call_count("UpdateFirewallDescription"), 0);
    assert_eq!(firewall_api.call_count("TagResource"), 0);
    assert_eq!(firewall_api.call_count("DeleteRuleGroup"), 0);
    assert_eq!(firewall_api.rule_group_arns().len(), 3);
}

#[tokio::test]
async fn test_detached_rule_groups_are_pruned() {
    let tree = copy_fixture("valid");
    let (firewall_api, network_api) = backends();
    let reader = ConfigReader::new(tree.path());
    let settings = settings();
    let deployment = Deployment::new(&firewall_api, &network_api, &reader, &settings)
        .with_options(fast_options());
    deployment.run("firewalls").await.unwrap();

    let drop_telnet = arn_ending(&firewall_api, "/drop-telnet");
    let allow_domains = arn_ending(&firewall_api, "/allow-domains");

    write(
        tree.path(),
        "policies/central.json",
        r#"{
            "FirewallPolicyName": "central",
            "FirewallPolicy": {
                "StatelessDefaultActions": ["aws:forward_to_sfe"],
                "StatelessFragmentDefaultActions": ["aws:forward_to_sfe"],
                "StatefulRuleGroupReferences": [
                    { "ResourceArn": "rulegroups/suricata.json" }
                ]
            },
            "Description": "Central inspection policy",
            "Tags": [{ "Key": "Owner", "Value": "network" }]
        }"#,
    );
    let reports = deployment.run("firewalls").await.unwrap();

    // allow-domains is still used by the egress policy, so deleting it fails quietly
    assert_eq!(reports[1].firewall.policy.pruned, vec![drop_telnet.clone()]);
    assert!(firewall_api.rule_group(&drop_telnet).is_none());
    assert!(firewall_api.rule_group(&allow_domains).is_some());
    assert_eq!(
        firewall_api.targets("DeleteRuleGroup"),
        vec![allow_domains, drop_telnet]
    );
}

#[tokio::test]
async fn test_failed_rule_group_update_rolls_back_and_stops() {
    let tree = copy_fixture("valid");
    let (firewall_api, network_api) = backends();
    let reader = ConfigReader::new(tree.path());
    let settings = settings();
    let deployment = Deployment::new(&firewall_api, &network_api, &reader, &settings)
        .with_options(fast_options());
    deployment.run("firewalls").await.unwrap();

    let drop_telnet = arn_ending(&firewall_api, "/drop-telnet");
    let suricata = arn_ending(&firewall_api, "/suricata");
    let deployed = firewall_api.rule_group(&drop_telnet).unwrap().rule_group;

    write(
        tree.path(),
        "rulegroups/drop-telnet.json",
        r#"{
            "RuleGroupName": "drop-telnet",
            "Type": "STATELESS",
            "Capacity": 10,
            "RuleGroup": { "RulesSource": { "StatelessRulesAndCustomActions": { "StatelessRules": [] } } }
        }"#,
    );
    firewall_api.fail_on(
        "UpdateRuleGroup",
        Some(suricata.as_str()),
        ApiError::Service {
            code: "InsufficientCapacityException".into(),
            message: "capacity".into(),
        },
    );

    let err = deployment.run("firewalls").await.unwrap_err();
    match err {
        AutomationError::Reconcile(ref inner @ ReconcileError::RolledBack { .. }) => {
            assert!(inner.rollback_failures().is_empty());
        }
        other => panic!("Expected a rolled back reconcile error, got {:?}", other),
    }
    assert_eq!(firewall_api.rule_group(&drop_telnet).unwrap().rule_group, deployed);
    assert_eq!(firewall_api.call_count("UpdateFirewallPolicy"), 1);
}
