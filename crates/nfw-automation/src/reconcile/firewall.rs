//! Firewall reconciliation.
//!
//! A firewall moves through one of two paths:
//!
//! ```text
//! Absent  -> Creating -> Converging -> Ready
//! Present -> PolicyResolving -> UpdatingProperties -> Converging -> Ready
//! ```
//!
//! On both paths the policy is reconciled first, so rule group and policy
//! drift is applied even when the firewall itself is unchanged.

use serde::Serialize;
use tokio::time::Instant;
use tracing::Instrument;

use crate::api::{CreateFirewallRequest, Firewall, FirewallApi, SubnetMapping, SyncStates};
use crate::config::{
    unique_name, ConfigReader, EnvironmentSettings, FirewallSpec, ReconcileOptions,
};
use crate::error::{ConfigError, ReconcileError};

use super::logging::{apply_logging, build_log_destinations};
use super::policy::{PolicyOutcome, PolicyReconciler};
use super::changed_tags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FirewallPhase {
    Absent,
    Creating,
    Present,
    PolicyResolving,
    UpdatingProperties,
    Converging,
    Ready,
}

/// Result of reconciling one firewall file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallOutcome {
    pub firewall_name: String,
    pub firewall_arn: String,
    pub created: bool,
    pub policy: PolicyOutcome,
    /// Per-zone sync states once the firewall is ready.
    pub sync_states: SyncStates,
    /// Phases visited, in order.
    pub phases: Vec<FirewallPhase>,
}

pub struct FirewallReconciler<'a> {
    api: &'a dyn FirewallApi,
    reader: &'a ConfigReader,
    settings: &'a EnvironmentSettings,
    options: &'a ReconcileOptions,
}

impl<'a> FirewallReconciler<'a> {
    pub fn new(
        api: &'a dyn FirewallApi,
        reader: &'a ConfigReader,
        settings: &'a EnvironmentSettings,
        options: &'a ReconcileOptions,
    ) -> Self {
        Self {
            api,
            reader,
            settings,
            options,
        }
    }

    /// Brings the firewall declared by `spec` to the ready state.
    pub async fn reconcile(&self, spec: &FirewallSpec) -> Result<FirewallOutcome, ReconcileError> {
        let name = unique_name(&spec.firewall_name, &self.settings.stack_id)?;
        let span = tracing::info_span!("reconcile.firewall", firewall = %name);
        self.reconcile_named(spec, name).instrument(span).await
    }

    async fn reconcile_named(
        &self,
        spec: &FirewallSpec,
        name: String,
    ) -> Result<FirewallOutcome, ReconcileError> {
        let mut phases = Vec::new();

        log::info!("Checking if firewall exists: {}", name);
        let live = self
            .api
            .describe_firewall(&name)
            .await?
            .and_then(|described| described.firewall);

        let (firewall_arn, policy, created) = match live {
            None => {
                phases.push(FirewallPhase::Absent);
                let (vpc_id, subnet_mappings) = self.network_inputs(spec)?;
                let policy = self.reconcile_policy(spec).await?;

                phases.push(FirewallPhase::Creating);
                let request = CreateFirewallRequest {
                    firewall_name: name.clone(),
                    firewall_policy_arn: policy.firewall_policy_arn.clone(),
                    vpc_id,
                    subnet_mappings,
                    delete_protection: spec.delete_protection,
                    subnet_change_protection: spec.subnet_change_protection,
                    firewall_policy_change_protection: spec.firewall_policy_change_protection,
                    description: spec.description.clone(),
                    tags: spec.tags.clone(),
                };
                log::info!("Creating firewall: {}", name);
                let arn = self
                    .api
                    .create_firewall(&request)
                    .await?
                    .firewall
                    .map(|f| f.firewall_arn)
                    .filter(|arn| !arn.is_empty())
                    .ok_or_else(|| ReconcileError::MissingArn {
                        operation: "CreateFirewall",
                        name: name.clone(),
                    })?;
                log::info!("Created firewall {}", arn);
                (arn, policy, true)
            }
            Some(live) => {
                phases.push(FirewallPhase::Present);
                log::info!("Found existing firewall {}", live.firewall_arn);

                phases.push(FirewallPhase::PolicyResolving);
                let policy = self.reconcile_policy(spec).await?;

                phases.push(FirewallPhase::UpdatingProperties);
                self.update_properties(spec, &live, &policy.firewall_policy_arn)
                    .await?;
                (live.firewall_arn, policy, false)
            }
        };

        phases.push(FirewallPhase::Converging);
        let sync_states = self.wait_for_convergence(&name).await?;
        phases.push(FirewallPhase::Ready);

        if let Some(configs) = build_log_destinations(&self.settings.logging) {
            apply_logging(self.api, &name, &configs).await;
        }

        Ok(FirewallOutcome {
            firewall_name: name,
            firewall_arn,
            created,
            policy,
            sync_states,
            phases,
        })
    }

    async fn reconcile_policy(&self, spec: &FirewallSpec) -> Result<PolicyOutcome, ReconcileError> {
        PolicyReconciler::new(self.api, self.reader, &self.settings.stack_id, self.options)
            .reconcile(&spec.firewall_policy_arn)
            .await
    }

    /// VPC and subnets for a new firewall. The environment takes priority
    /// over the firewall file.
    fn network_inputs(
        &self,
        spec: &FirewallSpec,
    ) -> Result<(String, Vec<SubnetMapping>), ConfigError> {
        let vpc_id = self
            .settings
            .vpc_id
            .clone()
            .or_else(|| spec.vpc_id.clone())
            .ok_or(ConfigError::MissingEnvironment("VPC_ID"))?;

        let subnet_mappings: Vec<SubnetMapping> = if self.settings.subnet_ids.is_empty() {
            spec.subnet_mappings.clone()
        } else {
            self.settings
                .subnet_ids
                .iter()
                .map(|subnet_id| SubnetMapping {
                    subnet_id: subnet_id.clone(),
                })
                .collect()
        };
        if subnet_mappings.is_empty() {
            return Err(ConfigError::MissingEnvironment("SUBNET_IDS"));
        }
        Ok((vpc_id, subnet_mappings))
    }

    /// Issues one update per property that differs from the live firewall.
    async fn update_properties(
        &self,
        spec: &FirewallSpec,
        live: &Firewall,
        policy_arn: &str,
    ) -> Result<(), ReconcileError> {
        let name = live.firewall_name.as_str();

        if spec.delete_protection != live.delete_protection {
            log::info!("Updating delete protection to {}", spec.delete_protection);
            self.api
                .update_firewall_delete_protection(name, spec.delete_protection)
                .await?;
        }
        if spec.firewall_policy_change_protection != live.firewall_policy_change_protection {
            log::info!(
                "Updating policy change protection to {}",
                spec.firewall_policy_change_protection
            );
            self.api
                .update_firewall_policy_change_protection(
                    name,
                    spec.firewall_policy_change_protection,
                )
                .await?;
        }
        if spec.subnet_change_protection != live.subnet_change_protection {
            log::info!(
                "Updating subnet change protection to {}",
                spec.subnet_change_protection
            );
            self.api
                .update_subnet_change_protection(name, spec.subnet_change_protection)
                .await?;
        }
        if let Some(description) = spec.description.as_deref() {
            if live.description.as_deref() != Some(description) {
                log::info!("Updating firewall description");
                self.api
                    .update_firewall_description(name, Some(description))
                    .await?;
            }
        }

        let tags = changed_tags(&spec.tags, &live.tags);
        if !tags.is_empty() {
            if let Err(e) = self.api.tag_resource(&live.firewall_arn, &tags).await {
                log::warn!("Failed to tag firewall {}: {}", live.firewall_arn, e);
            }
        }

        if live.firewall_policy_arn != policy_arn {
            log::info!("Associating firewall policy {}", policy_arn);
            self.api.associate_firewall_policy(name, policy_arn).await?;
        }
        Ok(())
    }

    /// Polls until the firewall, its configuration and every zone attachment
    /// report ready.
    async fn wait_for_convergence(&self, name: &str) -> Result<SyncStates, ReconcileError> {
        let started = Instant::now();
        let mut polls: u32 = 0;
        loop {
            tokio::time::sleep(self.options.poll_interval).await;
            polls += 1;

            let status = self
                .api
                .describe_firewall(name)
                .await?
                .and_then(|described| described.firewall_status);
            match status {
                Some(status) if status.is_converged() => {
                    log::info!("Firewall {} is ready after {} poll(s)", name, polls);
                    return Ok(status.sync_states);
                }
                Some(status) => log::info!(
                    "Waiting for firewall {}: status {}, configuration {}",
                    name,
                    status.status,
                    status.configuration_sync_state_summary
                ),
                None => log::info!("Waiting for firewall {} to report its status", name),
            }

            if let Some(timeout) = self.options.convergence_timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(ReconcileError::ConvergenceTimeout {
                        firewall_name: name.to_string(),
                        waited_secs: waited.as_secs(),
                    });
                }
            }
        }
    }
}
