//! Deploys every firewall file in a directory, one at a time.
//!
//! Rule groups and policies can be shared between firewalls, so firewalls
//! are never reconciled concurrently. The first failure stops the run.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::api::{FirewallApi, NetworkApi};
use crate::config::{ConfigReader, EnvironmentSettings, ReconcileOptions};
use crate::error::Result;
use crate::reconcile::{FirewallOutcome, FirewallReconciler};
use crate::routing::{RouteRepairer, RouteStatus};

/// What happened to one firewall file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentReport {
    pub firewall_file: PathBuf,
    pub firewall: FirewallOutcome,
    pub routes: Vec<RouteStatus>,
}

pub struct Deployment<'a> {
    firewall_api: &'a dyn FirewallApi,
    network_api: &'a dyn NetworkApi,
    reader: &'a ConfigReader,
    settings: &'a EnvironmentSettings,
    options: ReconcileOptions,
}

impl<'a> Deployment<'a> {
    pub fn new(
        firewall_api: &'a dyn FirewallApi,
        network_api: &'a dyn NetworkApi,
        reader: &'a ConfigReader,
        settings: &'a EnvironmentSettings,
    ) -> Self {
        Self {
            firewall_api,
            network_api,
            reader,
            settings,
            options: settings.reconcile_options(),
        }
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    /// Reconciles every firewall file in `dir`, then repairs the transit
    /// route tables for each firewall that reported sync states.
    pub async fn run<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<DeploymentReport>> {
        let tree = self.reader.load_tree(dir)?;
        log::info!("Deploying {} firewall file(s)", tree.len());

        let reconciler =
            FirewallReconciler::new(self.firewall_api, self.reader, self.settings, &self.options);
        let repairer = RouteRepairer::new(self.network_api);

        let mut reports = Vec::with_capacity(tree.len());
        for (path, spec) in tree {
            log::info!("Processing firewall file {}", path.display());
            let firewall = reconciler.reconcile(&spec).await?;

            let routes = if firewall.sync_states.is_empty() || self.settings.route_targets.is_empty()
            {
                log::debug!("No route tables to repair for {}", firewall.firewall_name);
                Vec::new()
            } else {
                repairer
                    .repair(&firewall.sync_states, &self.settings.route_targets)
                    .await?
            };
            for status in &routes {
                log::info!(
                    "Route table {} -> {} (created: {})",
                    status.route_table_id,
                    status.vpc_endpoint_id,
                    status.default_route_created
                );
            }

            reports.push(DeploymentReport {
                firewall_file: path,
                firewall,
                routes,
            });
        }
        Ok(reports)
    }
}
