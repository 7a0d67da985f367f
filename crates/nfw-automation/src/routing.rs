//! Points the transit attachment route tables at the firewall endpoints.

use serde::Serialize;

use crate::api::{
    ApiError, CreateRouteRequest, DeleteRouteRequest, NetworkApi, RouteTable, SyncStates,
    DEFAULT_ROUTE,
};
use crate::config::RouteTarget;
use crate::error::RouteError;

/// Outcome of repairing one route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteStatus {
    pub vpc_endpoint_id: String,
    pub route_table_id: String,
    pub default_route_created: bool,
}

pub struct RouteRepairer<'a> {
    api: &'a dyn NetworkApi,
}

impl<'a> RouteRepairer<'a> {
    pub fn new(api: &'a dyn NetworkApi) -> Self {
        Self { api }
    }

    /// Makes sure each target's route table sends default traffic to the
    /// firewall endpoint of its availability zone.
    ///
    /// Stale default routes to other gateways are deleted. Default routes with
    /// no gateway id are never touched. The first failing target aborts the
    /// whole call.
    pub async fn repair(
        &self,
        sync_states: &SyncStates,
        targets: &[RouteTarget],
    ) -> Result<Vec<RouteStatus>, RouteError> {
        let mut statuses = Vec::with_capacity(targets.len());
        for target in targets {
            let endpoint = sync_states
                .get(&target.availability_zone)
                .and_then(|state| state.attachment.as_ref())
                .and_then(|attachment| attachment.endpoint_id.clone())
                .ok_or_else(|| RouteError::MissingAttachment(target.availability_zone.clone()))?;
            log::info!(
                "Checking route table {} for endpoint {} in {}",
                target.route_table_id,
                endpoint,
                target.availability_zone
            );

            let created = self
                .repair_table(&target.route_table_id, &endpoint)
                .await?;
            statuses.push(RouteStatus {
                vpc_endpoint_id: endpoint,
                route_table_id: target.route_table_id.clone(),
                default_route_created: created,
            });
        }
        Ok(statuses)
    }

    async fn repair_table(&self, route_table_id: &str, endpoint: &str) -> Result<bool, RouteError> {
        let wrap = |source: ApiError| RouteError::Repair {
            route_table_id: route_table_id.to_string(),
            source,
        };

        let mut tables = self.describe_all(route_table_id).await.map_err(wrap)?;
        if tables.len() > 1 {
            return Err(RouteError::MultipleRouteTables {
                route_table_id: route_table_id.to_string(),
                count: tables.len(),
            });
        }
        // an empty result is treated as a table without routes
        let routes = tables.pop().map(|t| t.routes).unwrap_or_default();

        let mut routed = false;
        for route in routes.iter().filter(|r| r.is_active_default()) {
            match route.gateway_id.as_deref() {
                Some(gateway) if gateway == endpoint => {
                    log::info!("Default route already targets {}", endpoint);
                    routed = true;
                }
                Some(stale) => {
                    log::info!(
                        "Deleting default route to stale endpoint {} in {}",
                        stale,
                        route_table_id
                    );
                    self.api
                        .delete_route(&DeleteRouteRequest {
                            destination_cidr_block: DEFAULT_ROUTE.to_string(),
                            route_table_id: route_table_id.to_string(),
                        })
                        .await
                        .map_err(wrap)?;
                }
                // NAT, transit gateway and interface targets carry no gateway id
                None => {
                    log::warn!(
                        "Default route in {} targets something other than a gateway, leaving it",
                        route_table_id
                    );
                }
            }
        }

        if routed {
            return Ok(false);
        }
        log::info!("Creating default route to {} in {}", endpoint, route_table_id);
        self.api
            .create_route(&CreateRouteRequest {
                destination_cidr_block: DEFAULT_ROUTE.to_string(),
                vpc_endpoint_id: endpoint.to_string(),
                route_table_id: route_table_id.to_string(),
            })
            .await
            .map_err(wrap)?;
        Ok(true)
    }

    async fn describe_all(&self, route_table_id: &str) -> Result<Vec<RouteTable>, ApiError> {
        let mut tables = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .api
                .describe_route_tables(route_table_id, next_token.as_deref())
                .await?;
            tables.extend(page.route_tables);
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(tables),
            }
        }
    }
}

/// Sets the appliance mode of the transit attachment, if one is configured.
/// Failures are logged.
pub async fn update_appliance_mode(api: &dyn NetworkApi, attachment_id: Option<&str>, mode: &str) {
    let Some(attachment_id) = attachment_id else {
        log::debug!("No transit attachment configured, leaving appliance mode unchanged");
        return;
    };
    log::info!("Setting appliance mode '{}' on {}", mode, attachment_id);
    if let Err(e) = api.modify_appliance_mode(attachment_id, mode).await {
        log::error!(
            "Failed to set appliance mode on {}: {}",
            attachment_id,
            e
        );
    }
}
