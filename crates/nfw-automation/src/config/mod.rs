//! Configuration: declarative documents on disk and process-level settings
//! read from the environment.

pub mod loader;
pub mod naming;
pub mod schema;

use std::time::Duration;

pub use loader::ConfigReader;
pub use naming::unique_name;
pub use schema::{FirewallSpec, PolicySpec, RuleGroupContent, RuleGroupDocument, RuleGroupSpec};

use crate::error::ConfigError;

/// Directory holding firewall files, relative to the base directory.
pub const DEFAULT_FIREWALL_DIR: &str = "firewalls";

/// Bucket name placeholder meaning "no S3 bucket, use the log group".
const NOT_CONFIGURED: &str = "NotConfigured";

/// Timing knobs for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Delay between firewall status polls.
    pub poll_interval: Duration,
    /// Delay before pruning detached rule groups.
    pub settle_delay: Duration,
    /// Give up waiting for convergence after this long. `None` waits forever.
    pub convergence_timeout: Option<Duration>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            settle_delay: Duration::from_secs(15),
            convergence_timeout: None,
        }
    }
}

/// Where and what the firewall logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    /// `S3` or `CloudWatchLogs`, case-insensitive.
    pub destination_type: Option<String>,
    /// Bucket name or log group name.
    pub destination: Option<String>,
    /// `Alert`, `Flow` or `EnableBoth`, case-insensitive.
    pub log_type: Option<String>,
    pub retention_in_days: Option<String>,
}

/// A route table that should send default traffic to the firewall endpoint
/// in the same availability zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub availability_zone: String,
    pub route_table_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSettings {
    pub send_anonymous_metrics: bool,
    pub url: Option<String>,
    pub solution_id: Option<String>,
}

const DEFAULT_REGION: &str = "us-east-1";

/// Remote endpoints. Unset endpoints fall back to the regional defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointSettings {
    pub region: Option<String>,
    pub network_firewall: Option<String>,
    pub ec2: Option<String>,
}

impl EndpointSettings {
    fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }

    pub fn network_firewall_endpoint(&self) -> String {
        self.network_firewall
            .clone()
            .unwrap_or_else(|| format!("https://network-firewall.{}.amazonaws.com", self.region()))
    }

    pub fn ec2_endpoint(&self) -> String {
        self.ec2
            .clone()
            .unwrap_or_else(|| format!("https://ec2.{}.amazonaws.com", self.region()))
    }
}

/// Settings read once from the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSettings {
    pub vpc_id: Option<String>,
    pub subnet_ids: Vec<String>,
    pub logging: LogSettings,
    pub stack_id: String,
    pub transit_gateway_attachment_id: Option<String>,
    pub appliance_mode: String,
    pub route_targets: Vec<RouteTarget>,
    pub metrics: MetricsSettings,
    pub endpoints: EndpointSettings,
    pub convergence_timeout: Option<Duration>,
}

impl EnvironmentSettings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let subnet_ids = var("SUBNET_IDS")
            .map(|ids| {
                ids.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let destination = match var("S3_LOG_BUCKET_NAME") {
            Some(bucket) if bucket != NOT_CONFIGURED => Some(bucket),
            _ => var("CLOUDWATCH_LOG_GROUP_NAME"),
        };

        let route_targets = [
            ("VPC_TGW_ATTACHMENT_AZ_1", "VPC_TGW_ATTACHMENT_ROUTE_TABLE_ID_1"),
            ("VPC_TGW_ATTACHMENT_AZ_2", "VPC_TGW_ATTACHMENT_ROUTE_TABLE_ID_2"),
        ]
        .iter()
        .filter_map(|&(az, table)| {
            Some(RouteTarget {
                availability_zone: var(az)?,
                route_table_id: var(table)?,
            })
        })
        .collect();

        let convergence_timeout = match var("CONVERGENCE_TIMEOUT_SECS") {
            Some(value) => match value.parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    return Err(ConfigError::InvalidEnvironment {
                        name: "CONVERGENCE_TIMEOUT_SECS",
                        value,
                    })
                }
            },
            None => None,
        };

        Ok(Self {
            vpc_id: var("VPC_ID"),
            subnet_ids,
            logging: LogSettings {
                destination_type: var("LOG_DESTINATION_TYPE"),
                destination,
                log_type: var("LOG_TYPE"),
                retention_in_days: var("LOG_RETENTION_IN_DAYS"),
            },
            stack_id: var("STACK_ID").unwrap_or_default(),
            transit_gateway_attachment_id: var("TRANSIT_GATEWAY_ATTACHMENT_ID"),
            appliance_mode: var("TRANSIT_GATEWAY_ATTACHMENT_APPLIANCE_MODE")
                .unwrap_or_else(|| "enable".to_string()),
            route_targets,
            metrics: MetricsSettings {
                send_anonymous_metrics: var("SEND_ANONYMOUS_METRICS")
                    .is_some_and(|v| v.eq_ignore_ascii_case("yes")),
                url: var("METRICS_URL"),
                solution_id: var("SOLUTION_ID"),
            },
            endpoints: EndpointSettings {
                region: var("AWS_REGION"),
                network_firewall: var("NETWORK_FIREWALL_ENDPOINT"),
                ec2: var("EC2_ENDPOINT"),
            },
            convergence_timeout,
        })
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            convergence_timeout: self.convergence_timeout,
            ..ReconcileOptions::default()
        }
    }
}
