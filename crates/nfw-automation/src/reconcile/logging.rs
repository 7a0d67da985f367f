//! Firewall log delivery.

use std::collections::BTreeMap;

use crate::api::{
    ApiError, FirewallApi, LogDestinationConfig, LogDestinationType, LogType, LoggingConfiguration,
};
use crate::config::LogSettings;

const BOTH_LOG_TYPES: &str = "EnableBoth";

/// Derives the log destinations requested by `settings`.
///
/// Returns `None` when no destination type is configured or the type is not
/// one of `S3` and `CloudWatchLogs`.
pub fn build_log_destinations(settings: &LogSettings) -> Option<Vec<LogDestinationConfig>> {
    let destination_type = match settings.destination_type.as_deref() {
        Some(t) if t.eq_ignore_ascii_case("S3") => LogDestinationType::S3,
        Some(t) if t.eq_ignore_ascii_case("CloudWatchLogs") => LogDestinationType::CloudWatchLogs,
        Some(other) => {
            log::warn!("Unsupported log destination type '{}', skipping logging", other);
            return None;
        }
        None => return None,
    };
    let destination = settings.destination.clone().unwrap_or_default();

    let log_types = match settings.log_type.as_deref() {
        Some(t) if t.eq_ignore_ascii_case(BOTH_LOG_TYPES) => vec![LogType::Alert, LogType::Flow],
        Some(t) if t.eq_ignore_ascii_case("FLOW") => vec![LogType::Flow],
        _ => vec![LogType::Alert],
    };

    let configs = log_types
        .into_iter()
        .map(|log_type| LogDestinationConfig {
            log_type,
            log_destination_type: destination_type,
            log_destination: match destination_type {
                LogDestinationType::S3 => BTreeMap::from([
                    ("bucketName".to_string(), destination.clone()),
                    ("prefix".to_string(), prefix(log_type).to_string()),
                ]),
                _ => BTreeMap::from([("logGroup".to_string(), destination.clone())]),
            },
        })
        .collect();
    Some(configs)
}

fn prefix(log_type: LogType) -> &'static str {
    match log_type {
        LogType::Alert => "alerts",
        LogType::Flow => "flow",
    }
}

/// Replaces the firewall's log destinations with `configs`.
///
/// The service accepts a single destination change per call, so existing
/// entries are removed one by one before the new ones are added one by one.
/// Failures are logged and swallowed.
pub async fn apply_logging(api: &dyn FirewallApi, firewall_name: &str, configs: &[LogDestinationConfig]) {
    if let Err(e) = replace_destinations(api, firewall_name, configs).await {
        log::error!(
            "Failed to configure logging for firewall {}: {}",
            firewall_name,
            e
        );
    }
}

async fn replace_destinations(
    api: &dyn FirewallApi,
    firewall_name: &str,
    configs: &[LogDestinationConfig],
) -> Result<(), ApiError> {
    let mut current = api.describe_logging_configuration(firewall_name).await?;
    log::debug!(
        "Firewall {} has {} log destination(s)",
        firewall_name,
        current.log_destination_configs.len()
    );

    while current.log_destination_configs.pop().is_some() {
        current = api.update_logging_configuration(firewall_name, &current).await?;
    }

    let mut desired = LoggingConfiguration::default();
    for config in configs {
        log::info!(
            "Adding {:?} log destination {:?} to firewall {}",
            config.log_type,
            config.log_destination_type,
            firewall_name
        );
        desired.log_destination_configs.push(config.clone());
        desired = api.update_logging_configuration(firewall_name, &desired).await?;
    }
    Ok(())
}
