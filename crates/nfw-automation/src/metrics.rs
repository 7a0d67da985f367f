//! Anonymous usage metrics for validation runs.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{LogSettings, MetricsSettings};

/// Counts collected over one validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationMetrics {
    pub number_of_firewalls: usize,
    pub number_of_policies: usize,
    pub number_of_stateful_rule_groups: usize,
    pub number_of_stateless_rule_groups: usize,
    /// Rule groups defined by a rule text file.
    pub number_of_suricata_rules: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_destination_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct MetricsPayload<'a> {
    solution: Option<&'a str>,
    time_stamp: String,
    #[serde(rename = "UUID")]
    uuid: String,
    data: ValidationMetrics,
}

/// Posts [`ValidationMetrics`] to the metrics endpoint when enabled.
///
/// Delivery is best effort: failures are logged and never surface to the
/// caller.
#[derive(Debug, Clone)]
pub struct MetricsReporter {
    settings: MetricsSettings,
    logging: LogSettings,
    client: Option<reqwest::Client>,
}

impl MetricsReporter {
    /// Reporting is switched off when no HTTP client can be built.
    pub fn new(settings: MetricsSettings, logging: LogSettings) -> Self {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
        {
            Ok(client) => Some(client),
            Err(e) => {
                log::warn!("Failed to build metrics HTTP client, metrics disabled: {}", e);
                None
            }
        };
        Self::with_client(settings, logging, client)
    }

    fn with_client(
        settings: MetricsSettings,
        logging: LogSettings,
        client: Option<reqwest::Client>,
    ) -> Self {
        Self {
            settings,
            logging,
            client,
        }
    }

    /// A reporter that never sends anything.
    pub fn disabled() -> Self {
        Self::new(MetricsSettings::default(), LogSettings::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.send_anonymous_metrics
            && self.settings.url.is_some()
            && self.client.is_some()
    }

    fn payload(&self, metrics: &ValidationMetrics) -> serde_json::Value {
        let mut data = metrics.clone();
        data.log_type = self.logging.log_type.clone();
        data.log_destination_type = self.logging.destination_type.clone();

        let payload = MetricsPayload {
            solution: self.settings.solution_id.as_deref(),
            time_stamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            uuid: Uuid::new_v4().to_string(),
            data,
        };
        serde_json::to_value(payload).unwrap_or_default()
    }

    pub async fn send(&self, metrics: &ValidationMetrics) {
        log::info!(
            "Validated {} firewall(s), {} policy(ies), {} stateful and {} stateless rule group(s), {} rule text file(s)",
            metrics.number_of_firewalls,
            metrics.number_of_policies,
            metrics.number_of_stateful_rule_groups,
            metrics.number_of_stateless_rule_groups,
            metrics.number_of_suricata_rules
        );

        let (true, Some(url), Some(client)) = (
            self.settings.send_anonymous_metrics,
            self.settings.url.as_deref(),
            self.client.as_ref(),
        ) else {
            log::debug!("Anonymous metrics disabled");
            return;
        };

        let payload = self.payload(metrics);
        log::debug!("metrics data: {}", payload);
        match client.post(url).json(&payload).send().await {
            Ok(response) => log::debug!("Metrics response status: {}", response.status()),
            Err(e) => log::debug!("Failed to send metrics: {}", e),
        }
    }
}
