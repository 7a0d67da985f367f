//! Offline and dry-run validation of a firewall configuration tree.
//!
//! Every firewall file is walked down to its rule group files. Problems are
//! collected as [`InvalidFileRecord`]s instead of stopping at the first one,
//! and reported together at the end of the run.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::api::{ApiError, FirewallApi};
use crate::config::{ConfigReader, PolicySpec};
use crate::error::{ConfigError, ValidationError};
use crate::metrics::{MetricsReporter, ValidationMetrics};

pub const FILE_NOT_AVAILABLE: &str =
    "The file in the attribute path is not available in the configuration.";
pub const FIREWALL_FIELDS_REQUIRED: &str =
    "FirewallName and FirewallPolicyArn are required in the firewall.";
pub const RULE_CONTENT_CONFLICT: &str = "Both RuleGroup and Rules have data, You must provide either the rule group setting or a Rules setting, but not both. ";
pub const RULE_CONTENT_MISSING: &str = "Either RuleGroup or Rules must be provided.";
pub const RULES_PATH_INVALID: &str = "Rules attribute has invalid file path. ";

/// A file that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidFileRecord {
    pub path: String,
    /// The file whose reference led to `path`.
    pub referenced_in_file: String,
    pub error: String,
}

impl fmt::Display for InvalidFileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "path: {}, referencedInFile: {}, error: {}",
            self.path, self.referenced_in_file, self.error
        )
    }
}

/// Validator for a firewall configuration tree.
pub struct ConfigValidator<'a> {
    api: &'a dyn FirewallApi,
    reader: &'a ConfigReader,
    reporter: Option<&'a MetricsReporter>,
    invalid_files: Vec<InvalidFileRecord>,
    metrics: ValidationMetrics,
}

impl<'a> ConfigValidator<'a> {
    pub fn new(api: &'a dyn FirewallApi, reader: &'a ConfigReader) -> Self {
        Self {
            api,
            reader,
            reporter: None,
            invalid_files: Vec::new(),
            metrics: ValidationMetrics::default(),
        }
    }

    /// Sends the run's counts through `reporter` when validation succeeds.
    pub fn with_reporter(mut self, reporter: &'a MetricsReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn invalid_files(&self) -> &[InvalidFileRecord] {
        &self.invalid_files
    }

    pub fn metrics(&self) -> &ValidationMetrics {
        &self.metrics
    }

    /// Validates every firewall file in `dir`.
    pub async fn validate<P: AsRef<Path>>(
        &mut self,
        dir: P,
    ) -> Result<ValidationMetrics, ValidationError> {
        self.invalid_files.clear();
        self.metrics = ValidationMetrics::default();

        log::info!("Starting firewall config validation");
        let walked = self.walk(dir.as_ref()).await;

        log::info!("Number of invalid files: {}", self.invalid_files.len());
        log::info!("-----------INVALID FILES START-----------");
        for record in &self.invalid_files {
            log::error!("{}", record);
        }
        log::info!("-----------INVALID FILES END--------------");

        if let Err(e) = walked {
            log::error!("{}", e);
            return Err(ValidationError::Failed(e.to_string()));
        }
        if !self.invalid_files.is_empty() {
            return Err(ValidationError::InvalidFiles(self.invalid_files.clone()));
        }

        if let Some(reporter) = self.reporter {
            reporter.send(&self.metrics).await;
        }
        Ok(self.metrics.clone())
    }

    async fn walk(&mut self, dir: &Path) -> Result<(), ConfigError> {
        let files = self.reader.firewall_files(dir)?;
        self.metrics.number_of_firewalls = files.len();

        for file in files {
            let file_name = file.display().to_string();
            log::info!("Validating the file paths for the firewall file named: {}", file_name);
            let firewall = self.reader.load_firewall(&file)?;

            if !firewall.has_required_fields() {
                self.record(&file_name, &file_name, FIREWALL_FIELDS_REQUIRED);
                if firewall.firewall_policy_arn.trim().is_empty() {
                    continue;
                }
            }

            let policy_ref = firewall.firewall_policy_arn.as_str();
            let policy = match self.reader.load_policy(policy_ref) {
                Ok(policy) => policy,
                Err(e) => {
                    log::info!("Failed to validate the firewall policy: {}", e);
                    self.record(&file_name, &file_name, FILE_NOT_AVAILABLE);
                    continue;
                }
            };
            self.metrics.number_of_policies += 1;
            self.dry_run_policy(&policy, policy_ref, &file_name).await;

            let stateful = &policy.firewall_policy.stateful_rule_group_references;
            self.metrics.number_of_stateful_rule_groups += stateful.len();
            for reference in stateful {
                self.validate_rule_group(&reference.resource_arn, policy_ref)
                    .await;
            }

            let stateless = &policy.firewall_policy.stateless_rule_group_references;
            self.metrics.number_of_stateless_rule_groups += stateless.len();
            for reference in stateless {
                self.validate_rule_group(&reference.resource_arn, policy_ref)
                    .await;
            }
        }
        Ok(())
    }

    async fn dry_run_policy(&mut self, policy: &PolicySpec, policy_ref: &str, firewall_file: &str) {
        let result = self.api.create_firewall_policy(&policy.create_request(true)).await;
        self.record_dry_run("firewall policy", result.map(|_| ()), policy_ref, firewall_file);
    }

    async fn validate_rule_group(&mut self, reference: &str, policy_ref: &str) {
        let document = match self.reader.load_rule_group_document(reference) {
            Ok(document) => document,
            Err(e) => {
                log::debug!("Failed to load rule group {}: {}", reference, e);
                self.record(reference, policy_ref, FILE_NOT_AVAILABLE);
                return;
            }
        };

        let rules = match (&document.rule_group, &document.rules) {
            (Some(_), Some(_)) => {
                log::debug!("Rule group file {} has both Rules and RuleGroup fields", reference);
                self.record(reference, policy_ref, RULE_CONTENT_CONFLICT);
                return;
            }
            (None, None) => {
                self.record(reference, policy_ref, RULE_CONTENT_MISSING);
                return;
            }
            (Some(_), None) => None,
            (None, Some(rules_ref)) => {
                self.metrics.number_of_suricata_rules += 1;
                match self.reader.read_rules(rules_ref) {
                    Some(text) => Some(text),
                    None => {
                        let message = format!("{}{}", RULES_PATH_INVALID, rules_ref);
                        self.record(reference, policy_ref, &message);
                        return;
                    }
                }
            }
        };

        let result = self
            .api
            .create_rule_group(&document.dry_run_request(rules))
            .await;
        self.record_dry_run("rule group", result.map(|_| ()), reference, policy_ref);
    }

    fn record_dry_run(
        &mut self,
        kind: &str,
        result: Result<(), ApiError>,
        path: &str,
        referenced_in_file: &str,
    ) {
        match result {
            Ok(()) => log::debug!("Dry run create {} passed for {}", kind, path),
            Err(ApiError::Validation { message, .. }) => {
                log::debug!("Dry run create {} rejected {}: {}", kind, path, message);
                self.record(path, referenced_in_file, &message);
            }
            Err(e) => log::warn!("Dry run create {} failed for {}: {}", kind, path, e),
        }
    }

    fn record(&mut self, path: &str, referenced_in_file: &str, error: &str) {
        self.invalid_files.push(InvalidFileRecord {
            path: path.to_string(),
            referenced_in_file: referenced_in_file.to_string(),
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::InMemoryFirewallApi;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn firewall(policy: &str) -> String {
        format!(r#"{{"FirewallName": "fw", "FirewallPolicyArn": "{}"}}"#, policy)
    }

    fn policy(stateless: &[&str], stateful: &[&str]) -> String {
        let stateless: Vec<String> = stateless
            .iter()
            .enumerate()
            .map(|(i, r)| format!(r#"{{"ResourceArn": "{}", "Priority": {}}}"#, r, i + 1))
            .collect();
        let stateful: Vec<String> = stateful
            .iter()
            .map(|r| format!(r#"{{"ResourceArn": "{}"}}"#, r))
            .collect();
        format!(
            r#"{{"FirewallPolicyName": "p", "FirewallPolicy": {{
                "StatelessDefaultActions": ["aws:forward_to_sfe"],
                "StatelessFragmentDefaultActions": ["aws:forward_to_sfe"],
                "StatelessRuleGroupReferences": [{}],
                "StatefulRuleGroupReferences": [{}]
            }}}}"#,
            stateless.join(","),
            stateful.join(",")
        )
    }

    const STATELESS_GROUP: &str = r#"{"RuleGroupName": "sl", "Type": "STATELESS", "Capacity": 10, "RuleGroup": {"RulesSource": {}}}"#;

    async fn run(temp: &TempDir, api: &InMemoryFirewallApi) -> (Result<ValidationMetrics, ValidationError>, Vec<InvalidFileRecord>) {
        let reader = ConfigReader::new(temp.path());
        let mut validator = ConfigValidator::new(api, &reader);
        let result = validator.validate("firewalls").await;
        (result, validator.invalid_files().to_vec())
    }

    #[tokio::test]
    async fn test_valid_tree_counts() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "firewalls/fw.json", &firewall("policies/p.json"));
        write(temp.path(), "policies/p.json", &policy(&["rg/sl.json"], &["rg/sf.json"]));
        write(temp.path(), "rg/sl.json", STATELESS_GROUP);
        write(
            temp.path(),
            "rg/sf.json",
            r#"{"RuleGroupName": "sf", "Type": "STATEFUL", "Capacity": 10, "Rules": "rules/sf.rules"}"#,
        );
        write(temp.path(), "rules/sf.rules", "pass tcp any any -> any any (sid:1;)");

        let api = InMemoryFirewallApi::new();
        let (result, invalid) = run(&temp, &api).await;
        let metrics = result.unwrap();
        assert!(invalid.is_empty());
        assert_eq!(metrics.number_of_firewalls, 1);
        assert_eq!(metrics.number_of_policies, 1);
        assert_eq!(metrics.number_of_stateful_rule_groups, 1);
        assert_eq!(metrics.number_of_stateless_rule_groups, 1);
        assert_eq!(metrics.number_of_suricata_rules, 1);

        // dry runs leave nothing behind
        assert_eq!(api.call_count("CreateFirewallPolicy"), 1);
        assert_eq!(api.call_count("CreateRuleGroup"), 2);
        assert!(api.rule_group_arns().is_empty());
    }

    #[tokio::test]
    async fn test_missing_policy_points_at_firewall_file() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "firewalls/fw.json", &firewall("policies/missing.json"));

        let api = InMemoryFirewallApi::new();
        let (result, invalid) = run(&temp, &api).await;
        assert!(matches!(result, Err(ValidationError::InvalidFiles(_))));

        let firewall_file = temp.path().join("firewalls/fw.json").display().to_string();
        assert_eq!(
            invalid,
            vec![InvalidFileRecord {
                path: firewall_file.clone(),
                referenced_in_file: firewall_file,
                error: FILE_NOT_AVAILABLE.to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_required_fields() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "firewalls/fw.json", r#"{"FirewallName": "fw"}"#);

        let api = InMemoryFirewallApi::new();
        let (result, invalid) = run(&temp, &api).await;
        assert!(result.is_err());
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].error, FIREWALL_FIELDS_REQUIRED);
    }

    #[tokio::test]
    async fn test_conflicting_rule_group_reported_per_reference() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "firewalls/fw.json", &firewall("policies/p.json"));
        write(
            temp.path(),
            "policies/p.json",
            &policy(&["rg/both.json"], &["rg/both.json"]),
        );
        write(
            temp.path(),
            "rg/both.json",
            r#"{"RuleGroupName": "both", "Type": "STATEFUL", "Capacity": 10, "Rules": "r.rules", "RuleGroup": {}}"#,
        );

        let api = InMemoryFirewallApi::new();
        let (_, invalid) = run(&temp, &api).await;
        assert_eq!(invalid.len(), 2);
        for record in &invalid {
            assert_eq!(record.path, "rg/both.json");
            assert_eq!(record.referenced_in_file, "policies/p.json");
            assert!(record.error.starts_with("Both RuleGroup and Rules have data"));
        }
        assert_eq!(api.call_count("CreateRuleGroup"), 0);
    }

    #[tokio::test]
    async fn test_missing_and_empty_rule_files() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "firewalls/fw.json", &firewall("policies/p.json"));
        write(
            temp.path(),
            "policies/p.json",
            &policy(&["rg/missing.json"], &["rg/empty.json"]),
        );
        write(
            temp.path(),
            "rg/empty.json",
            r#"{"RuleGroupName": "e", "Type": "STATEFUL", "Capacity": 10, "Rules": "rules/empty.rules"}"#,
        );
        write(temp.path(), "rules/empty.rules", "");

        let api = InMemoryFirewallApi::new();
        let (_, invalid) = run(&temp, &api).await;
        assert_eq!(invalid.len(), 2);
        assert_eq!(invalid[0].path, "rg/empty.json");
        assert_eq!(
            invalid[0].error,
            "Rules attribute has invalid file path. rules/empty.rules"
        );
        assert_eq!(invalid[1].path, "rg/missing.json");
        assert_eq!(invalid[1].error, FILE_NOT_AVAILABLE);
    }

    #[tokio::test]
    async fn test_dry_run_validation_errors_are_recorded() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "firewalls/fw.json", &firewall("policies/p.json"));
        write(temp.path(), "policies/p.json", &policy(&["rg/sl.json"], &[]));
        write(temp.path(), "rg/sl.json", STATELESS_GROUP);

        let api = InMemoryFirewallApi::new();
        api.fail_on(
            "CreateRuleGroup",
            Some("sl"),
            ApiError::Validation {
                code: "UnexpectedParameter".into(),
                message: "Unexpected key 'Foo' found in params".into(),
            },
        );
        api.fail_on(
            "CreateFirewallPolicy",
            None,
            ApiError::Service {
                code: "InternalServerError".into(),
                message: "ignored".into(),
            },
        );

        let (_, invalid) = run(&temp, &api).await;
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].path, "rg/sl.json");
        assert_eq!(invalid[0].error, "Unexpected key 'Foo' found in params");
    }

    #[tokio::test]
    async fn test_unreadable_firewall_fails_generically() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "firewalls/fw.json", "{ broken");

        let api = InMemoryFirewallApi::new();
        let (result, _) = run(&temp, &api).await;
        assert!(matches!(result, Err(ValidationError::Failed(_))));
    }
}
