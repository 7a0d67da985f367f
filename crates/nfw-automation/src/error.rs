use std::path::PathBuf;
use thiserror::Error;

use crate::api::ApiError;
use crate::validation::InvalidFileRecord;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Route repair error: {0}")]
    Route(#[from] RouteError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON in '{path}': {source}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing required field '{field}' in '{path}'")]
    MissingField { path: PathBuf, field: &'static str },

    #[error("Invalid rule group '{name}': {reason}")]
    InvalidRuleGroup { name: String, reason: String },

    #[error("Rules file '{path}' is missing or empty")]
    EmptyRules { path: PathBuf },

    #[error("{0} must be in the environment variables")]
    MissingEnvironment(&'static str),

    #[error("Invalid value '{value}' for environment variable {name}")]
    InvalidEnvironment { name: &'static str, value: String },

    #[error("The stack id environment variable is undefined")]
    MissingStackId,

    #[error("Stack id suffix '{0}' leaves no room for a resource name")]
    StackIdTooLong(String),
}

#[derive(Error, Debug)]
pub enum ValidationError {
    /// One or more files failed validation. Every record is carried.
    #[error("Validation failed: Invalid Files.")]
    InvalidFiles(Vec<InvalidFileRecord>),

    /// Validation could not run to completion.
    #[error("Validation failed.")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Remote API error: {0}")]
    Api(#[from] ApiError),

    /// A rule group or policy mutation failed and every snapshot was replayed.
    #[error("{source} (rule groups rolled back, {} rollback failure(s))", .rollback_failures.len())]
    RolledBack {
        #[source]
        source: Box<ReconcileError>,
        rollback_failures: Vec<String>,
    },

    #[error("{operation} for '{name}' returned no resource ARN")]
    MissingArn { operation: &'static str, name: String },

    #[error("Firewall '{firewall_name}' did not converge within {waited_secs}s")]
    ConvergenceTimeout {
        firewall_name: String,
        waited_secs: u64,
    },
}

impl ReconcileError {
    /// Returns the rollback failures when this error carries a rollback.
    pub fn rollback_failures(&self) -> &[String] {
        match self {
            ReconcileError::RolledBack {
                rollback_failures, ..
            } => rollback_failures,
            _ => &[],
        }
    }
}

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("No firewall attachment found for availability zone '{0}'")]
    MissingAttachment(String),

    #[error("Expected only one item in the route table array. Received : {count}")]
    MultipleRouteTables { route_table_id: String, count: usize },

    #[error("Failed to repair route table '{route_table_id}': {source}")]
    Repair {
        route_table_id: String,
        #[source]
        source: ApiError,
    },
}

pub type Result<T> = std::result::Result<T, AutomationError>;
