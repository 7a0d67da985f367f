//! Declarative reconciliation of network firewalls.
//!
//! A directory of JSON files describes firewalls, their policies and the
//! rule groups those policies reference. [`validation`] checks such a tree
//! without changing anything; [`runner`] drives the remote services until
//! they match it and then repairs the transit route tables.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod reconcile;
pub mod routing;
pub mod runner;
pub mod validation;

pub use api::{ApiError, FirewallApi, NetworkApi};
pub use config::{ConfigReader, EnvironmentSettings, ReconcileOptions};
pub use error::{AutomationError, ConfigError, ReconcileError, Result, RouteError, ValidationError};
pub use metrics::{MetricsReporter, ValidationMetrics};
pub use reconcile::{FirewallOutcome, FirewallPhase, FirewallReconciler, PolicyReconciler};
pub use routing::{update_appliance_mode, RouteRepairer, RouteStatus};
pub use runner::{Deployment, DeploymentReport};
pub use validation::{ConfigValidator, InvalidFileRecord};
