use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use nfw_automation::api::http::{HttpFirewallApi, HttpNetworkApi, RetryPolicy};
use nfw_automation::api::memory::{InMemoryFirewallApi, InMemoryNetworkApi};
use nfw_automation::api::RouteTable;
use nfw_automation::config::DEFAULT_FIREWALL_DIR;
use nfw_automation::{
    update_appliance_mode, AutomationError, ConfigReader, ConfigValidator, Deployment,
    EnvironmentSettings, FirewallApi, MetricsReporter, NetworkApi, ValidationError,
};

#[derive(Parser)]
#[command(name = "nfw")]
#[command(about = "Validate and deploy declarative network firewall configurations", long_about = None)]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "LOG_FORMAT_JSON", default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TreeArgs {
    /// Directory holding the firewall files, relative to the base directory
    #[arg(long, default_value = DEFAULT_FIREWALL_DIR)]
    dir: PathBuf,

    /// Directory that file references in the configuration are resolved against
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Run against an in-process simulated backend instead of the remote services
    #[arg(long, default_value_t = false)]
    simulate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every firewall, policy and rule group file without changing anything
    Validate {
        #[command(flatten)]
        tree: TreeArgs,
    },

    /// Reconcile the remote firewalls with the configuration tree
    Deploy {
        #[command(flatten)]
        tree: TreeArgs,

        /// Print the per-firewall reports as JSON
        #[arg(long, default_value_t = false)]
        report: bool,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records to tracing: {}", e);
    }
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }
}

/// The remote backends selected for this run.
struct Backends {
    firewall: Box<dyn FirewallApi>,
    network: Box<dyn NetworkApi>,
}

impl Backends {
    fn connect(settings: &EnvironmentSettings, simulate: bool) -> Result<Self, AutomationError> {
        if simulate {
            log::info!("Using the simulated backend");
            let network = InMemoryNetworkApi::new();
            for target in &settings.route_targets {
                network.add_route_table(RouteTable {
                    route_table_id: target.route_table_id.clone(),
                    routes: Vec::new(),
                });
            }
            let zones: Vec<String> = settings
                .route_targets
                .iter()
                .map(|t| t.availability_zone.clone())
                .collect();
            let firewall = if zones.is_empty() {
                InMemoryFirewallApi::new()
            } else {
                InMemoryFirewallApi::new().with_zones(zones)
            };
            return Ok(Self {
                firewall: Box::new(firewall),
                network: Box::new(network),
            });
        }

        let firewall_endpoint = settings.endpoints.network_firewall_endpoint();
        let ec2_endpoint = settings.endpoints.ec2_endpoint();
        log::debug!("Firewall endpoint: {}, network endpoint: {}", firewall_endpoint, ec2_endpoint);
        let firewall = HttpFirewallApi::new(firewall_endpoint, RetryPolicy::default())
            .map_err(nfw_automation::ReconcileError::from)?;
        let network = HttpNetworkApi::new(ec2_endpoint, RetryPolicy::default())
            .map_err(nfw_automation::ReconcileError::from)?;
        Ok(Self {
            firewall: Box::new(firewall),
            network: Box::new(network),
        })
    }
}

async fn validate(settings: &EnvironmentSettings, tree: &TreeArgs) -> Result<(), AutomationError> {
    let backends = Backends::connect(settings, tree.simulate)?;
    let reader = ConfigReader::new(&tree.base_dir);
    let reporter = MetricsReporter::new(settings.metrics.clone(), settings.logging.clone());

    let mut validator = ConfigValidator::new(backends.firewall.as_ref(), &reader).with_reporter(&reporter);
    match validator.validate(&tree.dir).await {
        Ok(metrics) => {
            log::info!("Validation succeeded for {} firewall(s)", metrics.number_of_firewalls);
            Ok(())
        }
        Err(ValidationError::InvalidFiles(records)) => {
            for record in &records {
                eprintln!("{}", record);
            }
            Err(ValidationError::InvalidFiles(records).into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn deploy(
    settings: &EnvironmentSettings,
    tree: &TreeArgs,
    report: bool,
) -> Result<(), AutomationError> {
    let backends = Backends::connect(settings, tree.simulate)?;
    let reader = ConfigReader::new(&tree.base_dir);

    update_appliance_mode(
        backends.network.as_ref(),
        settings.transit_gateway_attachment_id.as_deref(),
        &settings.appliance_mode,
    )
    .await;

    let reports = Deployment::new(
        backends.firewall.as_ref(),
        backends.network.as_ref(),
        &reader,
        settings,
    )
    .run(&tree.dir)
    .await?;

    log::info!("Deployed {} firewall(s)", reports.len());
    if report {
        match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{}", json),
            Err(e) => log::warn!("Failed to serialize deployment reports: {}", e),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let settings = match EnvironmentSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match &cli.command {
        Commands::Validate { tree } => validate(&settings, tree).await,
        Commands::Deploy { tree, report } => deploy(&settings, tree, *report).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
