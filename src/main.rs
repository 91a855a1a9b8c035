//! Catalog Operator - service instance lifecycle against Open Service Brokers

use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use catalog_operator::controller::{spawn_workers, watch_instances, Context};
use catalog_operator::crd::{ServiceBroker, ServiceClass, ServiceInstance, API_GROUP};
use catalog_operator::DEFAULT_WORKER_COUNT;

/// Catalog Operator - reconciles ServiceInstances against OSB-compliant brokers
#[derive(Parser, Debug)]
#[command(name = "catalog-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches ServiceInstance resources, provisions and deprovisions them
    /// through their brokers, and polls asynchronous broker operations until
    /// they reach a terminal state.
    Controller(ControllerArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Number of workers per queue
    #[arg(long, env = "CATALOG_WORKERS", default_value_t = DEFAULT_WORKER_COUNT)]
    workers: usize,

    /// Send the OSB context object on provision requests
    #[arg(long, env = "CATALOG_OSB_CONTEXT_PROFILE")]
    osb_context_profile: bool,

    /// Identity sent as the organization and space GUID on provisions
    #[arg(long, env = "CATALOG_PLATFORM_IDENTITY", default_value = "kubernetes")]
    platform_identity: String,
}

impl Default for ControllerArgs {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKER_COUNT,
            osb_context_profile: false,
            platform_identity: "kubernetes".to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        // Generate CRD YAML for all catalog resources
        for crd in [
            serde_yaml::to_string(&ServiceInstance::crd()),
            serde_yaml::to_string(&ServiceClass::crd()),
            serde_yaml::to_string(&ServiceBroker::crd()),
        ] {
            let crd = crd.map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{crd}");
        }
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller(args)) => run_controller(args).await,
        None => run_controller(ControllerArgs::default()).await,
    }
}

/// Ensure all catalog CRDs are installed
///
/// The operator installs its own CRDs on startup using server-side apply so
/// the CRD versions always match the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("catalog-controller").force();

    tracing::info!("Installing ServiceInstance CRD...");
    crds.patch(
        &format!("serviceinstances.{API_GROUP}"),
        &params,
        &Patch::Apply(&ServiceInstance::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install ServiceInstance CRD: {}", e))?;

    tracing::info!("Installing ServiceClass CRD...");
    crds.patch(
        &format!("serviceclasses.{API_GROUP}"),
        &params,
        &Patch::Apply(&ServiceClass::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install ServiceClass CRD: {}", e))?;

    tracing::info!("Installing ServiceBroker CRD...");
    crds.patch(
        &format!("servicebrokers.{API_GROUP}"),
        &params,
        &Patch::Apply(&ServiceBroker::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install ServiceBroker CRD: {}", e))?;

    tracing::info!("All catalog CRDs installed/updated");
    Ok(())
}

/// Run the controller
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!("Starting catalog operator");

    let client = Client::try_default().await?;
    ensure_crds_installed(&client).await?;

    let ctx = Arc::new(
        Context::builder(client.clone())
            .osb_context_profile(args.osb_context_profile)
            .platform_identity(args.platform_identity)
            .build(),
    );

    let watch_ctx = ctx.clone();
    let watch_client = client.clone();
    let watch = tokio::spawn(async move {
        watch_instances(watch_ctx, watch_client).await;
    });

    let workers = spawn_workers(ctx, args.workers);
    tracing::info!(workers = args.workers, "Catalog operator running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping workers");

    watch.abort();
    for worker in workers {
        worker.abort();
    }
    Ok(())
}
