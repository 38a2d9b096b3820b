//! Bulwark - security convergence operator for storage clusters

use std::sync::Arc;

use clap::Parser;
use kube::{Api, Client, CustomResourceExt};

use bulwark_common::crd::StorageCluster;
use bulwark_common::telemetry::init_logging;
use bulwark_operator::controller::{self, Context, KubeClusterClient};
use bulwark_operator::{ComponentRegistry, OperatorConfig};
use bulwark_security::{
    KubeObjectStore, ObjectStore, OsEntropy, SdkConnectionProvider, SecurityReconciler,
};

/// Bulwark - provisions credentials and guest access policy for storage clusters
#[derive(Parser, Debug)]
#[command(name = "bulwark", version, about, long_about = None)]
struct Cli {
    /// Print the StorageCluster CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&StorageCluster::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_logging(cli.config.log_config())?;
    run_controller(cli.config).await
}

async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default().await?;

    let store: Arc<dyn ObjectStore> = Arc::new(KubeObjectStore::new(client.clone()));
    let connections = Arc::new(SdkConnectionProvider::new(store.clone()));
    let security = SecurityReconciler::new(
        store,
        connections,
        Arc::new(OsEntropy),
        config.security_config(),
    );

    let ctx = Arc::new(Context::new(
        Arc::new(KubeClusterClient::new(client.clone())),
        ComponentRegistry::with_defaults(security),
    ));

    let clusters: Api<StorageCluster> = match config.watch_namespace.as_deref() {
        Some(namespace) => {
            tracing::info!(namespace = %namespace, "watching a single namespace");
            Api::namespaced(client, namespace)
        }
        None => Api::all(client),
    };

    controller::run(clusters, ctx).await;
    tracing::info!("controller stopped");
    Ok(())
}
