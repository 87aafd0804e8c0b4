// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use anyhow::Result;
use kube::Client;
use tracing::{info, warn};

use flotilla::bootstrap::wait_for_chart_deployment_crd;
use flotilla::config::Config;
use flotilla::deploy::helm::{HelmCliDeployer, HelmRepoIndexSource};
use flotilla::engine::Controller;
use flotilla::registry::local_cluster_info;
use flotilla::repo::RepoRefresher;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting Flotilla operator");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: catalog_namespace={} global_cluster={}",
        config.catalog_namespace, config.global_cluster_name
    );

    // Create Kubernetes client for the cluster we run in
    let kube_config = kube::Config::infer().await?;
    let local = local_cluster_info(&kube_config);
    let client = Client::try_from(kube_config)?;
    info!("Connected to Kubernetes cluster");

    // The controller cannot watch anything before its CRD exists
    info!("Waiting for ChartDeployment CRD to become available...");
    wait_for_chart_deployment_crd(&client).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let refresher = RepoRefresher::new(
        client.clone(),
        Arc::new(HelmRepoIndexSource::new(client.clone())),
        config.system_namespace.clone(),
        shutdown_rx.clone(),
    );
    tokio::spawn(refresher.run());

    let deployer = Arc::new(HelmCliDeployer::new());
    let controller = Controller::new(client, local, config, deployer, shutdown_rx);

    info!("Starting controller...");
    let mut controller_task = tokio::spawn(async move { controller.run().await });
    tokio::select! {
        res = &mut controller_task => {
            // the controller only returns once shutdown is signalled
            warn!("controller stopped unexpectedly");
            res??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            let _ = shutdown_tx.send(true);
            let _ = controller_task.await;
        }
    }

    Ok(())
}
