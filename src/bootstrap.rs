// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking utilities

use kube::{discovery::Discovery, Client};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::constants::crd::{POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS};
use crate::error::Result;

const GROUP: &str = "flotilla.geeko.me";

/// Wait for the ChartDeployment CRD to become available in the cluster.
/// This uses exponential backoff starting at POLL_INTERVAL_SECS seconds.
pub async fn wait_for_chart_deployment_crd(client: &Client) -> Result<()> {
    let mut interval = POLL_INTERVAL_SECS;

    loop {
        match chart_deployment_crd_exists(client).await {
            Ok(true) => {
                info!("ChartDeployment CRD ({}/v1) is available", GROUP);
                return Ok(());
            }
            Ok(false) => {
                info!(
                    "ChartDeployment CRD ({}/v1) not yet available, waiting {} seconds...",
                    GROUP, interval
                );
            }
            Err(e) => {
                warn!(
                    "Error checking for ChartDeployment CRD: {}, retrying in {} seconds...",
                    e, interval
                );
            }
        }

        sleep(Duration::from_secs(interval)).await;

        // Exponential backoff with max cap
        interval = (interval * 2).min(POLL_MAX_INTERVAL_SECS);
    }
}

/// Check if the ChartDeployment CRD exists by attempting to discover it.
/// Also used before watching a catalog cluster, so a cluster without the
/// CRD is skipped instead of wedging its watch.
pub async fn chart_deployment_crd_exists(client: &Client) -> Result<bool> {
    let discovery = Discovery::new(client.clone())
        .filter(&[GROUP])
        .run()
        .await?;

    for group in discovery.groups() {
        if group.name() == GROUP {
            for (ar, _) in group.recommended_resources() {
                if ar.kind == "ChartDeployment" && ar.version == "v1" {
                    return Ok(true);
                }
            }
        }
    }

    Ok(false)
}
