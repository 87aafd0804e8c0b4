// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Self-healing for per-cluster watch sessions.
//!
//! Known limitation: a watch that is started but has silently gone stale
//! (a long-lived connection to a since-recovered cluster) is not detected
//! here. Only never-started or torn-down watches are retried.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::engine::controller::Controller;
use crate::watch::session;

pub struct ClusterWatchSupervisor {
    ctrl: Arc<Controller>,
}

impl ClusterWatchSupervisor {
    pub fn new(ctrl: Arc<Controller>) -> Self {
        Self { ctrl }
    }

    /// Probe every catalog cluster on a fixed interval and start watches
    /// that are missing. Blocks until shutdown.
    pub async fn run(self) {
        info!("start cluster watch supervisor");
        let mut shutdown = self.ctrl.shutdown.clone();

        // let the main controller settle first
        let grace = Duration::from_secs(self.ctrl.config.supervisor_grace_secs);
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(grace) => {}
        }

        let interval = Duration::from_secs(self.ctrl.config.supervisor_interval_secs);
        loop {
            self.tick().await;
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn tick(&self) {
        let clusters = match self.ctrl.registry.list_clusters().await {
            Ok(clusters) => clusters,
            Err(e) => {
                error!(error = %e, "get all cluster info for watch supervisor failed");
                return;
            }
        };

        for info in clusters {
            let client = match info.to_client().await {
                Ok(client) => client,
                Err(e) => {
                    warn!(cluster = %info.name, error = %e, "init client for cluster failed");
                    continue;
                }
            };

            // cheap reachability probe, unreachable clusters are skipped
            // this cycle rather than restarted into a wedged state
            match client.apiserver_version().await {
                Ok(version) => {
                    debug!(cluster = %info.name, version = %version.git_version, "cluster reachable");
                }
                Err(e) => {
                    warn!(cluster = %info.name, error = %e, "cluster version check failed, skipping");
                    continue;
                }
            }

            if !self.ctrl.watches.contains(&info.name).await {
                let name = info.name.clone();
                match session::start(Arc::clone(&self.ctrl), Some(info)).await {
                    Ok(_) => info!(cluster = %name, "restarted cluster watch"),
                    Err(e) => error!(cluster = %name, error = %e, "restart cluster watch failed"),
                }
            }
        }
    }
}
