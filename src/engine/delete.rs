// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Finalizer management and deletion. A ChartDeployment is only released
//! from its finalizer after every cluster it was synced to has confirmed
//! the uninstall, or is positively known to have nothing to uninstall.

use std::sync::Arc;

use kube::api::{Patch, PatchParams};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::constants::{FINALIZER_NAME, LEGACY_FINALIZER_NAME};
use crate::deploy::UninstallError;
use crate::error::{AggregateError, Result};
use crate::registry::ClusterInfo;
use crate::types::ChartDeployment;
use crate::watch::handle::ClusterWatchHandle;

use super::controller::Controller;

impl Controller {
    /// Attach our finalizer if it is not present yet. The write is a
    /// minimal merge patch, never a full object replace.
    pub(crate) async fn ensure_finalizer(
        self: &Arc<Self>,
        handle: &Arc<ClusterWatchHandle>,
        cd: &ChartDeployment,
    ) -> Result<()> {
        if cd.finalizers().iter().any(|f| f == FINALIZER_NAME) {
            return Ok(());
        }

        let api = Self::deployments_api(handle.client.clone(), &cd.namespace().unwrap_or_default());
        let patch = serde_json::json!({"metadata": {"finalizers": [FINALIZER_NAME]}});
        api.patch(&cd.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(name = %cd.name_any(), "finalizer attached");
        Ok(())
    }

    /// Clear the finalizer list with a minimal merge patch. An object
    /// already gone counts as done.
    pub(crate) async fn remove_finalizer(
        self: &Arc<Self>,
        cd: &ChartDeployment,
        observed: Option<&str>,
    ) -> Result<()> {
        let has_ours = cd
            .finalizers()
            .iter()
            .any(|f| f == FINALIZER_NAME || f == LEGACY_FINALIZER_NAME);
        if !has_ours {
            return Ok(());
        }

        let client = self
            .client_for_cluster_name(observed.unwrap_or_default())
            .await?;
        let api = Self::deployments_api(client, &cd.namespace().unwrap_or_default());
        let patch = serde_json::json!({"metadata": {"finalizers": null}});
        match api
            .patch(&cd.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                info!(name = %cd.name_any(), "successfully removed finalizers");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(name = %cd.name_any(), "object already gone while removing finalizer");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A delete notification is stale when the live object carries a
    /// different UID than the event. Stale events are dropped without
    /// touching anything.
    pub(crate) async fn is_stale_delete_event(
        self: &Arc<Self>,
        handle: &Arc<ClusterWatchHandle>,
        cd: &ChartDeployment,
    ) -> Result<bool> {
        let api = Self::deployments_api(handle.client.clone(), &cd.namespace().unwrap_or_default());
        let current = match api.get(&cd.name_any()).await {
            Ok(current) => current,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                // object really is gone, continue with the delete
                debug!(name = %cd.name_any(), "not found when checking delete event, proceeding");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        if current.uid() != cd.uid() {
            warn!(
                name = %cd.name_any(),
                event_uid = ?cd.uid(),
                live_uid = ?current.uid(),
                "received old delete event, dropping"
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Uninstall the releases belonging to a ChartDeployment from every
    /// target cluster, then release the finalizer.
    pub async fn delete_chart_deployment(
        self: &Arc<Self>,
        cd: &ChartDeployment,
        observed: Option<&str>,
    ) -> Result<()> {
        let clusters: Vec<ClusterInfo> = if cd.spec.install_to_all_clusters {
            self.registry.list_clusters().await?
        } else {
            match self
                .registry
                .get_cluster(&Self::deploy_cluster_name(cd, observed))
                .await
            {
                Ok(info) => vec![info],
                Err(e) if e.is_not_found() => {
                    // nothing to uninstall from a cluster that is gone
                    warn!(name = %cd.name_any(), "target cluster not found when deleting, ignoring");
                    return self.remove_finalizer(cd, observed).await;
                }
                Err(e) => return Err(e),
            }
        };

        let release_name = cd.release_name();
        let release_namespace = cd.release_namespace();
        let mut failures: Vec<(String, UninstallError)> = Vec::new();

        for info in clusters {
            let mut target = info.clone();
            target.namespace = release_namespace.clone();
            info!(name = %cd.name_any(), cluster = %target.name, "deleting release from cluster");

            match self
                .deployer
                .uninstall(&target, &release_namespace, &release_name)
                .await
            {
                Ok(()) => {}
                Err(UninstallError::ReleaseNotFound) => {
                    warn!(release = %release_name, cluster = %target.name, "release not found when deleting, ignoring");
                }
                Err(UninstallError::ObjectsNotFound(msg)) => {
                    warn!(release = %release_name, cluster = %target.name, detail = %msg, "release objects already gone, ignoring");
                }
                Err(e) => failures.push((target.name.clone(), e)),
            }
        }

        if !failures.is_empty() {
            // a delete that can never build its objects would otherwise
            // hold the finalizer forever
            if failures.iter().all(|(_, e)| e.is_resource_build()) {
                warn!(
                    name = %cd.name_any(),
                    "unable to build kubernetes resources when deleting, ignoring this error"
                );
            } else {
                let mut agg = AggregateError::new();
                for (cluster, e) in failures {
                    agg.push(cluster, e);
                }
                return agg.into_result();
            }
        }

        self.remove_finalizer(cd, observed).await
    }

    /// Entry point for watcher delete notifications. Filters stale
    /// events, runs the delete, records the outcome as an event.
    pub(crate) async fn handle_delete_event(
        self: &Arc<Self>,
        handle: &Arc<ClusterWatchHandle>,
        cd: ChartDeployment,
    ) {
        let key = crate::watch::key::WorkKey::for_deployment(handle.cluster.as_deref(), &cd);
        info!(key = %key, "received delete event");

        match self.is_stale_delete_event(handle, &cd).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                handle.events.failed_delete(&cd, &e).await;
                warn!(key = %key, error = %e, "stale delete check failed, requeuing");
                handle.queue.add_rate_limited(key).await;
                return;
            }
        }

        match self.delete_chart_deployment(&cd, handle.cluster.as_deref()).await {
            Ok(()) => {
                handle
                    .events
                    .successful_delete(&cd, &format!("Deleted ChartDeployment: {}", cd.name_any()))
                    .await;
            }
            Err(e) => {
                handle.events.failed_delete(&cd, &e).await;
                warn!(key = %key, error = %e, "delete failed, requeuing");
                handle.queue.add_rate_limited(key).await;
            }
        }
    }
}
