// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Status subresource writes with optimistic concurrency handling.

use std::sync::Arc;

use kube::api::PostParams;
use kube::{Api, ResourceExt};
use tracing::{debug, warn};

use crate::error::Result;
use crate::hash;
use crate::types::{ChartDeployment, ChartDeploymentPhase};
use crate::watch::handle::ClusterWatchHandle;

use super::controller::Controller;

/// What a status write ended up doing.
#[derive(Debug, PartialEq, Eq)]
pub enum StatusOutcome {
    Updated,
    /// The object disappeared while we were retrying
    Gone,
}

/// Write the status subresource of `cd`. On a conflict the latest version
/// is fetched, the intended status is re-applied and the write retried
/// once. A 404 during that retry reports `Gone` instead of erroring.
pub async fn replace_status_with_retry(
    api: &Api<ChartDeployment>,
    cd: &ChartDeployment,
) -> Result<StatusOutcome> {
    let name = cd.name_any();
    let pp = PostParams::default();

    match api.replace_status(&name, &pp, serde_json::to_vec(cd)?).await {
        Ok(_) => Ok(StatusOutcome::Updated),
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            warn!(name = %name, "status update conflict, retrying");
            let mut origin = match api.get(&name).await {
                Ok(origin) => origin,
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    warn!(name = %name, "object vanished while retrying status update");
                    return Ok(StatusOutcome::Gone);
                }
                Err(e) => return Err(e.into()),
            };
            origin.status = cd.status.clone();
            api.replace_status(&name, &pp, serde_json::to_vec(&origin)?)
                .await?;
            Ok(StatusOutcome::Updated)
        }
        Err(e) => Err(e.into()),
    }
}

impl Controller {
    /// Set only the phase of a ChartDeployment. If the object turns out
    /// to be gone its releases are cleaned up instead.
    pub(crate) async fn update_phase(
        self: &Arc<Self>,
        handle: &Arc<ClusterWatchHandle>,
        cd: &ChartDeployment,
        phase: ChartDeploymentPhase,
    ) -> Result<()> {
        let mut request = cd.clone();
        request
            .status
            .get_or_insert_with(Default::default)
            .phase = Some(phase);
        self.write_status(handle, &request).await
    }

    /// Record a completed sync: the current unique hash plus phase Synced.
    pub(crate) async fn set_synced_status(
        self: &Arc<Self>,
        handle: &Arc<ClusterWatchHandle>,
        cd: &ChartDeployment,
    ) -> Result<()> {
        // hash before any further mutation of the copy
        let current = hash::unique_hash(cd);
        let mut request = cd.clone();
        let status = request.status.get_or_insert_with(Default::default);
        status.last_spec_hash = current;
        status.phase = Some(ChartDeploymentPhase::Synced);
        self.write_status(handle, &request).await
    }

    /// Record a partially completed fan-out: hash plus phase PartialSynced.
    /// The synced cluster list is carried on `cd` by the caller.
    pub(crate) async fn set_partial_synced_status(
        self: &Arc<Self>,
        handle: &Arc<ClusterWatchHandle>,
        cd: &ChartDeployment,
    ) -> Result<()> {
        let current = hash::unique_hash(cd);
        let mut request = cd.clone();
        let status = request.status.get_or_insert_with(Default::default);
        status.last_spec_hash = current;
        status.phase = Some(ChartDeploymentPhase::PartialSynced);
        self.write_status(handle, &request).await
    }

    /// Mark a failed sync and surface the error as a warning event.
    pub(crate) async fn set_failed_status(
        self: &Arc<Self>,
        handle: &Arc<ClusterWatchHandle>,
        cd: &ChartDeployment,
        error: &crate::error::FlotillaError,
    ) {
        handle.events.failed_sync(cd, error).await;
        if let Err(e) = self
            .update_phase(handle, cd, ChartDeploymentPhase::Failed)
            .await
        {
            warn!(name = %cd.name_any(), error = %e, "set failed status error");
        }
    }

    async fn write_status(
        self: &Arc<Self>,
        handle: &Arc<ClusterWatchHandle>,
        request: &ChartDeployment,
    ) -> Result<()> {
        let api = Self::deployments_api(
            handle.client.clone(),
            &request.namespace().unwrap_or_default(),
        );
        match replace_status_with_retry(&api, request).await? {
            StatusOutcome::Updated => Ok(()),
            StatusOutcome::Gone => {
                debug!(name = %request.name_any(), "object gone, removing its releases");
                self.delete_chart_deployment(request, handle.cluster.as_deref())
                    .await
            }
        }
    }
}
