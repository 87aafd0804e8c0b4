// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Dependency gating. A ChartDeployment is only deployed once every
//! dependency it declares reports synced to the relevant clusters.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::debug;

use crate::constants::DEFAULT_CLUSTER_NAME;
use crate::error::{FlotillaError, Result};
use crate::types::ChartDeployment;

use super::controller::Controller;

impl Controller {
    /// Fetch the declared dependencies from the same namespace, through
    /// the same cluster's client that owns the dependent resource.
    async fn get_dependencies(
        self: &Arc<Self>,
        cd: &ChartDeployment,
        deploy_cluster: &str,
    ) -> Result<Vec<ChartDeployment>> {
        let namespace = cd.namespace().unwrap_or_default();
        let client = self.client_for_cluster_name(deploy_cluster).await?;
        let api = Self::deployments_api(client, &namespace);

        let mut deps = Vec::with_capacity(cd.spec.dependencies.len());
        for name in &cd.spec.dependencies {
            deps.push(api.get(name).await?);
        }
        Ok(deps)
    }

    /// Check that every dependency of `cd` is satisfied. Unsatisfied
    /// dependencies come back as an error naming the dependency, the
    /// dependent and the unmet cluster, so the caller requeues with
    /// backoff and the reason lands in an event.
    pub(crate) async fn check_dependencies(
        self: &Arc<Self>,
        cd: &ChartDeployment,
        observed: Option<&str>,
    ) -> Result<()> {
        if cd.spec.dependencies.is_empty() {
            debug!(name = %cd.name_any(), "no dependencies declared");
            return Ok(());
        }

        let deploy_cluster = Self::deploy_cluster_name(cd, observed);
        let deps = self.get_dependencies(cd, &deploy_cluster).await?;

        if !cd.spec.install_to_all_clusters {
            for dep in &deps {
                let satisfied = dep.is_cluster_synced(&deploy_cluster)
                    || (deploy_cluster.is_empty()
                        && dep.is_cluster_synced(&self.config.global_cluster_name));
                if !satisfied {
                    return Err(unmet(dep, cd, &deploy_cluster));
                }
            }
            return Ok(());
        }

        // under fan-out every dependency must be synced to every cluster
        let clusters = self.registry.list_clusters().await?;
        for info in &clusters {
            for dep in &deps {
                if !dep.is_cluster_synced(&info.name) {
                    return Err(unmet(dep, cd, &info.name));
                }
            }
        }
        Ok(())
    }
}

fn unmet(dep: &ChartDeployment, dependent: &ChartDeployment, cluster: &str) -> FlotillaError {
    let cluster = if cluster.is_empty() {
        DEFAULT_CLUSTER_NAME
    } else {
        cluster
    };
    FlotillaError::DependencyNotSynced {
        dependency: dep.name_any(),
        dependent: dependent.name_any(),
        cluster: cluster.to_string(),
    }
}
