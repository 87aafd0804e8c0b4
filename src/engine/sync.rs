// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The install/upgrade paths: one cluster, or fanned out to the fleet.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::deploy::{DeployOutcome, DeployRequest};
use crate::deploy::values::load_values;
use crate::error::{AggregateError, Result};
use crate::hash;
use crate::registry::ClusterInfo;
use crate::types::{ChartDeployment, ChartDeploymentPhase};
use crate::watch::handle::ClusterWatchHandle;

use super::controller::Controller;

impl Controller {
    /// Install or upgrade a ChartDeployment in its single target cluster
    /// and record the result in status.
    pub(crate) async fn sync_to_cluster(
        self: &Arc<Self>,
        handle: &Arc<ClusterWatchHandle>,
        cd: &ChartDeployment,
        observed: Option<&str>,
    ) -> Result<()> {
        let cluster_name = Self::deploy_cluster_name(cd, observed);
        let info = self.registry.get_cluster(&cluster_name).await?;
        debug!(cluster = %info.name, endpoint = %info.endpoint, "resolved target cluster");

        let outcome = self.sync_release(handle, &info, cd).await?;

        let mut updated = cd.clone();
        let status = updated.status.get_or_insert_with(Default::default);
        status.version = outcome.chart_version.clone();
        status.notes = outcome.notes.clone();
        status.set_condition(
            "Initialized",
            "True",
            "ChartLoaded",
            &format!(
                "chart {}:{} loaded",
                outcome.chart_name, outcome.chart_version
            ),
        );
        self.set_synced_status(handle, &updated).await
    }

    /// Install or upgrade a ChartDeployment in every catalog cluster.
    ///
    /// A spec change resets the synced-cluster bookkeeping before any
    /// cluster is attempted. With an unchanged spec only clusters missing
    /// from the bookkeeping are attempted. One cluster failing never
    /// blocks the others.
    pub(crate) async fn sync_to_all_clusters(
        self: &Arc<Self>,
        handle: &Arc<ClusterWatchHandle>,
        cd: &ChartDeployment,
    ) -> Result<()> {
        let key = format!("{}/{}", cd.namespace().unwrap_or_default(), cd.name_any());
        let clusters = self.registry.list_clusters().await?;

        let equal = hash::is_synced(cd);
        let mut cd = cd.clone();
        let mut synced: Vec<String> = Vec::new();

        if !equal {
            // invalidate previous rollout state before attempting anything
            cd.status.get_or_insert_with(Default::default).synced_clusters = Vec::new();
            self.update_phase(handle, &cd, ChartDeploymentPhase::Pending)
                .await?;
        } else if let Some(status) = cd.status.as_ref() {
            synced = status.synced_clusters.clone();
        }
        debug!(key = %key, already_synced = ?synced, "starting fan-out pass");

        let mut errs = AggregateError::new();
        let mut last_outcome: Option<DeployOutcome> = None;

        for info in &clusters {
            if equal && synced.iter().any(|c| c == &info.name) {
                continue;
            }
            info!(key = %key, cluster = %info.name, "syncing to cluster");
            match self.sync_release(handle, info, &cd).await {
                Ok(outcome) => {
                    if !synced.iter().any(|c| c == &info.name) {
                        synced.push(info.name.clone());
                    }
                    last_outcome = Some(outcome);
                }
                Err(e) => {
                    warn!(key = %key, cluster = %info.name, error = %e, "skip sync to cluster, continue");
                    errs.push(info.name.clone(), e);
                }
            }
        }

        info!(key = %key, synced = ?synced, "fan-out pass done");
        let status = cd.status.get_or_insert_with(Default::default);
        status.synced_clusters = synced.clone();
        if let Some(outcome) = last_outcome {
            status.version = outcome.chart_version;
            status.notes = outcome.notes;
        }

        if synced.len() >= clusters.len() {
            self.set_synced_status(handle, &cd).await
        } else if !synced.is_empty() {
            handle
                .events
                .failed_sync(&cd, &format!("partial sync: {}", errs))
                .await;
            self.set_partial_synced_status(handle, &cd).await
        } else {
            errs.into_result()
        }
    }

    /// Deploy one release into one cluster: clean up stuck release
    /// revisions, resolve values and hand off to the chart deployer.
    pub(crate) async fn sync_release(
        self: &Arc<Self>,
        handle: &Arc<ClusterWatchHandle>,
        info: &ClusterInfo,
        cd: &ChartDeployment,
    ) -> Result<DeployOutcome> {
        let mut target = info.clone();
        target.namespace = cd.release_namespace();
        let release_name = cd.release_name();

        let mut deployed = false;
        match self
            .deployer
            .release_history(&target, &target.namespace, &release_name)
            .await
        {
            Ok(records) => {
                for record in records {
                    if record.state == crate::deploy::ReleaseState::Deployed {
                        deployed = true;
                    }
                    if record.state.is_stuck() {
                        info!(release = %record.name, state = ?record.state, "found stuck release, deleting it");
                        if let Err(e) = self
                            .deployer
                            .delete_release_record(&target, &target.namespace, &record.name)
                            .await
                        {
                            warn!(release = %record.name, error = %e, "delete stuck release error");
                        }
                    }
                }
            }
            Err(e) => {
                debug!(release = %release_name, error = %e, "release history unavailable");
            }
        }

        // values sources live in the resource's namespace on this cluster
        let values = load_values(&self.client, cd).await?;

        let request = DeployRequest {
            cluster: target,
            namespace: cd.release_namespace(),
            release_name,
            chart: cd.spec.chart.clone(),
            version: cd.spec.version.clone(),
            values,
            deployed,
        };
        let outcome = self.deployer.install_or_upgrade(&request).await?;

        // surface the resolved version for charts that did not pin one
        let note = format!(
            "Choose chart version: {} {}",
            outcome.chart_name, outcome.chart_version
        );
        handle.events.synced(cd, &note).await;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FINALIZER_NAME;
    use crate::error::FlotillaError;
    use crate::test_utils::{
        chart_deployment_json, cluster_list_json, harness, secret_json, MockDeployer, MockService,
    };
    use crate::types::{ChartDeploymentSpec, ChartDeploymentStatus};
    use kube::api::ObjectMeta;

    const CD_PATH: &str = "/apis/flotilla.geeko.me/v1/namespaces/default/chartdeployments";
    const CATALOG_PATH: &str =
        "/apis/registry.flotilla.geeko.me/v1alpha1/namespaces/flotilla-system/clusters";
    const SECRETS_PATH: &str = "/api/v1/namespaces/flotilla-system/secrets/";

    fn fan_out_cd(status: Option<ChartDeploymentStatus>) -> ChartDeployment {
        ChartDeployment {
            metadata: ObjectMeta {
                name: Some("demo".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("uid-1".to_string()),
                resource_version: Some("1".to_string()),
                finalizers: Some(vec![FINALIZER_NAME.to_string()]),
                ..Default::default()
            },
            spec: ChartDeploymentSpec {
                chart: "stable/nginx".to_string(),
                install_to_all_clusters: true,
                ..Default::default()
            },
            status,
        }
    }

    fn fleet_mock(cd: &ChartDeployment) -> MockService {
        MockService::new()
            .on_get(CATALOG_PATH, 200, &cluster_list_json(&["a", "b", "c"]))
            .on_get(SECRETS_PATH, 200, &secret_json("token", "tok"))
            .on_put(CD_PATH, 200, &chart_deployment_json(cd))
    }

    fn status_puts(mock: &MockService) -> Vec<serde_json::Value> {
        mock.requests_matching("PUT", "/status")
            .iter()
            .map(|r| serde_json::from_str(&r.body).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_fan_out_partial_progress() {
        let deployer = Arc::new(MockDeployer::new());
        deployer.fail_cluster("b");
        let cd = fan_out_cd(None);
        let mock = fleet_mock(&cd);
        let (ctrl, _tx) = harness::controller(&mock, Arc::clone(&deployer));
        let handle = harness::seeded_handle(&ctrl, None, vec![cd.clone()]).await;

        ctrl.sync_to_all_clusters(&handle, &cd).await.unwrap();

        // every cluster attempted in catalog order, b's failure did not
        // stop c
        assert_eq!(
            *deployer.deploy_calls.lock().unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );

        let puts = status_puts(&mock);
        let last = puts.last().unwrap();
        assert_eq!(last["status"]["phase"], "PartialSynced");
        assert_eq!(
            last["status"]["syncedClusters"],
            serde_json::json!(["a", "c"])
        );
        assert_eq!(last["status"]["lastSpecHash"], hash::unique_hash(&cd));

        // one aggregated warning event for the failures
        let events = mock.requests_matching("POST", "/events");
        assert!(events.iter().any(|r| r.body.contains("partial sync")));
    }

    #[tokio::test]
    async fn test_fan_out_second_pass_skips_synced_clusters() {
        let deployer = Arc::new(MockDeployer::new());
        let mut cd = fan_out_cd(None);
        cd.status = Some(ChartDeploymentStatus {
            phase: Some(ChartDeploymentPhase::PartialSynced),
            last_spec_hash: hash::unique_hash(&cd),
            synced_clusters: vec!["a".to_string(), "c".to_string()],
            ..Default::default()
        });
        let mock = fleet_mock(&cd);
        let (ctrl, _tx) = harness::controller(&mock, Arc::clone(&deployer));
        let handle = harness::seeded_handle(&ctrl, None, vec![cd.clone()]).await;

        ctrl.sync_to_all_clusters(&handle, &cd).await.unwrap();

        // a and c are already recorded, only b is deployed again
        assert_eq!(*deployer.deploy_calls.lock().unwrap(), vec!["b".to_string()]);

        let puts = status_puts(&mock);
        let last = puts.last().unwrap();
        assert_eq!(last["status"]["phase"], "Synced");
        assert_eq!(
            last["status"]["syncedClusters"],
            serde_json::json!(["a", "c", "b"])
        );
    }

    #[tokio::test]
    async fn test_fan_out_spec_change_resets_bookkeeping_first() {
        let deployer = Arc::new(MockDeployer::new());
        let mut cd = fan_out_cd(None);
        cd.status = Some(ChartDeploymentStatus {
            phase: Some(ChartDeploymentPhase::Synced),
            last_spec_hash: "stale-hash".to_string(),
            synced_clusters: vec!["a".to_string(), "c".to_string()],
            ..Default::default()
        });
        let mock = fleet_mock(&cd);
        let (ctrl, _tx) = harness::controller(&mock, Arc::clone(&deployer));
        let handle = harness::seeded_handle(&ctrl, None, vec![cd.clone()]).await;

        ctrl.sync_to_all_clusters(&handle, &cd).await.unwrap();

        // the very first status write clears the synced list and parks the
        // resource in Pending, before any cluster was attempted
        let puts = status_puts(&mock);
        assert_eq!(puts[0]["status"]["phase"], "Pending");
        assert!(puts[0]["status"].get("syncedClusters").is_none());

        // and the stale bookkeeping no longer short-circuits any cluster
        assert_eq!(
            *deployer.deploy_calls.lock().unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        let last = puts.last().unwrap();
        assert_eq!(last["status"]["phase"], "Synced");
        assert_eq!(
            last["status"]["syncedClusters"],
            serde_json::json!(["a", "b", "c"])
        );
    }

    #[tokio::test]
    async fn test_fan_out_total_failure_returns_error() {
        let deployer = Arc::new(MockDeployer::new());
        for cluster in ["a", "b", "c"] {
            deployer.fail_cluster(cluster);
        }
        let cd = fan_out_cd(None);
        let mock = fleet_mock(&cd);
        let (ctrl, _tx) = harness::controller(&mock, Arc::clone(&deployer));
        let handle = harness::seeded_handle(&ctrl, None, vec![cd.clone()]).await;

        let err = ctrl.sync_to_all_clusters(&handle, &cd).await.unwrap_err();
        assert!(matches!(err, FlotillaError::Aggregate(_)));
        let msg = err.to_string();
        for cluster in ["a", "b", "c"] {
            assert!(msg.contains(cluster));
        }
    }

    #[tokio::test]
    async fn test_fan_out_without_catalog_is_synced() {
        let deployer = Arc::new(MockDeployer::new());
        let cd = fan_out_cd(None);
        // no catalog: list degrades to empty, nothing to deploy
        let mock = MockService::new().on_put(CD_PATH, 200, &chart_deployment_json(&cd));
        let (ctrl, _tx) = harness::controller(&mock, Arc::clone(&deployer));
        let handle = harness::seeded_handle(&ctrl, None, vec![cd.clone()]).await;

        ctrl.sync_to_all_clusters(&handle, &cd).await.unwrap();
        assert_eq!(deployer.deploy_count(), 0);
        let puts = status_puts(&mock);
        assert_eq!(puts.last().unwrap()["status"]["phase"], "Synced");
    }

    #[tokio::test]
    async fn test_sync_release_cleans_up_stuck_revisions() {
        use crate::deploy::{ReleaseRecord, ReleaseState};

        let deployer = Arc::new(MockDeployer::new());
        *deployer.history.lock().unwrap() = vec![
            ReleaseRecord {
                name: "demo".to_string(),
                state: ReleaseState::PendingInstall,
            },
            ReleaseRecord {
                name: "demo".to_string(),
                state: ReleaseState::Deployed,
            },
        ];
        let cd = fan_out_cd(None);
        let mock = MockService::new().on_put(CD_PATH, 200, &chart_deployment_json(&cd));
        let (ctrl, _tx) = harness::controller(&mock, Arc::clone(&deployer));
        let handle = harness::seeded_handle(&ctrl, None, vec![cd.clone()]).await;

        let info = ctrl.registry.local().clone();
        ctrl.sync_release(&handle, &info, &cd).await.unwrap();

        // an already deployed revision flips the upgrade path on
        let requests = deployer.deploy_requests.lock().unwrap();
        assert!(requests[0].deployed);
    }
}
