// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The reconcile engine. Work items produced by the watch sessions are
//! drained here and converged into chart deploys, status updates and
//! events.

use std::sync::Arc;

use kube::runtime::reflector::ObjectRef;
use kube::{Api, Client, ResourceExt};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::constants::{annotations, events as reasons, DEFAULT_CLUSTER_NAME};
use crate::deploy::ChartDeployer;
use crate::error::{FlotillaError, Result};
use crate::hash;
use crate::registry::{ClusterInfo, ClusterRegistry};
use crate::types::{ChartDeployment, ChartDeploymentPhase};
use crate::watch::handle::{ClusterWatchHandle, WatchRegistry};
use crate::watch::key::WorkKey;
use crate::watch::session;
use crate::watch::supervisor::ClusterWatchSupervisor;

pub struct Controller {
    pub(crate) client: Client,
    pub(crate) config: Config,
    pub(crate) registry: Arc<ClusterRegistry>,
    pub(crate) deployer: Arc<dyn ChartDeployer>,
    pub(crate) watches: Arc<WatchRegistry>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl Controller {
    pub fn new(
        client: Client,
        local: ClusterInfo,
        config: Config,
        deployer: Arc<dyn ChartDeployer>,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let registry = Arc::new(ClusterRegistry::new(
            client.clone(),
            config.catalog_namespace.clone(),
            local,
        ));
        Arc::new(Self {
            client,
            config,
            registry,
            deployer,
            watches: Arc::new(WatchRegistry::new()),
            shutdown,
        })
    }

    /// Start the local watch, watches for every catalog cluster, and the
    /// supervisor that keeps the latter alive. Blocks until shutdown.
    pub async fn run(self: &Arc<Self>) -> anyhow::Result<()> {
        info!("starting ChartDeployment controller");
        session::start(Arc::clone(self), None).await?;

        self.start_all_cluster_watches().await;

        let supervisor = ClusterWatchSupervisor::new(Arc::clone(self));
        supervisor.run().await;

        info!("shutting down workers");
        self.watches.shut_down_all().await;
        Ok(())
    }

    /// Establish a watch for every catalog cluster. One cluster failing
    /// must not block the others.
    pub(crate) async fn start_all_cluster_watches(self: &Arc<Self>) {
        let clusters = match self.registry.list_clusters().await {
            Ok(clusters) => clusters,
            Err(e) => {
                warn!(error = %e, "list clusters for initial watch setup failed");
                return;
            }
        };

        for info in clusters {
            let name = info.name.clone();
            if let Err(e) = session::start(Arc::clone(self), Some(info)).await {
                warn!(cluster = %name, error = %e, "init watch for cluster failed, skipping");
            }
        }
    }

    /// Long-running worker loop. Pops keys, reconciles, acknowledges.
    pub(crate) async fn run_worker(self: Arc<Self>, handle: Arc<ClusterWatchHandle>) {
        while let Some(key) = handle.queue.get().await {
            match self.sync_handler(&key).await {
                Ok(()) => {
                    handle.queue.forget(&key).await;
                    debug!(key = %key, "successfully synced");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "error syncing, requeuing");
                    handle.queue.add_rate_limited(key.clone()).await;
                }
            }
            handle.queue.done(&key).await;
        }
        debug!(cluster = %handle.cluster_label(), "worker stopped");
    }

    pub(crate) async fn handle_for(&self, cluster: Option<&str>) -> Result<Arc<ClusterWatchHandle>> {
        let name = cluster.unwrap_or(DEFAULT_CLUSTER_NAME);
        self.watches
            .get(name)
            .await
            .ok_or_else(|| FlotillaError::WatchNotStarted(name.to_string()))
    }

    /// Client for the cluster a resource was observed on. The empty name
    /// and the reserved default name mean the local cluster.
    pub(crate) async fn client_for_cluster_name(&self, name: &str) -> Result<Client> {
        if name.is_empty() || name == DEFAULT_CLUSTER_NAME {
            return Ok(self.client.clone());
        }
        self.watches
            .get(name)
            .await
            .map(|h| h.client.clone())
            .ok_or_else(|| FlotillaError::WatchNotStarted(name.to_string()))
    }

    /// The cluster the release lives in: the explicit spec target when
    /// set, else the cluster the watch observed the resource on.
    pub(crate) fn deploy_cluster_name(cd: &ChartDeployment, observed: Option<&str>) -> String {
        if !cd.spec.cluster_name.is_empty() {
            cd.spec.cluster_name.clone()
        } else {
            observed.unwrap_or_default().to_string()
        }
    }

    pub(crate) fn deployments_api(client: Client, namespace: &str) -> Api<ChartDeployment> {
        Api::namespaced(client, namespace)
    }

    /// Converge one ChartDeployment towards its desired state.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn sync_handler(self: &Arc<Self>, key: &WorkKey) -> Result<()> {
        debug!("start sync");
        let handle = self.handle_for(key.cluster.as_deref()).await?;

        let obj_ref = ObjectRef::new(&key.name).within(&key.namespace);
        let Some(cd) = handle.store.get(&obj_ref) else {
            // deleted between enqueue and pop, nothing to do
            debug!("chart deployment no longer exists in cache");
            return Ok(());
        };
        let cd = (*cd).clone();

        if cd.has_switch_annotation(annotations::NO_SYNC) {
            info!(name = %cd.name_any(), "chart deployment opted out of syncing");
            return Ok(());
        }

        let observed = key.cluster.as_deref();

        if cd.metadata.deletion_timestamp.is_some() {
            info!(name = %cd.name_any(), "deletion timestamp present, deleting");
            if let Err(e) = self.delete_chart_deployment(&cd, observed).await {
                handle.events.failed_delete(&cd, &e).await;
                return Err(e);
            }
            return Ok(());
        }

        if let Err(e) = self.ensure_finalizer(&handle, &cd).await {
            warn!(name = %cd.name_any(), error = %e, "add finalizer failed");
            handle.events.failed_sync(&cd, &e).await;
            return Err(e);
        }

        if let Err(e) = self.check_dependencies(&cd, observed).await {
            info!(name = %cd.name_any(), error = %e, "dependency check did not pass");
            handle.events.failed_sync(&cd, &e).await;
            return Err(e);
        }
        debug!(name = %cd.name_any(), "dependency check passed");

        if !cd.spec.install_to_all_clusters {
            if hash::is_synced(&cd) {
                if cd.phase() != ChartDeploymentPhase::Synced {
                    debug!("phase out of step with recorded hash, re-asserting");
                    self.update_phase(&handle, &cd, ChartDeploymentPhase::Synced)
                        .await?;
                }
                return Ok(());
            }

            if let Err(e) = self
                .update_phase(&handle, &cd, ChartDeploymentPhase::Pending)
                .await
            {
                warn!(error = %e, "set pending status failed");
            }
            if let Err(e) = self.sync_to_cluster(&handle, &cd, observed).await {
                self.set_failed_status(&handle, &cd, &e).await;
                return Err(e);
            }
        } else if let Err(e) = self.sync_to_all_clusters(&handle, &cd).await {
            self.set_failed_status(&handle, &cd, &e).await;
            return Err(e);
        }

        handle.events.synced(&cd, reasons::MESSAGE_SYNCED).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FINALIZER_NAME;
    use crate::test_utils::{chart_deployment_json, harness, MockDeployer, MockService};
    use crate::types::{ChartDeploymentSpec, ChartDeploymentStatus};
    use kube::api::ObjectMeta;

    const CD_PATH: &str = "/apis/flotilla.geeko.me/v1/namespaces/default/chartdeployments";

    fn make_cd(
        name: &str,
        spec: ChartDeploymentSpec,
        status: Option<ChartDeploymentStatus>,
    ) -> ChartDeployment {
        ChartDeployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some("uid-1".to_string()),
                resource_version: Some("1".to_string()),
                finalizers: Some(vec![FINALIZER_NAME.to_string()]),
                ..Default::default()
            },
            spec,
            status,
        }
    }

    fn nginx_spec() -> ChartDeploymentSpec {
        ChartDeploymentSpec {
            chart: "stable/nginx".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_synced_resource_reconcile_is_noop() {
        let deployer = Arc::new(MockDeployer::new());
        let mock = MockService::new();
        let (ctrl, _tx) = harness::controller(&mock, Arc::clone(&deployer));

        let mut cd = make_cd("demo", nginx_spec(), None);
        cd.status = Some(ChartDeploymentStatus {
            phase: Some(ChartDeploymentPhase::Synced),
            last_spec_hash: hash::unique_hash(&cd),
            ..Default::default()
        });
        harness::seeded_handle(&ctrl, None, vec![cd]).await;

        let key = WorkKey::local("default", "demo");
        ctrl.sync_handler(&key).await.unwrap();
        ctrl.sync_handler(&key).await.unwrap();

        // already synced: no deploy call, no status write, just events
        assert_eq!(deployer.deploy_count(), 0);
        assert!(mock.requests_matching("PUT", "/status").is_empty());
    }

    #[tokio::test]
    async fn test_synced_hash_but_wrong_phase_reasserts_phase() {
        let deployer = Arc::new(MockDeployer::new());
        let mut cd = make_cd("demo", nginx_spec(), None);
        cd.status = Some(ChartDeploymentStatus {
            phase: Some(ChartDeploymentPhase::Pending),
            last_spec_hash: hash::unique_hash(&cd),
            ..Default::default()
        });
        let mock = MockService::new().on_put(CD_PATH, 200, &chart_deployment_json(&cd));
        let (ctrl, _tx) = harness::controller(&mock, Arc::clone(&deployer));
        harness::seeded_handle(&ctrl, None, vec![cd]).await;

        ctrl.sync_handler(&WorkKey::local("default", "demo"))
            .await
            .unwrap();

        assert_eq!(deployer.deploy_count(), 0);
        let puts = mock.requests_matching("PUT", "/status");
        assert_eq!(puts.len(), 1);
        let body: serde_json::Value = serde_json::from_str(&puts[0].body).unwrap();
        assert_eq!(body["status"]["phase"], "Synced");
    }

    #[tokio::test]
    async fn test_no_sync_annotation_skips_resource() {
        let deployer = Arc::new(MockDeployer::new());
        let mock = MockService::new();
        let (ctrl, _tx) = harness::controller(&mock, Arc::clone(&deployer));

        let mut cd = make_cd("demo", nginx_spec(), None);
        cd.metadata.annotations = Some(
            [(annotations::NO_SYNC.to_string(), "true".to_string())]
                .into_iter()
                .collect(),
        );
        harness::seeded_handle(&ctrl, None, vec![cd]).await;

        ctrl.sync_handler(&WorkKey::local("default", "demo"))
            .await
            .unwrap();

        assert_eq!(deployer.deploy_count(), 0);
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_resource_is_dropped() {
        let deployer = Arc::new(MockDeployer::new());
        let mock = MockService::new();
        let (ctrl, _tx) = harness::controller(&mock, Arc::clone(&deployer));
        harness::seeded_handle(&ctrl, None, vec![]).await;

        // deleted between enqueue and pop: not an error, no retries
        ctrl.sync_handler(&WorkKey::local("default", "ghost"))
            .await
            .unwrap();
        assert_eq!(deployer.deploy_count(), 0);
    }

    #[tokio::test]
    async fn test_single_cluster_install_resolves_latest_version() {
        let deployer = Arc::new(MockDeployer::new());
        let cd = make_cd("demo", nginx_spec(), None);
        let mock = MockService::new().on_put(CD_PATH, 200, &chart_deployment_json(&cd));
        let (ctrl, _tx) = harness::controller(&mock, Arc::clone(&deployer));
        harness::seeded_handle(&ctrl, None, vec![cd.clone()]).await;

        ctrl.sync_handler(&WorkKey::local("default", "demo"))
            .await
            .unwrap();

        // deployed exactly once, into the local cluster
        assert_eq!(deployer.deploy_count(), 1);
        let requests = deployer.deploy_requests.lock().unwrap();
        assert_eq!(requests[0].cluster.name, DEFAULT_CLUSTER_NAME);
        assert_eq!(requests[0].chart, "stable/nginx");
        assert!(requests[0].version.is_empty());
        drop(requests);

        // pending write first, then the synced status with hash and the
        // version the deployer resolved
        let puts = mock.requests_matching("PUT", "/status");
        assert_eq!(puts.len(), 2);
        let pending: serde_json::Value = serde_json::from_str(&puts[0].body).unwrap();
        assert_eq!(pending["status"]["phase"], "Pending");
        let synced: serde_json::Value = serde_json::from_str(&puts[1].body).unwrap();
        assert_eq!(synced["status"]["phase"], "Synced");
        assert_eq!(synced["status"]["lastSpecHash"], hash::unique_hash(&cd));
        assert_eq!(synced["status"]["version"], "1.6.0");

        // one event names the resolved chart and version
        let events = mock.requests_matching("POST", "/events");
        assert!(events
            .iter()
            .any(|r| r.body.contains("Choose chart version: nginx 1.6.0")));
    }

    #[tokio::test]
    async fn test_dependency_gating_blocks_deploy() {
        let deployer = Arc::new(MockDeployer::new());
        let dep = make_cd("db", nginx_spec(), Some(ChartDeploymentStatus {
            phase: Some(ChartDeploymentPhase::Pending),
            ..Default::default()
        }));
        let mock = MockService::new().on_get(
            &format!("{}/db", CD_PATH),
            200,
            &chart_deployment_json(&dep),
        );
        let (ctrl, _tx) = harness::controller(&mock, Arc::clone(&deployer));

        let cd = make_cd(
            "demo",
            ChartDeploymentSpec {
                chart: "stable/nginx".to_string(),
                dependencies: vec!["db".to_string()],
                ..Default::default()
            },
            None,
        );
        harness::seeded_handle(&ctrl, None, vec![cd]).await;

        let err = ctrl
            .sync_handler(&WorkKey::local("default", "demo"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlotillaError::DependencyNotSynced { .. }));
        assert_eq!(deployer.deploy_count(), 0);
    }

    #[tokio::test]
    async fn test_dependency_satisfied_allows_deploy() {
        let deployer = Arc::new(MockDeployer::new());
        // the dependency reports synced for the same (local) target
        let dep = make_cd("db", nginx_spec(), Some(ChartDeploymentStatus {
            phase: Some(ChartDeploymentPhase::Synced),
            ..Default::default()
        }));
        let cd = make_cd(
            "demo",
            ChartDeploymentSpec {
                chart: "stable/nginx".to_string(),
                dependencies: vec!["db".to_string()],
                ..Default::default()
            },
            None,
        );
        let mock = MockService::new()
            .on_get(&format!("{}/db", CD_PATH), 200, &chart_deployment_json(&dep))
            .on_put(CD_PATH, 200, &chart_deployment_json(&cd));
        let (ctrl, _tx) = harness::controller(&mock, Arc::clone(&deployer));
        harness::seeded_handle(&ctrl, None, vec![cd]).await;

        ctrl.sync_handler(&WorkKey::local("default", "demo"))
            .await
            .unwrap();
        assert_eq!(deployer.deploy_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_deploy_sets_failed_phase_and_errors() {
        let deployer = Arc::new(MockDeployer::new());
        deployer.fail_cluster(DEFAULT_CLUSTER_NAME);
        let cd = make_cd("demo", nginx_spec(), None);
        let mock = MockService::new().on_put(CD_PATH, 200, &chart_deployment_json(&cd));
        let (ctrl, _tx) = harness::controller(&mock, Arc::clone(&deployer));
        harness::seeded_handle(&ctrl, None, vec![cd]).await;

        let err = ctrl
            .sync_handler(&WorkKey::local("default", "demo"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlotillaError::DeployError(_)));

        let puts = mock.requests_matching("PUT", "/status");
        let last: serde_json::Value =
            serde_json::from_str(&puts.last().unwrap().body).unwrap();
        assert_eq!(last["status"]["phase"], "Failed");
    }

    #[test]
    fn test_deploy_cluster_name_resolution() {
        let explicit = make_cd(
            "demo",
            ChartDeploymentSpec {
                cluster_name: "east".to_string(),
                ..Default::default()
            },
            None,
        );
        assert_eq!(
            Controller::deploy_cluster_name(&explicit, Some("west")),
            "east"
        );

        let implicit = make_cd("demo", ChartDeploymentSpec::default(), None);
        assert_eq!(
            Controller::deploy_cluster_name(&implicit, Some("west")),
            "west"
        );
        assert_eq!(Controller::deploy_cluster_name(&implicit, None), "");
    }
}
