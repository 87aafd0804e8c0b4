// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities for mocking the Kubernetes API and the chart deployer.

use http::{Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

use crate::deploy::{
    ChartDeployer, DeployOutcome, DeployRequest, ReleaseRecord, UninstallError,
};
use crate::error::{FlotillaError, Result};
use crate::registry::ClusterInfo;

/// A request the mock API served, kept for assertions.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// A mock HTTP service that returns predefined responses based on request paths.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
    sequences: Arc<Mutex<HashMap<(String, String), std::collections::VecDeque<(u16, String)>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            sequences: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add a response for GET requests matching the exact path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    /// Add a response for POST requests matching the exact path
    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.on("POST", path, status, body)
    }

    /// Add a response for PUT requests matching the exact path
    pub fn on_put(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PUT", path, status, body)
    }

    /// Add a response for PATCH requests matching the exact path
    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), (status, body.to_string()));
        self
    }

    /// Script consecutive responses for one method and exact path. Each
    /// matching request consumes one entry, later requests fall back to
    /// the static responses.
    pub fn on_sequence(self, method: &str, path: &str, responses: Vec<(u16, String)>) -> Self {
        self.sequences
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), responses.into());
        self
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    /// Requests served so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests of one method whose path contains the given fragment
    pub fn requests_matching(&self, method: &str, path_fragment: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path.contains(path_fragment))
            .collect()
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        if let Some(queue) = self
            .sequences
            .lock()
            .unwrap()
            .get_mut(&(method.to_string(), path.to_string()))
        {
            if let Some(resp) = queue.pop_front() {
                return Some(resp);
            }
        }

        let responses = self.responses.lock().unwrap();

        // Try exact match first
        if let Some(resp) = responses.get(&(method.to_string(), path.to_string())) {
            return Some(resp.clone());
        }

        // Try prefix match for paths like /api/v1/namespaces/foo
        for ((m, p), resp) in responses.iter() {
            if m == method && path.starts_with(p) {
                return Some(resp.clone());
            }
        }

        None
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let response = self.find_response(&method, &path);
        let requests = Arc::clone(&self.requests);

        Box::pin(async move {
            let body = match req.into_body().collect().await {
                Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).to_string(),
                Err(_) => String::new(),
            };
            requests.lock().unwrap().push(RecordedRequest {
                method,
                path,
                body,
            });

            match response {
                Some((status, body)) => Ok(Response::builder()
                    .status(status)
                    .header("content-type", "application/json")
                    .body(Body::from(body.into_bytes()))
                    .unwrap()),
                None => {
                    // Default 404 for unmatched requests
                    let body = r#"{"kind":"Status","apiVersion":"v1","status":"Failure","message":"not found","reason":"NotFound","code":404}"#;
                    Ok(Response::builder()
                        .status(404)
                        .header("content-type", "application/json")
                        .body(Body::from(body.as_bytes().to_vec()))
                        .unwrap())
                }
            }
        })
    }
}

/// Create a ChartDeployment JSON response
pub fn chart_deployment_json(cd: &crate::types::ChartDeployment) -> String {
    let mut value = serde_json::to_value(cd).unwrap();
    value["apiVersion"] = "flotilla.geeko.me/v1".into();
    value["kind"] = "ChartDeployment".into();
    value.to_string()
}

/// Create a catalog Cluster JSON response
pub fn cluster_json(name: &str, endpoint: &str) -> String {
    serde_json::json!({
        "apiVersion": "registry.flotilla.geeko.me/v1alpha1",
        "kind": "Cluster",
        "metadata": {
            "name": name,
            "namespace": "flotilla-system",
            "uid": format!("{}-uid", name)
        },
        "spec": {
            "endpoint": endpoint,
            "authSecret": {"name": format!("{}-token", name)}
        }
    })
    .to_string()
}

/// Create a catalog Cluster list JSON response
pub fn cluster_list_json(names: &[&str]) -> String {
    let items: Vec<serde_json::Value> = names
        .iter()
        .map(|name| {
            serde_json::from_str(&cluster_json(name, &format!("https://{}.example.com:6443", name)))
                .unwrap()
        })
        .collect();
    serde_json::json!({
        "apiVersion": "registry.flotilla.geeko.me/v1alpha1",
        "kind": "ClusterList",
        "metadata": {"resourceVersion": "1"},
        "items": items
    })
    .to_string()
}

/// Create a token Secret JSON response
pub fn secret_json(name: &str, token: &str) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {"name": name, "namespace": "flotilla-system"},
        "data": {"token": base64_encode(token.as_bytes())}
    })
    .to_string()
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("{} \"{}\" not found", resource, name),
        "reason": "NotFound",
        "code": 404
    })
    .to_string()
}

/// Create a 409 conflict response
pub fn conflict_json(name: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("Operation cannot be fulfilled on \"{}\"", name),
        "reason": "Conflict",
        "code": 409
    })
    .to_string()
}

// minimal base64, enough for fixture payloads
fn base64_encode(input: &[u8]) -> String {
    const TABLE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::new();
    for chunk in input.chunks(3) {
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        let n = u32::from_be_bytes([0, b[0], b[1], b[2]]);
        out.push(TABLE[(n >> 18 & 63) as usize] as char);
        out.push(TABLE[(n >> 12 & 63) as usize] as char);
        out.push(if chunk.len() > 1 {
            TABLE[(n >> 6 & 63) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            TABLE[(n & 63) as usize] as char
        } else {
            '='
        });
    }
    out
}

/// Scripted uninstall outcomes for the mock deployer
#[derive(Clone, Debug)]
pub enum ScriptedUninstall {
    Ok,
    ReleaseNotFound,
    ObjectsNotFound,
    ResourceBuild,
    Other(String),
}

/// A chart deployer that records calls and follows a per-cluster script.
#[derive(Default)]
pub struct MockDeployer {
    /// Cluster names install_or_upgrade was invoked for, in order
    pub deploy_calls: Mutex<Vec<String>>,
    /// Requests passed to install_or_upgrade, in order
    pub deploy_requests: Mutex<Vec<DeployRequest>>,
    /// Cluster names uninstall was invoked for, in order
    pub uninstall_calls: Mutex<Vec<String>>,
    /// Clusters whose deploys fail
    pub fail_clusters: Mutex<HashSet<String>>,
    /// Per-cluster uninstall outcomes, default Ok
    pub uninstall_script: Mutex<HashMap<String, ScriptedUninstall>>,
    /// History handed out for every release
    pub history: Mutex<Vec<ReleaseRecord>>,
    /// Version reported when the request does not pin one
    pub latest_version: String,
}

impl MockDeployer {
    pub fn new() -> Self {
        Self {
            latest_version: "1.6.0".to_string(),
            ..Default::default()
        }
    }

    pub fn fail_cluster(&self, name: &str) {
        self.fail_clusters.lock().unwrap().insert(name.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_clusters.lock().unwrap().clear();
    }

    pub fn script_uninstall(&self, cluster: &str, outcome: ScriptedUninstall) {
        self.uninstall_script
            .lock()
            .unwrap()
            .insert(cluster.to_string(), outcome);
    }

    pub fn deploy_count(&self) -> usize {
        self.deploy_calls.lock().unwrap().len()
    }

    pub fn uninstall_count(&self) -> usize {
        self.uninstall_calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ChartDeployer for MockDeployer {
    async fn install_or_upgrade(&self, req: &DeployRequest) -> Result<DeployOutcome> {
        self.deploy_calls
            .lock()
            .unwrap()
            .push(req.cluster.name.clone());
        self.deploy_requests.lock().unwrap().push(req.clone());

        if self.fail_clusters.lock().unwrap().contains(&req.cluster.name) {
            return Err(FlotillaError::DeployError(format!(
                "cluster {} unreachable",
                req.cluster.name
            )));
        }

        let (_, chart_name) = crate::types::chart_deployment::parse_chart_name(&req.chart);
        Ok(DeployOutcome {
            release_name: req.release_name.clone(),
            chart_name: chart_name.to_string(),
            chart_version: if req.version.is_empty() {
                self.latest_version.clone()
            } else {
                req.version.clone()
            },
            notes: "mock notes".to_string(),
        })
    }

    async fn uninstall(
        &self,
        cluster: &ClusterInfo,
        _namespace: &str,
        _release_name: &str,
    ) -> std::result::Result<(), UninstallError> {
        self.uninstall_calls.lock().unwrap().push(cluster.name.clone());
        let script = self
            .uninstall_script
            .lock()
            .unwrap()
            .get(&cluster.name)
            .cloned()
            .unwrap_or(ScriptedUninstall::Ok);
        match script {
            ScriptedUninstall::Ok => Ok(()),
            ScriptedUninstall::ReleaseNotFound => Err(UninstallError::ReleaseNotFound),
            ScriptedUninstall::ObjectsNotFound => Err(UninstallError::ObjectsNotFound(
                "object not found, skipping delete".to_string(),
            )),
            ScriptedUninstall::ResourceBuild => Err(UninstallError::ResourceBuild(
                "unable to build kubernetes objects for delete".to_string(),
            )),
            ScriptedUninstall::Other(msg) => Err(UninstallError::Other(msg)),
        }
    }

    async fn release_history(
        &self,
        _cluster: &ClusterInfo,
        _namespace: &str,
        _release_name: &str,
    ) -> Result<Vec<ReleaseRecord>> {
        Ok(self.history.lock().unwrap().clone())
    }

    async fn delete_release_record(
        &self,
        _cluster: &ClusterInfo,
        _namespace: &str,
        _release_name: &str,
    ) -> Result<()> {
        Ok(())
    }
}

pub mod harness {
    //! Builders wiring a Controller against the mock API.

    use std::sync::Arc;

    use kube::runtime::reflector;
    use kube::runtime::watcher;
    use tokio::sync::watch;

    use super::{MockDeployer, MockService};
    use crate::config;
    use crate::constants::DEFAULT_CLUSTER_NAME;
    use crate::engine::{Controller, EventSink};
    use crate::queue::WorkQueue;
    use crate::registry::ClusterInfo;
    use crate::types::ChartDeployment;
    use crate::watch::handle::ClusterWatchHandle;

    pub fn local_info() -> ClusterInfo {
        ClusterInfo {
            name: DEFAULT_CLUSTER_NAME.to_string(),
            endpoint: "https://kubernetes.default.svc".to_string(),
            token: String::new(),
            namespace: "default".to_string(),
        }
    }

    /// Controller wired to the mock API and the mock deployer. The
    /// returned sender keeps the shutdown channel open.
    pub fn controller(
        mock: &MockService,
        deployer: Arc<MockDeployer>,
    ) -> (Arc<Controller>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let ctrl = Controller::new(
            mock.clone().into_client(),
            local_info(),
            config::test_config(),
            deployer,
            rx,
        );
        (ctrl, tx)
    }

    /// Register a watch handle whose store is pre-seeded, without running
    /// a live watcher.
    pub async fn seeded_handle(
        ctrl: &Arc<Controller>,
        cluster: Option<&str>,
        objects: Vec<ChartDeployment>,
    ) -> Arc<ClusterWatchHandle> {
        let (store, mut writer) = reflector::store::<ChartDeployment>();
        writer.apply_watcher_event(&watcher::Event::Init);
        for cd in &objects {
            writer.apply_watcher_event(&watcher::Event::InitApply(cd.clone()));
        }
        writer.apply_watcher_event(&watcher::Event::InitDone);
        // keep the writer alive so the store stays usable
        std::mem::forget(writer);

        let client = ctrl.client.clone();
        let handle = ClusterWatchHandle::new(
            cluster.map(|c| c.to_string()),
            client.clone(),
            store,
            WorkQueue::new(),
            EventSink::new(client, cluster.unwrap_or(DEFAULT_CLUSTER_NAME)),
        );
        let label = cluster.unwrap_or(DEFAULT_CLUSTER_NAME).to_string();
        ctrl.watches.insert(label, Arc::clone(&handle)).await;
        handle
    }
}
