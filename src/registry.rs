// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster catalog lookups with a short TTL cache.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Secret;
use kube::{api::ListParams, config::KubeConfigOptions, Api, Client, ResourceExt};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::constants::{CLUSTER_CACHE_TTL_SECS, DEFAULT_CLUSTER_NAME};
use crate::error::{FlotillaError, Result};
use crate::types::Cluster;

/// Cache key for the full cluster list
const ALL_CLUSTERS_CACHE_KEY: &str = "_all";

/// Access details for one target cluster.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    /// Cluster name, usually the catalog resource's name
    pub name: String,
    /// The apiserver endpoint of the cluster
    pub endpoint: String,
    /// Admin bearer token for the cluster
    pub token: String,
    /// Namespace the release will be installed to
    pub namespace: String,
}

impl ClusterInfo {
    /// Render a single-context kubeconfig for this cluster. Only bearer
    /// token auth is supported, which is also what in-cluster configs use.
    pub fn to_kubeconfig_yaml(&self) -> String {
        format!(
            concat!(
                "apiVersion: v1\n",
                "kind: Config\n",
                "clusters:\n",
                "- name: {name}\n",
                "  cluster:\n",
                "    server: {endpoint}\n",
                "    insecure-skip-tls-verify: true\n",
                "users:\n",
                "- name: {name}\n",
                "  user:\n",
                "    token: {token}\n",
                "contexts:\n",
                "- name: {name}@{name}\n",
                "  context:\n",
                "    cluster: {name}\n",
                "    user: {name}\n",
                "current-context: {name}@{name}\n",
            ),
            name = self.name,
            endpoint = self.endpoint,
            token = self.token,
        )
    }

    /// Build a client that talks to this cluster.
    pub async fn to_client(&self) -> Result<Client> {
        let kubeconfig: kube::config::Kubeconfig =
            serde_yaml::from_str(&self.to_kubeconfig_yaml()).map_err(|e| {
                FlotillaError::ClusterClientError(format!(
                    "render kubeconfig for {}: {}",
                    self.name, e
                ))
            })?;

        let config =
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    FlotillaError::ClusterClientError(format!(
                        "build config for {}: {}",
                        self.name, e
                    ))
                })?;

        Client::try_from(config).map_err(|e| {
            FlotillaError::ClusterClientError(format!("build client for {}: {}", self.name, e))
        })
    }
}

/// Derive the reserved local cluster entry from the process's own
/// Kubernetes config.
pub fn local_cluster_info(config: &kube::Config) -> ClusterInfo {
    ClusterInfo {
        name: DEFAULT_CLUSTER_NAME.to_string(),
        endpoint: config.cluster_url.to_string(),
        token: String::new(),
        namespace: config.default_namespace.clone(),
    }
}

enum CacheEntry {
    One(ClusterInfo),
    All(Vec<ClusterInfo>),
}

/// Catalog-backed registry of target clusters. Lookups are cached for
/// about a minute, the catalog and token secrets are read through the
/// local cluster client.
pub struct ClusterRegistry {
    client: Client,
    catalog_namespace: String,
    local: ClusterInfo,
    ttl: Duration,
    cache: Mutex<HashMap<String, (Instant, CacheEntry)>>,
}

impl ClusterRegistry {
    pub fn new(client: Client, catalog_namespace: String, local: ClusterInfo) -> Self {
        Self {
            client,
            catalog_namespace,
            local,
            ttl: Duration::from_secs(CLUSTER_CACHE_TTL_SECS),
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The local cluster entry, never part of the catalog list.
    pub fn local(&self) -> &ClusterInfo {
        &self.local
    }

    /// List all catalog clusters. If the catalog resource type is not
    /// installed at all this returns an empty list and multi cluster
    /// support is effectively disabled.
    #[instrument(skip(self))]
    pub async fn list_clusters(&self) -> Result<Vec<ClusterInfo>> {
        if let Some(cached) = self.cached_list().await {
            return Ok(cached);
        }

        debug!(
            namespace = %self.catalog_namespace,
            "refreshing cluster list from catalog"
        );

        let clusters: Api<Cluster> =
            Api::namespaced(self.client.clone(), &self.catalog_namespace);
        let list = match clusters.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                warn!("no cluster catalog found, multi cluster support disabled");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut infos = Vec::new();
        for item in &list.items {
            match self.parse_cluster_info(item).await {
                Ok(info) => infos.push(info),
                Err(e) => warn!(cluster = %item.name_any(), error = %e, "parse cluster info failed, skipping"),
            }
        }

        info!(count = infos.len(), "fetched clusters from catalog");
        self.cache.lock().await.insert(
            ALL_CLUSTERS_CACHE_KEY.to_string(),
            (Instant::now(), CacheEntry::All(infos.clone())),
        );
        Ok(infos)
    }

    /// Look up one cluster. The empty name and the reserved default name
    /// short-circuit to the local cluster without touching the catalog.
    #[instrument(skip(self))]
    pub async fn get_cluster(&self, name: &str) -> Result<ClusterInfo> {
        if name.is_empty() || name == DEFAULT_CLUSTER_NAME {
            debug!("empty cluster name, using local cluster");
            return Ok(self.local.clone());
        }

        if let Some(cached) = self.cached_one(name).await {
            return Ok(cached);
        }

        debug!(cluster = %name, "refreshing cluster data from catalog");
        let clusters: Api<Cluster> =
            Api::namespaced(self.client.clone(), &self.catalog_namespace);
        let cr = match clusters.get(name).await {
            Ok(cr) => cr,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Err(FlotillaError::ClusterNotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let info = self.parse_cluster_info(&cr).await?;
        self.cache.lock().await.insert(
            name.to_string(),
            (Instant::now(), CacheEntry::One(info.clone())),
        );
        Ok(info)
    }

    async fn cached_list(&self) -> Option<Vec<ClusterInfo>> {
        let cache = self.cache.lock().await;
        match cache.get(ALL_CLUSTERS_CACHE_KEY) {
            Some((at, CacheEntry::All(infos))) if at.elapsed() < self.ttl => Some(infos.clone()),
            _ => None,
        }
    }

    async fn cached_one(&self, name: &str) -> Option<ClusterInfo> {
        let cache = self.cache.lock().await;
        match cache.get(name) {
            Some((at, CacheEntry::One(info))) if at.elapsed() < self.ttl => Some(info.clone()),
            _ => None,
        }
    }

    /// Resolve a catalog resource into access details, reading the admin
    /// token from the referenced secret.
    async fn parse_cluster_info(&self, cr: &Cluster) -> Result<ClusterInfo> {
        let name = cr.name_any();
        url::Url::parse(&cr.spec.endpoint).map_err(|e| {
            FlotillaError::ClusterClientError(format!(
                "invalid endpoint for cluster {}: {}",
                name, e
            ))
        })?;
        let secrets: Api<Secret> =
            Api::namespaced(self.client.clone(), &cr.auth_secret_namespace());
        let secret = secrets.get(&cr.spec.auth_secret.name).await?;

        let token = secret
            .data
            .as_ref()
            .and_then(|d| d.get("token"))
            .and_then(|b| String::from_utf8(b.0.clone()).ok())
            .map(|t| t.trim_end_matches('\n').to_string())
            .ok_or_else(|| {
                FlotillaError::ClusterClientError(format!("get token error for cluster: {}", name))
            })?;

        Ok(ClusterInfo {
            name,
            endpoint: cr.spec.endpoint.clone(),
            token,
            namespace: cr.spec.namespace.clone().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{cluster_json, secret_json, MockService};

    fn local() -> ClusterInfo {
        ClusterInfo {
            name: DEFAULT_CLUSTER_NAME.to_string(),
            endpoint: "https://kubernetes.default.svc".to_string(),
            token: String::new(),
            namespace: "default".to_string(),
        }
    }

    #[test]
    fn test_kubeconfig_yaml_parses() {
        let info = ClusterInfo {
            name: "east".to_string(),
            endpoint: "https://10.0.0.1:6443".to_string(),
            token: "abc123".to_string(),
            namespace: "default".to_string(),
        };
        let kc: kube::config::Kubeconfig =
            serde_yaml::from_str(&info.to_kubeconfig_yaml()).unwrap();
        assert_eq!(kc.current_context.as_deref(), Some("east@east"));
        assert_eq!(kc.clusters.len(), 1);
        assert_eq!(
            kc.clusters[0].cluster.as_ref().unwrap().server.as_deref(),
            Some("https://10.0.0.1:6443")
        );
    }

    #[tokio::test]
    async fn test_get_cluster_empty_name_short_circuits() {
        // no API responses registered: a catalog lookup would fail
        let client = MockService::new().into_client();
        let registry = ClusterRegistry::new(client, "flotilla-system".to_string(), local());

        let info = registry.get_cluster("").await.unwrap();
        assert_eq!(info.name, DEFAULT_CLUSTER_NAME);
        let info = registry.get_cluster(DEFAULT_CLUSTER_NAME).await.unwrap();
        assert_eq!(info.name, DEFAULT_CLUSTER_NAME);
    }

    #[tokio::test]
    async fn test_list_clusters_degrades_on_missing_catalog() {
        let client = MockService::new().into_client();
        let registry = ClusterRegistry::new(client, "flotilla-system".to_string(), local());

        let clusters = registry.list_clusters().await.unwrap();
        assert!(clusters.is_empty());
    }

    #[tokio::test]
    async fn test_get_cluster_resolves_token_and_caches() {
        let list_path =
            "/apis/registry.flotilla.geeko.me/v1alpha1/namespaces/flotilla-system/clusters/east";
        let secret_path = "/api/v1/namespaces/flotilla-system/secrets/east-token";
        let client = MockService::new()
            .on_get(list_path, 200, &cluster_json("east", "https://10.0.0.1:6443"))
            .on_get(secret_path, 200, &secret_json("east-token", "tok-abc\n"))
            .into_client();
        let registry = ClusterRegistry::new(client, "flotilla-system".to_string(), local());

        let info = registry.get_cluster("east").await.unwrap();
        assert_eq!(info.name, "east");
        assert_eq!(info.endpoint, "https://10.0.0.1:6443");
        // trailing newline in the secret payload is trimmed
        assert_eq!(info.token, "tok-abc");

        // second lookup is served from cache
        let again = registry.get_cluster("east").await.unwrap();
        assert_eq!(again.token, "tok-abc");
    }

    #[tokio::test]
    async fn test_get_cluster_not_found() {
        let client = MockService::new().into_client();
        let registry = ClusterRegistry::new(client, "flotilla-system".to_string(), local());

        let err = registry.get_cluster("ghost").await.unwrap_err();
        assert!(matches!(err, FlotillaError::ClusterNotFound(_)));
    }
}
