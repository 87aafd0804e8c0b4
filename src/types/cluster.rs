// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

/// A cluster registered in the catalog. The controller deploys charts into
/// these clusters using the referenced admin token secret.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[kube(group = "registry.flotilla.geeko.me", version = "v1alpha1", kind = "Cluster")]
#[kube(namespaced)]
#[kube(status = "ClusterCatalogStatus")]
#[serde(rename_all = "camelCase")]
pub struct ClusterCatalogSpec {
    /// The apiserver endpoint, e.g. "https://10.0.0.1:6443"
    pub endpoint: String,

    /// Secret holding a bearer token under the "token" data key
    pub auth_secret: SecretRef,

    /// Default namespace for releases deployed into this cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCatalogStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<ClusterCondition>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Cluster {
    /// Namespace the token secret lives in, the catalog resource's own
    /// namespace unless the ref names one
    pub fn auth_secret_namespace(&self) -> String {
        self.spec
            .auth_secret
            .namespace
            .clone()
            .or_else(|| self.namespace())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn make_cluster(name: &str, secret_ns: Option<&str>) -> Cluster {
        Cluster {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("flotilla-system".to_string()),
                ..Default::default()
            },
            spec: ClusterCatalogSpec {
                endpoint: "https://10.0.0.1:6443".to_string(),
                auth_secret: SecretRef {
                    name: format!("{}-token", name),
                    namespace: secret_ns.map(|s| s.to_string()),
                },
                namespace: None,
            },
            status: None,
        }
    }

    #[test]
    fn test_auth_secret_namespace_defaults_to_catalog_namespace() {
        let cluster = make_cluster("east", None);
        assert_eq!(cluster.auth_secret_namespace(), "flotilla-system");
    }

    #[test]
    fn test_auth_secret_namespace_from_ref() {
        let cluster = make_cluster("east", Some("kube-system"));
        assert_eq!(cluster.auth_secret_namespace(), "kube-system");
    }
}
