// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::fmt;

use kube::ResourceExt;

use crate::types::ChartDeployment;

/// Identifies which cluster's view of a ChartDeployment triggered a work
/// item. `cluster` is `None` for the cluster this process runs in.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkKey {
    pub cluster: Option<String>,
    pub namespace: String,
    pub name: String,
}

impl WorkKey {
    pub fn local(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cluster: None,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn remote(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            cluster: Some(cluster.into()),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn for_deployment(cluster: Option<&str>, cd: &ChartDeployment) -> Self {
        Self {
            cluster: cluster.map(|c| c.to_string()),
            namespace: cd.namespace().unwrap_or_default(),
            name: cd.name_any(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.cluster.is_none()
    }

    pub fn cluster_name(&self) -> &str {
        self.cluster.as_deref().unwrap_or("")
    }

    /// Parse `ns/name` or `cluster/ns/name`. Two segments mean the local
    /// cluster.
    pub fn parse(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [namespace, name] if !namespace.is_empty() && !name.is_empty() => {
                Some(Self::local(*namespace, *name))
            }
            [cluster, namespace, name]
                if !cluster.is_empty() && !namespace.is_empty() && !name.is_empty() =>
            {
                Some(Self::remote(*cluster, *namespace, *name))
            }
            _ => None,
        }
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cluster {
            Some(cluster) => write!(f, "{}/{}/{}", cluster, self.namespace, self.name),
            None => write!(f, "{}/{}", self.namespace, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_key() {
        let key = WorkKey::parse("default/nginx").unwrap();
        assert!(key.is_local());
        assert_eq!(key.namespace, "default");
        assert_eq!(key.name, "nginx");
    }

    #[test]
    fn test_parse_remote_key() {
        let key = WorkKey::parse("east/default/nginx").unwrap();
        assert_eq!(key.cluster.as_deref(), Some("east"));
        assert_eq!(key.namespace, "default");
        assert_eq!(key.name, "nginx");
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert!(WorkKey::parse("nginx").is_none());
        assert!(WorkKey::parse("a/b/c/d").is_none());
        assert!(WorkKey::parse("").is_none());
        assert!(WorkKey::parse("/nginx").is_none());
    }

    #[test]
    fn test_display_round_trip() {
        for raw in ["default/nginx", "east/default/nginx"] {
            let key = WorkKey::parse(raw).unwrap();
            assert_eq!(key.to_string(), raw);
            assert_eq!(WorkKey::parse(&key.to_string()).unwrap(), key);
        }
    }

    #[test]
    fn test_cluster_name_defaults_empty() {
        assert_eq!(WorkKey::local("default", "nginx").cluster_name(), "");
        assert_eq!(
            WorkKey::remote("east", "default", "nginx").cluster_name(),
            "east"
        );
    }
}
