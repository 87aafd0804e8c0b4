// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace the cluster catalog resources live in
    pub catalog_namespace: String,
    /// Cluster name a dependency may be synced to when the dependent
    /// resource has no explicit target cluster
    pub global_cluster_name: String,
    /// Namespace holding ChartRepo resources and their Chart projections
    pub system_namespace: String,
    /// Seconds between cluster watch supervisor passes
    pub supervisor_interval_secs: u64,
    /// Seconds the supervisor waits before its first pass
    pub supervisor_grace_secs: u64,
    /// Seconds between re-deliveries of cached objects to the work queues
    pub resync_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let catalog_namespace = env::var("CATALOG_NAMESPACE")
            .context("CATALOG_NAMESPACE environment variable not set")?;
        let global_cluster_name =
            env::var("GLOBAL_CLUSTER_NAME").unwrap_or_else(|_| "global".to_string());
        let system_namespace =
            env::var("SYSTEM_NAMESPACE").unwrap_or_else(|_| catalog_namespace.clone());

        Ok(Config {
            catalog_namespace,
            global_cluster_name,
            system_namespace,
            supervisor_interval_secs: parse_env_or("SUPERVISOR_INTERVAL_SECS", 120),
            supervisor_grace_secs: parse_env_or("SUPERVISOR_GRACE_SECS", 120),
            resync_interval_secs: parse_env_or("RESYNC_INTERVAL_SECS", 30),
        })
    }
}

fn parse_env_or(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        catalog_namespace: "flotilla-system".to_string(),
        global_cluster_name: "global".to_string(),
        system_namespace: "flotilla-system".to_string(),
        supervisor_interval_secs: 120,
        supervisor_grace_secs: 120,
        resync_interval_secs: 30,
    }
}
