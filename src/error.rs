// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlotillaError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Failed to build cluster client: {0}")]
    ClusterClientError(String),

    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("Cluster watch for {0} not initialized")]
    WatchNotStarted(String),

    #[error("dependency {dependency} of {dependent} is not synced to cluster {cluster} yet")]
    DependencyNotSynced {
        dependency: String,
        dependent: String,
        cluster: String,
    },

    #[error("Chart deploy failed: {0}")]
    DeployError(String),

    #[error("Failed to load values: {0}")]
    ValuesError(String),

    #[error("Chart repo index error: {0}")]
    RepoIndexError(String),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("{0}")]
    Aggregate(AggregateError),
}

pub type Result<T> = std::result::Result<T, FlotillaError>;

impl FlotillaError {
    /// True when the underlying Kubernetes error is a 404.
    pub fn is_not_found(&self) -> bool {
        match self {
            FlotillaError::ClusterNotFound(_) => true,
            FlotillaError::KubeError(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }
}

/// Collects per-cluster failures from a fan-out pass into one error,
/// keeping each cluster name attached to its cause.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<(String, String)>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cluster: impl Into<String>, err: impl ToString) {
        self.errors.push((cluster.into(), err.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(FlotillaError::Aggregate(self))
        }
    }
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(|(cluster, msg)| format!("{}: {}", cluster, msg))
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{}", joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_empty_is_ok() {
        assert!(AggregateError::new().into_result().is_ok());
    }

    #[test]
    fn aggregate_joins_cluster_messages() {
        let mut agg = AggregateError::new();
        agg.push("c1", "boom");
        agg.push("c2", "bang");
        let err = agg.into_result().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("c1: boom"));
        assert!(msg.contains("c2: bang"));
    }

    #[test]
    fn not_found_detection() {
        assert!(FlotillaError::ClusterNotFound("x".to_string()).is_not_found());
        assert!(!FlotillaError::DeployError("x".to_string()).is_not_found());
    }
}
