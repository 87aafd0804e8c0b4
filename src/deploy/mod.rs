// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Seams to the external chart tooling. The reconcile engine only ever
//! talks to these traits.

pub mod helm;
pub mod values;

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::ClusterInfo;

/// One install-or-upgrade request against a single cluster.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub cluster: ClusterInfo,
    /// Namespace the release is installed into
    pub namespace: String,
    pub release_name: String,
    /// Chart reference in `<repo>/<name>` form
    pub chart: String,
    /// Empty means resolve the latest available version
    pub version: String,
    /// Merged values document
    pub values: serde_json::Map<String, serde_json::Value>,
    /// Whether a deployed release already exists for this name
    pub deployed: bool,
}

/// Outcome of a successful install or upgrade.
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub release_name: String,
    pub chart_name: String,
    /// The version actually deployed, resolved for unspecified versions
    pub chart_version: String,
    pub notes: String,
}

/// Classified uninstall failures. The deletion manager treats some of
/// these as success to avoid deletions that can never finish.
#[derive(Debug, thiserror::Error)]
pub enum UninstallError {
    #[error("release not found")]
    ReleaseNotFound,

    /// The release exists but its objects are already gone
    #[error("object not found, skipping delete: {0}")]
    ObjectsNotFound(String),

    /// Usually a missing or incompatible resource type on the target,
    /// meaning nothing was actually created there
    #[error("unable to build kubernetes objects for delete: {0}")]
    ResourceBuild(String),

    #[error("{0}")]
    Other(String),
}

impl UninstallError {
    /// True for the failure class that may be suppressed when it is the
    /// only thing standing between a resource and its finalizer removal.
    pub fn is_resource_build(&self) -> bool {
        matches!(self, UninstallError::ResourceBuild(_))
    }
}

/// State of one recorded release revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseState {
    Deployed,
    PendingInstall,
    PendingUpgrade,
    Uninstalling,
    Failed,
    Superseded,
    Uninstalled,
    Unknown,
}

impl ReleaseState {
    /// Revisions stuck in these states block a fresh operation and are
    /// cleaned up before deploying.
    pub fn is_stuck(&self) -> bool {
        matches!(
            self,
            ReleaseState::PendingInstall
                | ReleaseState::PendingUpgrade
                | ReleaseState::Uninstalling
                | ReleaseState::Failed
        )
    }
}

impl std::str::FromStr for ReleaseState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "deployed" => ReleaseState::Deployed,
            "pending-install" => ReleaseState::PendingInstall,
            "pending-upgrade" => ReleaseState::PendingUpgrade,
            "uninstalling" => ReleaseState::Uninstalling,
            "failed" => ReleaseState::Failed,
            "superseded" => ReleaseState::Superseded,
            "uninstalled" => ReleaseState::Uninstalled,
            _ => ReleaseState::Unknown,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReleaseRecord {
    pub name: String,
    pub state: ReleaseState,
}

/// The opaque chart install/upgrade/uninstall capability.
#[async_trait]
pub trait ChartDeployer: Send + Sync {
    async fn install_or_upgrade(&self, req: &DeployRequest) -> Result<DeployOutcome>;

    async fn uninstall(
        &self,
        cluster: &ClusterInfo,
        namespace: &str,
        release_name: &str,
    ) -> std::result::Result<(), UninstallError>;

    /// Recorded revisions for a release, used to detect and clean up
    /// stuck intermediate states before a fresh operation.
    async fn release_history(
        &self,
        cluster: &ClusterInfo,
        namespace: &str,
        release_name: &str,
    ) -> Result<Vec<ReleaseRecord>>;

    /// Drop a stuck release revision record.
    async fn delete_release_record(
        &self,
        cluster: &ClusterInfo,
        namespace: &str,
        release_name: &str,
    ) -> Result<()>;
}

/// A snapshot of one chart repository's index.
#[derive(Debug, Clone, Default)]
pub struct RepoIndex {
    /// Chart name to available versions, newest first
    pub entries: std::collections::BTreeMap<String, Vec<crate::types::ChartVersion>>,
}

/// Resolves a repository's index into chart/version listings.
#[async_trait]
pub trait RepoIndexSource: Send + Sync {
    async fn fetch_index(&self, repo: &crate::types::ChartRepo) -> Result<RepoIndex>;
}
