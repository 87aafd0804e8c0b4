// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Chart deployer backed by the helm binary. Each call renders a
//! kubeconfig for the target cluster and runs one helm invocation with a
//! fixed timeout.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::error::{FlotillaError, Result};
use crate::registry::ClusterInfo;

use super::{ChartDeployer, DeployOutcome, DeployRequest, ReleaseRecord, UninstallError};

/// Helm's own operation timeout, matching the install timeout used for
/// interactive installs.
const HELM_TIMEOUT: Duration = Duration::from_secs(180);

/// Extra slack for process startup and chart download before we give up
/// on the subprocess itself.
const PROCESS_TIMEOUT: Duration = Duration::from_secs(240);

pub struct HelmCliDeployer {
    work_dir: PathBuf,
}

impl HelmCliDeployer {
    pub fn new() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("flotilla"),
        }
    }

    async fn write_kubeconfig(&self, cluster: &ClusterInfo) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| FlotillaError::DeployError(format!("create work dir: {}", e)))?;
        let path = self
            .work_dir
            .join(format!("kubeconfig-{}.yaml", cluster.name));
        tokio::fs::write(&path, cluster.to_kubeconfig_yaml())
            .await
            .map_err(|e| FlotillaError::DeployError(format!("write kubeconfig: {}", e)))?;
        Ok(path)
    }

    async fn run_helm(&self, cluster: &ClusterInfo, args: &[&str]) -> Result<std::process::Output> {
        let kubeconfig = self.write_kubeconfig(cluster).await?;
        debug!(cluster = %cluster.name, ?args, "running helm");

        let run = Command::new("helm")
            .args(args)
            .env("KUBECONFIG", &kubeconfig)
            .output();

        match tokio::time::timeout(PROCESS_TIMEOUT, run).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(FlotillaError::DeployError(format!("helm: {}", e))),
            Err(_) => Err(FlotillaError::DeployError(format!(
                "helm timed out after {:?} against cluster {}",
                PROCESS_TIMEOUT, cluster.name
            ))),
        }
    }
}

impl Default for HelmCliDeployer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChartDeployer for HelmCliDeployer {
    #[instrument(skip(self, req), fields(release = %req.release_name, cluster = %req.cluster.name))]
    async fn install_or_upgrade(&self, req: &DeployRequest) -> Result<DeployOutcome> {
        let values_path = self
            .work_dir
            .join(format!("values-{}-{}.yaml", req.cluster.name, req.release_name));
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| FlotillaError::DeployError(format!("create work dir: {}", e)))?;
        let values_doc = serde_yaml::to_string(&req.values)
            .map_err(|e| FlotillaError::DeployError(format!("render values: {}", e)))?;
        tokio::fs::write(&values_path, values_doc)
            .await
            .map_err(|e| FlotillaError::DeployError(format!("write values: {}", e)))?;

        let timeout = format!("{}s", HELM_TIMEOUT.as_secs());
        let values_arg = values_path.to_string_lossy().to_string();
        let mut args: Vec<&str> = vec![
            "upgrade",
            "--install",
            &req.release_name,
            &req.chart,
            "--namespace",
            &req.namespace,
            "--values",
            &values_arg,
            "--history-max",
            "10",
            "--reset-values",
            "--timeout",
            &timeout,
            "--output",
            "json",
        ];
        if !req.version.is_empty() {
            args.push("--version");
            args.push(&req.version);
        }

        let output = self.run_helm(&req.cluster, &args).await?;
        if !output.status.success() {
            return Err(FlotillaError::DeployError(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let release: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| FlotillaError::DeployError(format!("parse helm output: {}", e)))?;
        let outcome = DeployOutcome {
            release_name: json_str(&release, &["name"]).unwrap_or_else(|| req.release_name.clone()),
            chart_name: json_str(&release, &["chart", "metadata", "name"]).unwrap_or_else(|| {
                crate::types::chart_deployment::parse_chart_name(&req.chart)
                    .1
                    .to_string()
            }),
            chart_version: json_str(&release, &["chart", "metadata", "version"])
                .unwrap_or_default(),
            notes: json_str(&release, &["info", "notes"]).unwrap_or_default(),
        };
        info!(
            chart = %outcome.chart_name,
            version = %outcome.chart_version,
            "release deployed"
        );
        Ok(outcome)
    }

    #[instrument(skip(self, cluster), fields(release = %release_name, cluster = %cluster.name))]
    async fn uninstall(
        &self,
        cluster: &ClusterInfo,
        namespace: &str,
        release_name: &str,
    ) -> std::result::Result<(), UninstallError> {
        let args = ["uninstall", release_name, "--namespace", namespace];
        let output = self
            .run_helm(cluster, &args)
            .await
            .map_err(|e| UninstallError::Other(e.to_string()))?;

        if output.status.success() {
            info!("release uninstalled");
            return Ok(());
        }
        Err(classify_uninstall_stderr(&String::from_utf8_lossy(
            &output.stderr,
        )))
    }

    async fn release_history(
        &self,
        cluster: &ClusterInfo,
        namespace: &str,
        release_name: &str,
    ) -> Result<Vec<ReleaseRecord>> {
        let args = [
            "history",
            release_name,
            "--namespace",
            namespace,
            "--output",
            "json",
        ];
        let output = self.run_helm(cluster, &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("release: not found") {
                return Ok(Vec::new());
            }
            return Err(FlotillaError::DeployError(stderr.trim().to_string()));
        }

        let revisions: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout)
            .map_err(|e| FlotillaError::DeployError(format!("parse helm history: {}", e)))?;
        Ok(revisions
            .iter()
            .map(|rev| ReleaseRecord {
                name: release_name.to_string(),
                state: json_str(rev, &["status"])
                    .unwrap_or_default()
                    .parse()
                    .unwrap_or(super::ReleaseState::Unknown),
            })
            .collect())
    }

    async fn delete_release_record(
        &self,
        cluster: &ClusterInfo,
        namespace: &str,
        release_name: &str,
    ) -> Result<()> {
        let args = [
            "uninstall",
            release_name,
            "--namespace",
            namespace,
            "--no-hooks",
        ];
        let output = self.run_helm(cluster, &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("release: not found") {
                warn!(release = %release_name, error = %stderr.trim(), "delete stuck release failed");
            }
        }
        Ok(())
    }
}

/// Repo index resolution through `helm repo add` / `helm search repo`.
/// Basic-auth credentials come from the secret referenced by the repo.
pub struct HelmRepoIndexSource {
    client: kube::Client,
}

impl HelmRepoIndexSource {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    async fn repo_credentials(
        &self,
        repo: &crate::types::ChartRepo,
    ) -> Result<Option<(String, String)>> {
        use k8s_openapi::api::core::v1::Secret;
        use kube::{Api, ResourceExt};

        let Some(ref secret_ref) = repo.spec.secret else {
            return Ok(None);
        };
        let namespace = secret_ref
            .namespace
            .clone()
            .or_else(|| repo.namespace())
            .unwrap_or_default();
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        let secret = secrets.get(&secret_ref.name).await?;

        let field = |key: &str| {
            secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .and_then(|b| String::from_utf8(b.0.clone()).ok())
                .unwrap_or_default()
        };
        Ok(Some((field("username"), field("password"))))
    }
}

#[async_trait]
impl super::RepoIndexSource for HelmRepoIndexSource {
    async fn fetch_index(&self, repo: &crate::types::ChartRepo) -> Result<super::RepoIndex> {
        use kube::ResourceExt;

        let name = repo.name_any();
        let mut add_args = vec![
            "repo".to_string(),
            "add".to_string(),
            name.clone(),
            repo.spec.url.clone(),
            "--force-update".to_string(),
        ];
        if let Some((username, password)) = self.repo_credentials(repo).await? {
            add_args.extend([
                "--username".to_string(),
                username,
                "--password".to_string(),
                password,
            ]);
        }

        for args in [add_args, vec!["repo".to_string(), "update".to_string(), name.clone()]] {
            let output = Command::new("helm")
                .args(&args)
                .output()
                .await
                .map_err(|e| FlotillaError::RepoIndexError(format!("helm: {}", e)))?;
            if !output.status.success() {
                return Err(FlotillaError::RepoIndexError(
                    String::from_utf8_lossy(&output.stderr).trim().to_string(),
                ));
            }
        }

        let output = Command::new("helm")
            .args([
                "search",
                "repo",
                &format!("{}/", name),
                "--versions",
                "--output",
                "json",
            ])
            .output()
            .await
            .map_err(|e| FlotillaError::RepoIndexError(format!("helm: {}", e)))?;
        if !output.status.success() {
            return Err(FlotillaError::RepoIndexError(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let rows: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout)
            .map_err(|e| FlotillaError::RepoIndexError(format!("parse helm search: {}", e)))?;

        let mut index = super::RepoIndex::default();
        for row in rows {
            let full_name = json_str(&row, &["name"]).unwrap_or_default();
            let chart = full_name
                .split_once('/')
                .map(|(_, c)| c.to_string())
                .unwrap_or(full_name);
            index
                .entries
                .entry(chart)
                .or_default()
                .push(crate::types::ChartVersion {
                    version: json_str(&row, &["version"]).unwrap_or_default(),
                    app_version: json_str(&row, &["app_version"]).unwrap_or_default(),
                    description: json_str(&row, &["description"]).unwrap_or_default(),
                    ..Default::default()
                });
        }
        Ok(index)
    }
}

fn classify_uninstall_stderr(stderr: &str) -> UninstallError {
    let msg = stderr.trim().to_string();
    if msg.contains("release: not found") {
        UninstallError::ReleaseNotFound
    } else if msg.contains("object not found, skipping delete") {
        UninstallError::ObjectsNotFound(msg)
    } else if msg.contains("unable to build kubernetes objects for delete") {
        UninstallError::ResourceBuild(msg)
    } else {
        UninstallError::Other(msg)
    }
}

fn json_str(value: &serde_json::Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for part in path {
        current = current.get(part)?;
    }
    current.as_str().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_release_not_found() {
        let err = classify_uninstall_stderr("Error: uninstall: Release not loaded: x: release: not found");
        assert!(matches!(err, UninstallError::ReleaseNotFound));
    }

    #[test]
    fn test_classify_objects_not_found() {
        let err = classify_uninstall_stderr(
            "warning: deletion errors: object not found, skipping delete",
        );
        assert!(matches!(err, UninstallError::ObjectsNotFound(_)));
    }

    #[test]
    fn test_classify_resource_build() {
        let err = classify_uninstall_stderr(
            "Error: unable to build kubernetes objects for delete: resource mapping not found",
        );
        assert!(matches!(err, UninstallError::ResourceBuild(_)));
    }

    #[test]
    fn test_classify_other() {
        let err = classify_uninstall_stderr("Error: connection refused");
        assert!(matches!(err, UninstallError::Other(_)));
    }

    #[test]
    fn test_json_str_path() {
        let value = serde_json::json!({"chart": {"metadata": {"name": "nginx"}}});
        assert_eq!(
            json_str(&value, &["chart", "metadata", "name"]).as_deref(),
            Some("nginx")
        );
        assert_eq!(json_str(&value, &["chart", "metadata", "version"]), None);
    }
}
