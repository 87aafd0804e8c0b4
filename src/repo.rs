// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! ChartRepo refreshing. Every repo index snapshot is projected into
//! Chart resources owned by the ChartRepo, so deleting the repo garbage
//! collects its charts.

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::runtime::watcher;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::watcher::Config as WatcherConfig;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};

use crate::deploy::RepoIndexSource;
use crate::error::Result;
use crate::types::{Chart, ChartRepo, ChartRepoPhase, ChartSpec};

/// Watches ChartRepos in the system namespace and keeps their Chart
/// projections in step with the upstream index.
pub struct RepoRefresher {
    client: Client,
    source: Arc<dyn RepoIndexSource>,
    namespace: String,
    shutdown: watch::Receiver<bool>,
    // one refresh at a time, concurrent index writes interleave badly
    refresh_lock: Mutex<()>,
}

impl RepoRefresher {
    pub fn new(
        client: Client,
        source: Arc<dyn RepoIndexSource>,
        namespace: String,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            source,
            namespace,
            shutdown,
            refresh_lock: Mutex::new(()),
        }
    }

    pub async fn run(self) {
        info!(namespace = %self.namespace, "starting chart repo refresher");
        let api: Api<ChartRepo> = Api::namespaced(self.client.clone(), &self.namespace);
        let stream = watcher(api, WatcherConfig::default());
        futures::pin_mut!(stream);

        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = stream.try_next() => match event {
                    Ok(Some(watcher::Event::Apply(repo) | watcher::Event::InitApply(repo))) => {
                        self.sync_chart_repo(&repo).await;
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "chart repo watch error");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                },
            }
        }
    }

    #[instrument(skip(self, repo), fields(repo = %repo.name_any()))]
    pub async fn sync_chart_repo(&self, repo: &ChartRepo) {
        let _guard = self.refresh_lock.lock().await;

        let index = match self.source.fetch_index(repo).await {
            Ok(index) => index,
            Err(e) => {
                error!(error = %e, "fetch repo index failed");
                self.update_status(repo, ChartRepoPhase::Failed, &e.to_string())
                    .await;
                return;
            }
        };

        if let Err(e) = self.project_charts(repo, &index).await {
            error!(error = %e, "project charts failed");
            self.update_status(repo, ChartRepoPhase::Failed, &e.to_string())
                .await;
            return;
        }

        self.update_status(repo, ChartRepoPhase::Synced, "").await;
        info!("synced chartrepo");
    }

    /// Upsert a Chart projection per index entry and drop projections for
    /// charts no longer in the index.
    async fn project_charts(
        &self,
        repo: &ChartRepo,
        index: &crate::deploy::RepoIndex,
    ) -> Result<()> {
        let api: Api<Chart> = Api::namespaced(self.client.clone(), &self.namespace);
        let repo_name = repo.name_any();

        for (name, versions) in &index.entries {
            let chart = generate_chart_resource(repo, name, versions.clone());
            let chart_name = chart.name_any();

            match api.get(&chart_name).await {
                Ok(old) => {
                    // version count is a good enough change signal for a
                    // regenerated projection
                    if old.spec.versions.len() != chart.spec.versions.len() {
                        let mut updated = chart.clone();
                        updated.metadata.resource_version = old.resource_version();
                        api.replace(&chart_name, &PostParams::default(), &updated)
                            .await?;
                        debug!(chart = %chart_name, "updated chart projection");
                    }
                }
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    info!(chart = %chart_name, "chart not found, create");
                    api.create(&PostParams::default(), &chart).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        // remove projections whose chart vanished from the index
        let lp = ListParams::default().labels(&format!("repo={}", repo_name));
        for item in api.list(&lp).await?.items {
            let short = item.name_any();
            let short = short.split('.').next().unwrap_or_default().to_string();
            if !index.entries.contains_key(&short) {
                info!(chart = %item.name_any(), "delete chart projection");
                api.delete(&item.name_any(), &Default::default()).await?;
            }
        }

        Ok(())
    }

    async fn update_status(&self, repo: &ChartRepo, phase: ChartRepoPhase, reason: &str) {
        let api: Api<ChartRepo> = Api::namespaced(self.client.clone(), &self.namespace);
        let patch = serde_json::json!({
            "status": {
                "phase": phase,
                "reason": reason,
            }
        });
        if let Err(e) = api
            .patch_status(&repo.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            error!(repo = %repo.name_any(), error = %e, "update chartrepo status failed");
        }
    }
}

/// Name of a Chart projection: `<chart>.<repo>`, lowercased.
pub fn chart_resource_name(repo: &str, chart: &str) -> String {
    format!("{}.{}", chart.to_lowercase(), repo)
}

fn generate_chart_resource(
    repo: &ChartRepo,
    name: &str,
    versions: Vec<crate::types::ChartVersion>,
) -> Chart {
    let owner = OwnerReference {
        api_version: ChartRepo::api_version(&()).to_string(),
        kind: ChartRepo::kind(&()).to_string(),
        name: repo.name_any(),
        uid: repo.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: None,
    };

    Chart {
        metadata: ObjectMeta {
            name: Some(chart_resource_name(&repo.name_any(), name)),
            namespace: repo.namespace(),
            labels: Some(
                [("repo".to_string(), repo.name_any())]
                    .into_iter()
                    .collect(),
            ),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: ChartSpec { versions },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChartVersion;

    fn make_repo(name: &str) -> ChartRepo {
        ChartRepo {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("flotilla-system".to_string()),
                uid: Some("repo-uid".to_string()),
                ..Default::default()
            },
            spec: crate::types::chart_repo::ChartRepoSpec {
                url: "https://charts.example.com".to_string(),
                secret: None,
            },
            status: None,
        }
    }

    #[test]
    fn test_chart_resource_name() {
        assert_eq!(chart_resource_name("stable", "NGINX"), "nginx.stable");
        assert_eq!(chart_resource_name("stable", "redis"), "redis.stable");
    }

    #[test]
    fn test_generate_chart_resource_owner_ref() {
        let repo = make_repo("stable");
        let chart = generate_chart_resource(
            &repo,
            "nginx",
            vec![ChartVersion {
                version: "1.2.3".to_string(),
                ..Default::default()
            }],
        );

        assert_eq!(chart.name_any(), "nginx.stable");
        let owners = chart.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "ChartRepo");
        assert_eq!(owners[0].name, "stable");
        assert_eq!(owners[0].controller, Some(true));
        assert_eq!(
            chart.metadata.labels.as_ref().unwrap().get("repo").unwrap(),
            "stable"
        );
    }
}
