// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::cluster::SecretRef;

/// A Helm chart repository the controller resolves charts from.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[kube(group = "flotilla.geeko.me", version = "v1", kind = "ChartRepo")]
#[kube(namespaced)]
#[kube(status = "ChartRepoStatus")]
#[serde(rename_all = "camelCase")]
pub struct ChartRepoSpec {
    /// The repo's index URL. Immutable after create.
    pub url: String,

    /// Basic-auth credentials for the repo
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretRef>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub enum ChartRepoPhase {
    /// The repo index was fetched and its charts are projected
    Synced,
    /// The last index fetch failed, see reason
    #[default]
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartRepoStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ChartRepoPhase>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// A read-only projection of one chart in a repo's index. Regenerated on
/// every index change and owner-referenced to the ChartRepo so it is
/// garbage collected with it.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(group = "flotilla.geeko.me", version = "v1", kind = "Chart")]
#[kube(namespaced)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    /// Available versions, newest first, as listed by the repo index
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<ChartVersion>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartVersion {
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}
