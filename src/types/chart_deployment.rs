// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ChartDeployment describes a desired Helm chart deployment, either to a
/// single named cluster or fanned out to every cluster in the catalog.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[kube(group = "flotilla.geeko.me", version = "v1", kind = "ChartDeployment")]
#[kube(namespaced)]
#[kube(status = "ChartDeploymentStatus")]
#[serde(rename_all = "camelCase")]
pub struct ChartDeploymentSpec {
    /// Chart reference in `<repo>/<name>` form
    pub chart: String,

    /// Chart version to deploy. Empty means resolve the latest available.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Namespace the release lives in, defaults to the resource namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Cluster to deploy to. Ignored when installToAllClusters is set.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,

    /// Deploy this chart to every cluster in the catalog, including
    /// clusters registered after this resource was created
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub install_to_all_clusters: bool,

    /// Names of ChartDeployments in the same namespace that must be
    /// synced before this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Release name, defaults to the resource name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release_name: String,

    /// Inline chart values
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub values: serde_json::Map<String, serde_json::Value>,

    /// Values pulled from ConfigMap/Secret keys, merged under the inline values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_from: Vec<ValuesFromSource>,
}

/// A source of chart values. Only one of the fields may be set.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValuesFromSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<ValuesKeyRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<ValuesKeyRef>,
}

/// Selects a key of a ConfigMap or Secret in the resource's namespace
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValuesKeyRef {
    pub name: String,
    pub key: String,
    /// When true a missing object or key resolves to empty values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub enum ChartDeploymentPhase {
    Pending,
    Synced,
    PartialSynced,
    Failed,
    #[default]
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartDeploymentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ChartDeploymentPhase>,

    /// Hash of the synced spec. A different current hash means the chart
    /// must be deployed again.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_spec_hash: String,

    /// Clusters this resource is confirmed synced to. Only meaningful
    /// when installToAllClusters is set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synced_clusters: Vec<String>,

    /// Chart version actually deployed, recorded for unspecified versions
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Release notes printed by the chart
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ChartDeploymentCondition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartDeploymentCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl ChartDeploymentStatus {
    /// Record a condition, replacing any previous condition of the same
    /// type.
    pub fn set_condition(
        &mut self,
        condition_type: &str,
        status: &str,
        reason: &str,
        message: &str,
    ) {
        let condition = ChartDeploymentCondition {
            condition_type: condition_type.to_string(),
            status: status.to_string(),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            last_transition_time: Some(k8s_openapi::chrono::Utc::now().to_rfc3339()),
        };
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
    }
}

impl ChartDeployment {
    /// Release name for this deployment, the resource name unless overridden
    pub fn release_name(&self) -> String {
        if self.spec.release_name.is_empty() {
            self.name_any()
        } else {
            self.spec.release_name.clone()
        }
    }

    /// Namespace the release is installed into, the resource namespace
    /// unless overridden
    pub fn release_namespace(&self) -> String {
        if self.spec.namespace.is_empty() {
            self.namespace().unwrap_or_default()
        } else {
            self.spec.namespace.clone()
        }
    }

    pub fn phase(&self) -> ChartDeploymentPhase {
        self.status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_default()
    }

    /// Check if this deployment has been synced to the named cluster.
    /// For a single-cluster deployment that means the target matches and
    /// the phase is Synced; under fan-out it means membership in the
    /// recorded synced cluster list.
    pub fn is_cluster_synced(&self, name: &str) -> bool {
        if !self.spec.install_to_all_clusters {
            return name == self.spec.cluster_name
                && self.phase() == ChartDeploymentPhase::Synced;
        }

        self.status
            .as_ref()
            .map(|s| s.synced_clusters.iter().any(|c| c == name))
            .unwrap_or(false)
    }

    pub fn annotations_or_default(&self) -> BTreeMap<String, String> {
        self.metadata.annotations.clone().unwrap_or_default()
    }

    /// True when the given annotation is set to "true"
    pub fn has_switch_annotation(&self, key: &str) -> bool {
        self.annotations().get(key).is_some_and(|v| v == "true")
    }
}

/// Parse a `<repo>/<chart>` reference. A bare name has no repo part.
pub fn parse_chart_name(name: &str) -> (&str, &str) {
    match name.split_once('/') {
        Some((repo, chart)) => (repo, chart),
        None => ("", name),
    }
}
