// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Spec hashing for no-op detection. A ChartDeployment is only deployed
//! when its current hash differs from the hash recorded in status.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::constants::annotations;
use crate::types::{ChartDeployment, ChartDeploymentSpec};

/// Hash of spec plus annotations. This is the hash written to
/// `status.lastSpecHash` on a successful sync.
pub fn unique_hash(cd: &ChartDeployment) -> String {
    let doc = serde_json::json!({
        "spec": &cd.spec,
        "annotations": cd.metadata.annotations.clone().unwrap_or_default(),
    });
    hash_value(&doc)
}

/// Hash of the spec alone, as written by releases that predate annotation
/// hashing. Kept so upgrades do not redeploy every unchanged chart.
pub fn spec_hash(spec: &ChartDeploymentSpec) -> String {
    let doc = serde_json::to_value(spec).unwrap_or_default();
    hash_value(&doc)
}

/// Check whether a ChartDeployment's recorded hash still matches its
/// current spec. A spec-only hash from an older release is accepted
/// unless the force-resync annotation is present.
pub fn is_synced(cd: &ChartDeployment) -> bool {
    let last = match cd.status.as_ref() {
        Some(s) if !s.last_spec_hash.is_empty() => s.last_spec_hash.as_str(),
        _ => return false,
    };

    if last == unique_hash(cd) {
        return true;
    }

    if last == spec_hash(&cd.spec) {
        let forced = cd
            .metadata
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(annotations::FORCE_RESYNC));
        return !forced;
    }

    false
}

// serde_json maps sort their keys, so serialization is canonical and the
// hash is independent of field insertion order.
fn hash_value(value: &serde_json::Value) -> String {
    let json = value.to_string();
    let mut hasher = DefaultHasher::new();
    json.hash(&mut hasher);
    format!("{}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChartDeploymentStatus;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn make_deployment(values_json: &str) -> ChartDeployment {
        let values = serde_json::from_str(values_json).unwrap();
        ChartDeployment {
            metadata: ObjectMeta {
                name: Some("demo".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: ChartDeploymentSpec {
                chart: "stable/demo".to_string(),
                version: "1.2.1".to_string(),
                namespace: "default".to_string(),
                release_name: "demo".to_string(),
                install_to_all_clusters: true,
                values,
                ..Default::default()
            },
            status: None,
        }
    }

    #[test]
    fn test_hash_stable_across_deep_copy() {
        let cd = make_deployment(r#"{"replicas": 1, "global": {"registry": "10.0.128.234"}}"#);
        let copy = cd.clone();
        assert_eq!(unique_hash(&cd), unique_hash(&copy));
        assert_eq!(spec_hash(&cd.spec), spec_hash(&copy.spec));
    }

    #[test]
    fn test_hash_independent_of_map_order() {
        let a = make_deployment(r#"{"alpha": 1, "beta": {"x": 1, "y": 2}}"#);
        let b = make_deployment(r#"{"beta": {"y": 2, "x": 1}, "alpha": 1}"#);
        assert_eq!(unique_hash(&a), unique_hash(&b));
    }

    #[test]
    fn test_hash_changes_with_spec() {
        let a = make_deployment(r#"{"replicas": 1}"#);
        let b = make_deployment(r#"{"replicas": 2}"#);
        assert_ne!(unique_hash(&a), unique_hash(&b));
    }

    #[test]
    fn test_hash_changes_with_annotations() {
        let mut a = make_deployment(r#"{"replicas": 1}"#);
        let plain = unique_hash(&a);
        a.metadata.annotations = Some(BTreeMap::from([(
            "example.com/team".to_string(),
            "web".to_string(),
        )]));
        assert_ne!(plain, unique_hash(&a));
    }

    #[test]
    fn test_is_synced_with_current_hash() {
        let mut cd = make_deployment(r#"{"replicas": 1}"#);
        cd.status = Some(ChartDeploymentStatus {
            last_spec_hash: unique_hash(&cd),
            ..Default::default()
        });
        assert!(is_synced(&cd));
    }

    #[test]
    fn test_is_synced_without_status() {
        let cd = make_deployment(r#"{"replicas": 1}"#);
        assert!(!is_synced(&cd));
    }

    #[test]
    fn test_is_synced_grandfathers_spec_only_hash() {
        let mut cd = make_deployment(r#"{"replicas": 1}"#);
        cd.metadata.annotations = Some(BTreeMap::from([(
            "example.com/team".to_string(),
            "web".to_string(),
        )]));
        cd.status = Some(ChartDeploymentStatus {
            last_spec_hash: spec_hash(&cd.spec),
            ..Default::default()
        });
        assert!(is_synced(&cd));
    }

    #[test]
    fn test_force_resync_rejects_spec_only_hash() {
        let mut cd = make_deployment(r#"{"replicas": 1}"#);
        cd.metadata.annotations = Some(BTreeMap::from([(
            annotations::FORCE_RESYNC.to_string(),
            "true".to_string(),
        )]));
        cd.status = Some(ChartDeploymentStatus {
            last_spec_hash: spec_hash(&cd.spec),
            ..Default::default()
        });
        assert!(!is_synced(&cd));
    }

    #[test]
    fn test_stale_hash_not_synced() {
        let mut cd = make_deployment(r#"{"replicas": 1}"#);
        cd.status = Some(ChartDeploymentStatus {
            last_spec_hash: "1234567890".to_string(),
            ..Default::default()
        });
        assert!(!is_synced(&cd));
    }
}
