// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Chart value merging. Values referenced from ConfigMaps and Secrets are
//! loaded first, then the inline values are merged over them.

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client, ResourceExt};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::error::{FlotillaError, Result};
use crate::types::{ChartDeployment, ValuesKeyRef};

/// Merge `src` into `dest`, preferring values from `src`. Maps merge
/// recursively, anything else overwrites.
pub fn merge_values(dest: &mut Map<String, Value>, src: Map<String, Value>) {
    for (key, value) in src {
        match (dest.get_mut(&key), value) {
            (Some(Value::Object(dest_map)), Value::Object(src_map)) => {
                merge_values(dest_map, src_map);
            }
            (_, value) => {
                dest.insert(key, value);
            }
        }
    }
}

/// Resolve the full values document for a ChartDeployment: referenced
/// sources in declaration order, inline values last.
#[instrument(skip(client, cd), fields(deployment = %cd.name_any()))]
pub async fn load_values(
    client: &Client,
    cd: &ChartDeployment,
) -> Result<Map<String, Value>> {
    let namespace = cd.namespace().unwrap_or_default();
    let mut values = Map::new();

    for source in &cd.spec.values_from {
        if let Some(ref cm_ref) = source.config_map_key_ref {
            let loaded = load_config_map_values(client, &namespace, cm_ref).await?;
            merge_values(&mut values, loaded);
        }
        if let Some(ref secret_ref) = source.secret_key_ref {
            let loaded = load_secret_values(client, &namespace, secret_ref).await?;
            merge_values(&mut values, loaded);
        }
    }

    merge_values(&mut values, cd.spec.values.clone());
    debug!(keys = values.len(), "resolved values");
    Ok(values)
}

async fn load_config_map_values(
    client: &Client,
    namespace: &str,
    key_ref: &ValuesKeyRef,
) -> Result<Map<String, Value>> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let cm = match api.get(&key_ref.name).await {
        Ok(cm) => cm,
        Err(kube::Error::Api(ae)) if ae.code == 404 && is_optional(key_ref) => {
            return Ok(Map::new())
        }
        Err(e) => return Err(e.into()),
    };

    match cm.data.as_ref().and_then(|d| d.get(&key_ref.key)) {
        Some(raw) => parse_values_document(raw, &key_ref.name, &key_ref.key),
        None if is_optional(key_ref) => Ok(Map::new()),
        None => Err(FlotillaError::ValuesError(format!(
            "configmap {} has no key {}",
            key_ref.name, key_ref.key
        ))),
    }
}

async fn load_secret_values(
    client: &Client,
    namespace: &str,
    key_ref: &ValuesKeyRef,
) -> Result<Map<String, Value>> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = match api.get(&key_ref.name).await {
        Ok(secret) => secret,
        Err(kube::Error::Api(ae)) if ae.code == 404 && is_optional(key_ref) => {
            return Ok(Map::new())
        }
        Err(e) => return Err(e.into()),
    };

    match secret.data.as_ref().and_then(|d| d.get(&key_ref.key)) {
        Some(bytes) => {
            let raw = String::from_utf8(bytes.0.clone()).map_err(|e| {
                FlotillaError::ValuesError(format!(
                    "secret {} key {} is not utf-8: {}",
                    key_ref.name, key_ref.key, e
                ))
            })?;
            parse_values_document(&raw, &key_ref.name, &key_ref.key)
        }
        None if is_optional(key_ref) => Ok(Map::new()),
        None => Err(FlotillaError::ValuesError(format!(
            "secret {} has no key {}",
            key_ref.name, key_ref.key
        ))),
    }
}

fn is_optional(key_ref: &ValuesKeyRef) -> bool {
    key_ref.optional.unwrap_or(false)
}

/// Values payloads are YAML documents holding a mapping at the top level.
fn parse_values_document(raw: &str, name: &str, key: &str) -> Result<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    let value: Value = serde_yaml::from_str(raw).map_err(|e| {
        FlotillaError::ValuesError(format!("parse values from {}/{}: {}", name, key, e))
    })?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(FlotillaError::ValuesError(format!(
            "values from {}/{} is not a mapping",
            name, key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(json: &str) -> Map<String, Value> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_merge_flat_overwrite() {
        let mut dest = obj(r#"{"a": 1, "b": 2}"#);
        merge_values(&mut dest, obj(r#"{"b": 3, "c": 4}"#));
        assert_eq!(Value::Object(dest), serde_json::json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn test_merge_nested_maps_recursively() {
        let mut dest = obj(r#"{"global": {"registry": "a", "tag": "1"}}"#);
        merge_values(&mut dest, obj(r#"{"global": {"registry": "b"}}"#));
        assert_eq!(
            Value::Object(dest),
            serde_json::json!({"global": {"registry": "b", "tag": "1"}})
        );
    }

    #[test]
    fn test_merge_scalar_replaces_map() {
        let mut dest = obj(r#"{"resources": {"cpu": "10m"}}"#);
        merge_values(&mut dest, obj(r#"{"resources": "none"}"#));
        assert_eq!(Value::Object(dest), serde_json::json!({"resources": "none"}));
    }

    #[test]
    fn test_merge_map_replaces_scalar() {
        let mut dest = obj(r#"{"resources": "none"}"#);
        merge_values(&mut dest, obj(r#"{"resources": {"cpu": "10m"}}"#));
        assert_eq!(
            Value::Object(dest),
            serde_json::json!({"resources": {"cpu": "10m"}})
        );
    }

    #[test]
    fn test_parse_values_document_yaml() {
        let parsed = parse_values_document("replicas: 2\nimage:\n  tag: v1\n", "cm", "values")
            .unwrap();
        assert_eq!(
            Value::Object(parsed),
            serde_json::json!({"replicas": 2, "image": {"tag": "v1"}})
        );
    }

    #[test]
    fn test_parse_values_document_empty() {
        assert!(parse_values_document("", "cm", "values").unwrap().is_empty());
        assert!(parse_values_document("   \n", "cm", "values").unwrap().is_empty());
    }

    #[test]
    fn test_parse_values_document_rejects_scalar() {
        assert!(parse_values_document("just a string", "cm", "values").is_err());
    }
}
