// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Watch event translation. These rules decide which change notifications
//! become work items. Status-only writes must not enqueue or every status
//! update would trigger another reconcile of itself.

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::types::{ChartDeployment, ChartDeploymentSpec};

/// The slice of a ChartDeployment a watch session remembers between
/// notifications, enough to tell real changes from bookkeeping writes.
#[derive(Clone, Debug)]
pub struct Observed {
    pub resource_version: String,
    pub spec: ChartDeploymentSpec,
    pub annotations: BTreeMap<String, String>,
}

impl Observed {
    pub fn of(cd: &ChartDeployment) -> Self {
        Self {
            resource_version: cd.resource_version().unwrap_or_default(),
            spec: cd.spec.clone(),
            annotations: cd.annotations_or_default(),
        }
    }
}

/// Decide whether an update notification becomes a work item.
///
/// Fan-out resources are always enqueued so newly registered clusters get
/// picked up. A fresh deletion timestamp is always enqueued. Everything
/// else is suppressed unless spec or annotations actually changed.
pub fn should_enqueue_update(old: &Observed, new: &ChartDeployment) -> bool {
    if old.spec.install_to_all_clusters && new.spec.install_to_all_clusters {
        return true;
    }

    if new.metadata.deletion_timestamp.is_some() {
        return true;
    }

    if old.resource_version == new.resource_version().unwrap_or_default() {
        return false;
    }

    if old.spec == new.spec && old.annotations == new.annotations_or_default() {
        return false;
    }

    true
}
