// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes Event recording. Each cluster watch gets its own sink built
//! on that cluster's credentials, so multi cluster rollouts emit events
//! attributable to the right controller instance.
//!
//! Publishing is fire and forget. A failed event must never break
//! reconciliation.

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

use crate::constants::{events as reasons, OPERATOR_NAME};
use crate::types::ChartDeployment;

#[derive(Clone)]
pub struct EventSink {
    recorder: Recorder,
}

impl EventSink {
    pub fn new(client: Client, cluster: &str) -> Self {
        let instance = std::env::var("POD_IP")
            .ok()
            .filter(|ip| !ip.is_empty())
            .map(|ip| format!("{}@{}", cluster, ip))
            .or_else(|| Some(cluster.to_string()));
        let reporter = Reporter {
            controller: OPERATOR_NAME.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }

    pub async fn synced(&self, cd: &ChartDeployment, note: &str) {
        self.publish(cd, EventType::Normal, reasons::SUCCESS_SYNCED, "Sync", note)
            .await;
    }

    pub async fn failed_sync(&self, cd: &ChartDeployment, error: &(dyn std::fmt::Display + Sync)) {
        self.publish(
            cd,
            EventType::Warning,
            reasons::FAILED_SYNC,
            "Sync",
            &error.to_string(),
        )
        .await;
    }

    pub async fn successful_delete(&self, cd: &ChartDeployment, note: &str) {
        self.publish(
            cd,
            EventType::Normal,
            reasons::SUCCESSFUL_DELETE,
            "Delete",
            note,
        )
        .await;
    }

    pub async fn failed_delete(&self, cd: &ChartDeployment, error: &(dyn std::fmt::Display + Sync)) {
        self.publish(
            cd,
            EventType::Warning,
            reasons::FAILED_DELETE,
            "Delete",
            &error.to_string(),
        )
        .await;
    }

    async fn publish(
        &self,
        cd: &ChartDeployment,
        type_: EventType,
        reason: &str,
        action: &str,
        note: &str,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note.to_string()),
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &cd.object_ref(&())).await {
            warn!(reason = %reason, error = %e, "failed to publish event");
        }
    }
}
