// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-cluster watch state and the registry that tracks it.

use std::collections::HashMap;
use std::sync::Arc;

use kube::runtime::reflector::Store;
use kube::Client;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::constants::DEFAULT_CLUSTER_NAME;
use crate::engine::events::EventSink;
use crate::queue::WorkQueue;
use crate::types::ChartDeployment;
use crate::watch::key::WorkKey;

/// Everything one cluster's watch session owns: its read cache, its work
/// queue, its event sink, and the tasks driving them.
pub struct ClusterWatchHandle {
    /// `None` for the cluster this process runs in
    pub cluster: Option<String>,
    pub client: Client,
    pub store: Store<ChartDeployment>,
    pub queue: Arc<WorkQueue<WorkKey>>,
    pub events: EventSink,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterWatchHandle {
    pub fn new(
        cluster: Option<String>,
        client: Client,
        store: Store<ChartDeployment>,
        queue: Arc<WorkQueue<WorkKey>>,
        events: EventSink,
    ) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            client,
            store,
            queue,
            events,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Registry key and log label for this session
    pub fn cluster_label(&self) -> &str {
        self.cluster.as_deref().unwrap_or(DEFAULT_CLUSTER_NAME)
    }

    pub async fn track_task(&self, task: JoinHandle<()>) {
        self.tasks.lock().await.push(task);
    }

    /// Stop the queue and tear down the session's tasks. Workers drain
    /// naturally once the queue reports shutdown.
    pub async fn shut_down(&self) {
        self.queue.shut_down().await;
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }
}

/// Concurrency-safe cluster name to watch handle association.
#[derive(Default)]
pub struct WatchRegistry {
    inner: RwLock<HashMap<String, Arc<ClusterWatchHandle>>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ClusterWatchHandle>> {
        self.inner.read().await.get(name).cloned()
    }

    pub async fn insert(&self, name: String, handle: Arc<ClusterWatchHandle>) {
        self.inner.write().await.insert(name, handle);
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.inner.read().await.contains_key(name)
    }

    /// Remove a cluster's watch and tear it down.
    pub async fn remove(&self, name: &str) {
        let handle = self.inner.write().await.remove(name);
        if let Some(handle) = handle {
            handle.shut_down().await;
        }
    }

    pub async fn names(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// Tear down every registered watch, used at process shutdown.
    pub async fn shut_down_all(&self) {
        let handles: Vec<_> = self.inner.write().await.drain().collect();
        for (_, handle) in handles {
            handle.shut_down().await;
        }
    }
}
