// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-cluster watch sessions. A session owns one watcher stream feeding
//! one work queue. The stream's only side effect is enqueueing keys;
//! every state transition happens in the worker loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use kube::runtime::reflector::{self, store::Writer};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, ResourceExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::bootstrap::chart_deployment_crd_exists;
use crate::constants::queue::WORKERS_PER_CLUSTER;
use crate::constants::DEFAULT_CLUSTER_NAME;
use crate::engine::controller::Controller;
use crate::engine::events::EventSink;
use crate::error::{FlotillaError, Result};
use crate::queue::WorkQueue;
use crate::registry::ClusterInfo;
use crate::types::ChartDeployment;
use crate::watch::events::{should_enqueue_update, Observed};
use crate::watch::handle::ClusterWatchHandle;
use crate::watch::key::WorkKey;

/// How long the first list may take before the session is torn down again
const STORE_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Establish the watch session for one cluster (`None` for the local
/// cluster), start its workers, and register it. Failure here only
/// affects this cluster.
pub async fn start(
    ctrl: Arc<Controller>,
    cluster: Option<ClusterInfo>,
) -> Result<Arc<ClusterWatchHandle>> {
    let label = cluster
        .as_ref()
        .map(|c| c.name.clone())
        .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string());

    let client = match &cluster {
        None => ctrl.client.clone(),
        Some(info) => info.to_client().await?,
    };

    if cluster.is_some() && !chart_deployment_crd_exists(&client).await? {
        warn!(cluster = %label, "ChartDeployment CRD not present on cluster");
        return Err(FlotillaError::WatchNotStarted(label));
    }

    let (store, writer) = reflector::store::<ChartDeployment>();
    let queue: Arc<WorkQueue<WorkKey>> = WorkQueue::new();
    let events = EventSink::new(client.clone(), &label);
    let handle = ClusterWatchHandle::new(
        cluster.as_ref().map(|c| c.name.clone()),
        client,
        store.clone(),
        queue,
        events,
    );

    let pump = tokio::spawn(run_stream(
        Arc::clone(&ctrl),
        Arc::clone(&handle),
        writer,
    ));
    handle.track_task(pump).await;

    // wait for the initial list before letting workers look things up
    debug!(cluster = %label, "waiting for watch cache to sync");
    match timeout(STORE_READY_TIMEOUT, store.wait_until_ready()).await {
        Ok(Ok(())) => {}
        _ => {
            handle.shut_down().await;
            return Err(FlotillaError::WatchNotStarted(label));
        }
    }

    for _ in 0..WORKERS_PER_CLUSTER {
        let worker = tokio::spawn(Arc::clone(&ctrl).run_worker(Arc::clone(&handle)));
        handle.track_task(worker).await;
    }

    let resync = tokio::spawn(run_resync(Arc::clone(&ctrl), Arc::clone(&handle)));
    handle.track_task(resync).await;

    ctrl.watches.insert(label.clone(), Arc::clone(&handle)).await;
    info!(cluster = %label, "init watch for cluster done");
    Ok(handle)
}

/// Drive the watcher stream. Change notifications only ever enqueue keys,
/// except delete notifications which go straight to the deletion manager.
async fn run_stream(
    ctrl: Arc<Controller>,
    handle: Arc<ClusterWatchHandle>,
    writer: Writer<ChartDeployment>,
) {
    let api: Api<ChartDeployment> = Api::all(handle.client.clone());
    let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff();
    futures::pin_mut!(stream);

    let mut observed: HashMap<(String, String), Observed> = HashMap::new();
    let mut shutdown = ctrl.shutdown.clone();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = stream.try_next() => match event {
                Ok(Some(event)) => handle_event(&ctrl, &handle, &mut observed, event).await,
                Ok(None) => break,
                Err(e) => {
                    warn!(cluster = %handle.cluster_label(), error = %e, "watch stream error");
                }
            },
        }
    }
    debug!(cluster = %handle.cluster_label(), "watch stream stopped");
}

async fn handle_event(
    ctrl: &Arc<Controller>,
    handle: &Arc<ClusterWatchHandle>,
    observed: &mut HashMap<(String, String), Observed>,
    event: watcher::Event<ChartDeployment>,
) {
    match event {
        watcher::Event::Init | watcher::Event::InitDone => {}
        watcher::Event::InitApply(cd) | watcher::Event::Apply(cd) => {
            let cache_key = (cd.namespace().unwrap_or_default(), cd.name_any());
            let enqueue = match observed.get(&cache_key) {
                Some(old) => should_enqueue_update(old, &cd),
                // first sighting is always worked on
                None => true,
            };
            observed.insert(cache_key, Observed::of(&cd));

            if enqueue {
                let key = WorkKey::for_deployment(handle.cluster.as_deref(), &cd);
                debug!(key = %key, "enqueue chart deployment");
                handle.queue.add(key).await;
            }
        }
        watcher::Event::Delete(cd) => {
            observed.remove(&(cd.namespace().unwrap_or_default(), cd.name_any()));
            ctrl.handle_delete_event(handle, cd).await;
        }
    }
}

/// Periodically re-deliver cached objects that must be reconciled even
/// without a change notification: fan-out deployments pick up newly
/// registered clusters this way, deletions get retried.
async fn run_resync(ctrl: Arc<Controller>, handle: Arc<ClusterWatchHandle>) {
    let interval = Duration::from_secs(ctrl.config.resync_interval_secs);
    let mut shutdown = ctrl.shutdown.clone();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        for cd in handle.store.state() {
            if cd.spec.install_to_all_clusters || cd.metadata.deletion_timestamp.is_some() {
                let key = WorkKey::for_deployment(handle.cluster.as_deref(), &cd);
                handle.queue.add(key).await;
            }
        }
    }
}
