// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Rate-limited, deduplicating work queue.
//!
//! Keys added while an identical key is pending are collapsed into one
//! delivery. A key popped by a worker is marked processing; re-adds during
//! processing park the key in a dirty set and it is re-delivered once the
//! worker calls `done`. Failed keys come back through `add_rate_limited`
//! with per-key exponential backoff.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::constants::queue::{BASE_DELAY_MS, MAX_DELAY_SECS};

pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    failures: HashMap<T, u32>,
    shut_down: bool,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shut_down: false,
            }),
            notify: Notify::new(),
        })
    }

    /// Queue an item for processing. A no-op if the same item is already
    /// pending. Items re-added while processing are delivered again after
    /// the current pass acknowledges with `done`.
    pub async fn add(&self, item: T) {
        let mut state = self.state.lock().await;
        if state.shut_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.notify.notify_one();
    }

    /// Pop the next item, waiting until one is available. Returns `None`
    /// once the queue has been shut down and drained of waiters.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shut_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Acknowledge a popped item. Re-queues it if it went dirty while
    /// being processed.
    pub async fn done(&self, item: &T) {
        let mut state = self.state.lock().await;
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Clear the failure history of an item after a successful pass.
    pub async fn forget(&self, item: &T) {
        self.state.lock().await.failures.remove(item);
    }

    /// Re-queue a failed item after its per-item backoff delay.
    pub async fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = {
            let mut state = self.state.lock().await;
            if state.shut_down {
                return;
            }
            let failures = state.failures.entry(item.clone()).or_insert(0);
            *failures += 1;
            backoff_delay(*failures)
        };

        debug!(item = ?item, ?delay, "requeueing with backoff");
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item).await;
        });
    }

    /// Number of retries recorded for an item.
    pub async fn retries(&self, item: &T) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(item)
            .copied()
            .unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Stop accepting new items and wake all waiting workers. Items
    /// already popped may still be finished by their workers.
    pub async fn shut_down(&self) {
        self.state.lock().await.shut_down = true;
        self.notify.notify_waiters();
    }
}

fn backoff_delay(failures: u32) -> Duration {
    let base = Duration::from_millis(BASE_DELAY_MS);
    let cap = Duration::from_secs(MAX_DELAY_SECS);
    let exp = failures.saturating_sub(1).min(63);
    base.checked_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX))
        .map(|d| d.min(cap))
        .unwrap_or(cap)
}
