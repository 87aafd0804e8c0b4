// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Watch plumbing: per-cluster sessions, event translation, work keys and
//! the registry tying them together.

pub mod events;
pub mod handle;
pub mod key;
pub mod session;
pub mod supervisor;

pub use handle::{ClusterWatchHandle, WatchRegistry};
pub use key::WorkKey;
pub use supervisor::ClusterWatchSupervisor;
