// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The reconcile engine and its supporting pieces.

pub mod controller;
pub mod delete;
pub mod dependency;
pub mod events;
pub mod status;
pub mod sync;

pub use controller::Controller;
pub use events::EventSink;
