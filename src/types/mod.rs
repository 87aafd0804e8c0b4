// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resource types. Watch sessions hand every downstream consumer
//! the canonical types defined here.

pub mod chart_deployment;
pub mod chart_repo;
pub mod cluster;

pub use chart_deployment::{
    ChartDeployment, ChartDeploymentPhase, ChartDeploymentSpec, ChartDeploymentStatus,
    ValuesFromSource, ValuesKeyRef,
};
pub use chart_repo::{Chart, ChartRepo, ChartRepoPhase, ChartRepoStatus, ChartSpec, ChartVersion};
pub use cluster::Cluster;
