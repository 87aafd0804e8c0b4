// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Kubernetes annotation keys used by Flotilla
pub mod annotations {
    /// When set to "true", the controller will not sync this ChartDeployment
    pub const NO_SYNC: &str = "flotilla.geeko.me/no-sync";
    /// When present, a hash recorded by an older release is no longer
    /// accepted and the chart is deployed again
    pub const FORCE_RESYNC: &str = "flotilla.geeko.me/force-resync";
}

/// Event reasons recorded on ChartDeployment resources
pub mod events {
    pub const SUCCESS_SYNCED: &str = "Synced";
    pub const FAILED_SYNC: &str = "FailedSync";
    pub const SUCCESSFUL_DELETE: &str = "SuccessfulDelete";
    pub const FAILED_DELETE: &str = "FailedDelete";

    pub const MESSAGE_SYNCED: &str = "ChartDeployment synced successfully";
}

/// The operator name, used for server-side apply and event reporting
pub const OPERATOR_NAME: &str = "flotilla";

/// Finalizer appended to every ChartDeployment we manage
pub const FINALIZER_NAME: &str = "flotilla.geeko.me";

/// Finalizer written by pre-1.0 releases, still accepted on removal
pub const LEGACY_FINALIZER_NAME: &str = "charts.flotilla.geeko.me";

/// Reserved name for the cluster this process runs in. It never appears
/// in the cluster catalog.
pub const DEFAULT_CLUSTER_NAME: &str = "_default";

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRDs
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// Work queue rate limiting
pub mod queue {
    /// First retry delay in milliseconds
    pub const BASE_DELAY_MS: u64 = 5;
    /// Retry delay cap in seconds
    pub const MAX_DELAY_SECS: u64 = 1000;
    /// Workers draining each cluster queue
    pub const WORKERS_PER_CLUSTER: usize = 2;
}

/// Cluster registry cache TTL in seconds
pub const CLUSTER_CACHE_TTL_SECS: u64 = 60;
