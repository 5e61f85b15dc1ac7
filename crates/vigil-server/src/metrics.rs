//! Observability metrics for the multitenant controller.
//!
//! Metrics are exported through the `metrics` crate facade. To expose them to
//! Prometheus, install `metrics_exporter_prometheus::PrometheusBuilder` at
//! startup (the binary does this).
//!
//! ## Metrics exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `vigil_alertmanager_sync_configs_total` | Counter | `reason` | Config sync executions |
//! | `vigil_alertmanager_sync_configs_failed_total` | Counter | `reason` | Failed config syncs |
//! | `vigil_alertmanager_sync_duration_seconds` | Histogram | - | Sync duration |
//! | `vigil_alertmanager_tenants_discovered` | Gauge | - | Tenants found in the store |
//! | `vigil_alertmanager_tenants_owned` | Gauge | - | Tenants owned by this instance |
//! | `vigil_alertmanager_config_last_reload_successful` | Gauge | `tenant` | 1 when the last reload succeeded |
//! | `vigil_alertmanager_state_replication_total` | Counter | - | Outbound state broadcasts |
//! | `vigil_alertmanager_state_replication_failed_total` | Counter | - | Failed per-peer pushes |
//! | `vigil_alertmanager_partial_state_merges_total` | Counter | - | Inbound partial-state merges |
//! | `vigil_alertmanager_partial_state_merges_failed_total` | Counter | - | Failed partial-state merges |
//! | `vigil_alertmanager_silences` | Gauge | `tenant` | Active silences per tenant |
//! | `vigil_alertmanager_ring_check_errors_total` | Counter | - | Ring watch read failures |

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: config sync executions by reason.
    pub const SYNC_CONFIGS_TOTAL: &str = "vigil_alertmanager_sync_configs_total";
    /// Counter: failed config syncs by reason.
    pub const SYNC_CONFIGS_FAILED_TOTAL: &str = "vigil_alertmanager_sync_configs_failed_total";
    /// Histogram: config sync duration in seconds.
    pub const SYNC_DURATION_SECONDS: &str = "vigil_alertmanager_sync_duration_seconds";
    /// Gauge: tenants discovered in the store at the last sync.
    pub const TENANTS_DISCOVERED: &str = "vigil_alertmanager_tenants_discovered";
    /// Gauge: tenants owned by this instance at the last sync.
    pub const TENANTS_OWNED: &str = "vigil_alertmanager_tenants_owned";
    /// Gauge: 1 when the last configuration reload for the tenant succeeded.
    pub const CONFIG_LAST_RELOAD_SUCCESSFUL: &str =
        "vigil_alertmanager_config_last_reload_successful";
    /// Counter: outbound state broadcasts.
    pub const STATE_REPLICATION_TOTAL: &str = "vigil_alertmanager_state_replication_total";
    /// Counter: failed per-peer state pushes.
    pub const STATE_REPLICATION_FAILED_TOTAL: &str =
        "vigil_alertmanager_state_replication_failed_total";
    /// Counter: inbound partial-state merges.
    pub const PARTIAL_STATE_MERGES_TOTAL: &str = "vigil_alertmanager_partial_state_merges_total";
    /// Counter: failed inbound partial-state merges.
    pub const PARTIAL_STATE_MERGES_FAILED_TOTAL: &str =
        "vigil_alertmanager_partial_state_merges_failed_total";
    /// Gauge: active silences per tenant.
    pub const SILENCES: &str = "vigil_alertmanager_silences";
    /// Counter: ring watch read failures.
    pub const RING_CHECK_ERRORS_TOTAL: &str = "vigil_alertmanager_ring_check_errors_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Sync trigger reason (periodic, ring-change, initial).
    pub const REASON: &str = "reason";
    /// Tenant identifier.
    pub const TENANT: &str = "tenant";
}

/// Why a config sync ran. Used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReason {
    /// The periodic poll ticker fired.
    Periodic,
    /// Ring ownership changed.
    RingChange,
    /// The initial sync at startup.
    InitialSync,
}

impl SyncReason {
    /// Stable label value for this reason.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Periodic => "periodic",
            Self::RingChange => "ring-change",
            Self::InitialSync => "initial",
        }
    }
}

/// High-level interface for recording controller metrics.
///
/// Cheap to clone and share across tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerMetrics;

impl ControllerMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records the start of a config sync.
    pub fn record_sync(self, reason: SyncReason) {
        counter!(
            names::SYNC_CONFIGS_TOTAL,
            labels::REASON => reason.as_str(),
        )
        .increment(1);
    }

    /// Records a failed config sync.
    pub fn record_sync_failure(self, reason: SyncReason) {
        counter!(
            names::SYNC_CONFIGS_FAILED_TOTAL,
            labels::REASON => reason.as_str(),
        )
        .increment(1);
    }

    /// Records sync duration.
    pub fn observe_sync_duration(self, duration: Duration) {
        histogram!(names::SYNC_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Updates the discovered/owned tenant gauges.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_tenant_counts(self, discovered: usize, owned: usize) {
        gauge!(names::TENANTS_DISCOVERED).set(discovered as f64);
        gauge!(names::TENANTS_OWNED).set(owned as f64);
    }

    /// Sets the per-tenant reload gauge.
    pub fn set_config_reload(self, tenant: &str, success: bool) {
        gauge!(
            names::CONFIG_LAST_RELOAD_SUCCESSFUL,
            labels::TENANT => tenant.to_string(),
        )
        .set(if success { 1.0 } else { 0.0 });
    }

    /// Records one outbound state broadcast.
    pub fn record_state_replication(self) {
        counter!(names::STATE_REPLICATION_TOTAL).increment(1);
    }

    /// Records one failed per-peer push.
    pub fn record_state_replication_failure(self) {
        counter!(names::STATE_REPLICATION_FAILED_TOTAL).increment(1);
    }

    /// Records one inbound partial-state merge.
    pub fn record_partial_merge(self, success: bool) {
        if success {
            counter!(names::PARTIAL_STATE_MERGES_TOTAL).increment(1);
        } else {
            counter!(names::PARTIAL_STATE_MERGES_FAILED_TOTAL).increment(1);
        }
    }

    /// Sets the per-tenant silences gauge.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_silences(self, tenant: &str, count: usize) {
        gauge!(
            names::SILENCES,
            labels::TENANT => tenant.to_string(),
        )
        .set(count as f64);
    }

    /// Records a ring watch read failure.
    pub fn record_ring_check_error(self) {
        counter!(names::RING_CHECK_ERRORS_TOTAL).increment(1);
    }
}
