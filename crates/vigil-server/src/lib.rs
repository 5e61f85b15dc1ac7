//! # vigil-server
//!
//! The multi-tenant alert-routing service: hosts one isolated alertmanager
//! per tenant, partitions tenants across the fleet with a consistent-hash
//! ring, and replicates in-memory state (silences, notification log) between
//! replicas.
//!
//! The core is [`controller::MultitenantController`], the distributed
//! lifecycle controller that polls the config store, reconciles the locally
//! hosted tenants against ring ownership, migrates per-tenant on-disk state,
//! coordinates replication, and dispatches per-tenant HTTP requests.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod controller;
pub mod engine;
pub mod lifecycle;
pub mod metrics;
pub mod replication;
pub mod router;
pub mod tenant_fs;

pub use self::config::{PersisterConfig, ShardingRingConfig, VigilConfig};
pub use self::controller::{MultitenantController, NOT_CONFIGURED_BODY};
pub use self::engine::TenantAlertmanager;
pub use self::lifecycle::ServiceState;
pub use self::metrics::SyncReason;
pub use self::replication::{
    AlertmanagerClient, ClientPool, FullState, HttpClientPool, Replicator, StatePart,
};
pub use self::router::{TENANT_HEADER, api_router};
