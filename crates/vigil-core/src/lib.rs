//! # vigil-core
//!
//! Core abstractions for the Vigil multi-tenant alert-routing fleet.
//!
//! This crate provides the foundational types and traits used across all
//! Vigil components:
//!
//! - **Alert store**: the tenant-configuration contract and its object-store
//!   implementation
//! - **KV storage**: a CAS-capable key/value backend abstraction with an
//!   in-memory implementation for tests and debug deployments
//! - **Error types**: shared error definitions and result types
//! - **Observability**: logging bootstrap
//!
//! Cross-component interaction happens only via the contracts defined here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod alertstore;
pub mod error;
pub mod observability;
pub mod storage;

pub use alertstore::{AlertStore, ObjectAlertStore, TemplateFile, TenantConfig};
pub use error::{Error, Result};
pub use storage::{KvBackend, MemoryBackend, ObjectMeta, WritePrecondition, WriteResult};
