//! Key/value storage abstraction used for tenant configurations and the
//! ring descriptor.
//!
//! The contract is modeled on cloud object storage:
//! - Conditional writes with preconditions (CAS)
//! - Opaque version tokens interpreted by each backend
//! - Listing by key prefix
//!
//! The version token is an opaque `String` so different backends can plug in:
//! an object store uses its generation number or `ETag`, a consensus KV store
//! uses its revision.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};

/// Precondition for conditional writes (CAS operations).
#[derive(Debug, Clone)]
pub enum WritePrecondition {
    /// Write only if the object does not exist.
    DoesNotExist,
    /// Write only if the object's version matches the given token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

/// Result of a conditional write.
#[derive(Debug, Clone)]
pub enum WriteResult {
    /// Write succeeded, returns the new version token.
    Success {
        /// The new version token after the write.
        version: String,
    },
    /// Precondition failed, returns the current version token.
    PreconditionFailed {
        /// The current version that caused the precondition to fail.
        current_version: String,
    },
}

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Version token for CAS operations.
    pub version: String,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend trait.
///
/// All backends (object store, consensus KV, memory) implement this trait.
/// Precondition failures are a normal result, never an error.
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    /// Reads an entire object.
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Writes with an optional precondition.
    ///
    /// Returns `WriteResult::PreconditionFailed` if the precondition is not
    /// met.
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Deletes an object. Idempotent: succeeds even if the object is absent.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Lists objects with the given key prefix, in arbitrary order.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if the object doesn't exist.
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>>;
}

/// In-memory backend for testing and single-node debug deployments.
///
/// Behaves like a tiny consensus KV rather than an object store: one
/// store-wide revision counter stamps every write, so version tokens are
/// unique across keys and strictly increasing. Tokens are compared as the
/// opaque strings the contract promises.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    revision: u64,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: u64,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, key: &str) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            size: self.data.len() as u64,
            version: self.version.to_string(),
            last_modified: Some(self.last_modified),
        }
    }
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| Error::Internal("memory backend lock poisoned".into()))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| Error::Internal("memory backend lock poisoned".into()))
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Bytes> {
        let state = self.read_state()?;
        match state.objects.get(key) {
            Some(object) => Ok(object.data.clone()),
            None => Err(Error::NotFound(format!("object not found: {key}"))),
        }
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut state = self.write_state()?;
        let held = state.objects.get(key).map(|o| o.version);

        // A failed precondition reports the version the caller lost to;
        // a missing object reads as revision 0.
        let conflict = match (&precondition, held) {
            (WritePrecondition::DoesNotExist, Some(version)) => Some(version),
            (WritePrecondition::MatchesVersion(expected), _)
                if held.map(|v| v.to_string()).as_deref() != Some(expected.as_str()) =>
            {
                Some(held.unwrap_or(0))
            }
            _ => None,
        };
        if let Some(current) = conflict {
            return Ok(WriteResult::PreconditionFailed {
                current_version: current.to_string(),
            });
        }

        state.revision += 1;
        let version = state.revision;
        state.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                version,
                last_modified: Utc::now(),
            },
        );
        Ok(WriteResult::Success {
            version: version.to_string(),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.write_state()?;
        if state.objects.remove(key).is_some() {
            state.revision += 1;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let state = self.read_state()?;
        Ok(state
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| object.meta(key))
            .collect())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let state = self.read_state()?;
        Ok(state.objects.get(key).map(|object| object.meta(key)))
    }
}
