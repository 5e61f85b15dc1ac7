//! CAS access to the shared ring descriptor.
//!
//! The descriptor lives under a single key in the ring KV store. All
//! mutations go through a read-modify-CAS loop with bounded retries and
//! exponential backoff, so concurrent instances can update the ring without
//! coordination.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;

use vigil_core::error::{Error, Result};
use vigil_core::storage::{KvBackend, WritePrecondition, WriteResult};

use crate::desc::RingDesc;

/// Key of the ring descriptor in the KV store.
pub const RING_KEY: &str = "ring";

/// Maximum CAS attempts before the operation degrades.
const MAX_CAS_RETRIES: u32 = 10;

/// Base backoff between CAS attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Maximum backoff between CAS attempts.
const BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Ring descriptor store over any CAS-capable backend.
#[derive(Clone)]
pub struct RingStore {
    storage: Arc<dyn KvBackend>,
}

impl RingStore {
    /// Creates a store over the given backend.
    #[must_use]
    pub fn new(storage: Arc<dyn KvBackend>) -> Self {
        Self { storage }
    }

    /// Reads the current descriptor and its version token.
    ///
    /// A missing descriptor reads as an empty ring with no version.
    pub async fn get(&self) -> Result<(RingDesc, Option<String>)> {
        let meta = self.storage.head(RING_KEY).await?;
        let Some(meta) = meta else {
            return Ok((RingDesc::default(), None));
        };
        let data = self.storage.get(RING_KEY).await?;
        let desc: RingDesc = serde_json::from_slice(&data)?;
        Ok((desc, Some(meta.version)))
    }

    /// Read-modify-CAS on the descriptor.
    ///
    /// The mutator returns `true` to write the updated descriptor, `false`
    /// to abort without writing. Version conflicts are retried with
    /// exponential backoff and jitter.
    ///
    /// # Errors
    ///
    /// Returns `Error::PreconditionFailed` when retries are exhausted.
    pub async fn cas<F>(&self, mut mutate: F) -> Result<RingDesc>
    where
        F: FnMut(&mut RingDesc) -> Result<bool>,
    {
        let mut backoff = BACKOFF_BASE;

        for attempt in 0..MAX_CAS_RETRIES {
            let (mut desc, version) = self.get().await?;

            if !mutate(&mut desc)? {
                return Ok(desc);
            }

            let data = Bytes::from(serde_json::to_vec(&desc)?);
            let precondition = match version {
                Some(v) => WritePrecondition::MatchesVersion(v),
                None => WritePrecondition::DoesNotExist,
            };

            match self.storage.put(RING_KEY, data, precondition).await? {
                WriteResult::Success { .. } => return Ok(desc),
                WriteResult::PreconditionFailed { .. } => {
                    tracing::debug!(attempt, "ring CAS conflict, retrying");
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..25));
                    tokio::time::sleep(backoff.min(BACKOFF_MAX) + jitter).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }

        Err(Error::PreconditionFailed(format!(
            "ring CAS failed after {MAX_CAS_RETRIES} attempts"
        )))
    }
}
