//! State replication between replicas of a tenant.
//!
//! Replicas exchange two kinds of payloads:
//!
//! - **Partial state** (`UpdateState`): a merge-commutative delta scoped to a
//!   tenant and a state key (`sil` or `nfl`), pushed best-effort to the other
//!   owners whenever local state changes. A receiver that actually changed
//!   its state re-broadcasts once, so an update reaches every replica within
//!   two hops; no-op merges stop the fanout.
//! - **Full state** (`ReadState`): a snapshot of every part, pulled by a
//!   newly built replica from its peers before it starts serving writes.
//!
//! Clients are pooled by peer **address** (the ring's dialing identity, not
//! the instance ID) and reaped when an address disappears from the ring.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};

use vigil_core::error::{Error, Result};
use vigil_ring::{RingDesc, owners_of};

use crate::metrics::ControllerMetrics;

/// State key for silences.
pub const STATE_KEY_SILENCES: &str = "sil";

/// State key for notification-log entries.
pub const STATE_KEY_NOTIFICATION_LOG: &str = "nfl";

/// Per-call deadline for replication RPCs.
const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// An opaque, merge-commutative delta scoped to a tenant and a state key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePart {
    /// State key, one of [`STATE_KEY_SILENCES`] / [`STATE_KEY_NOTIFICATION_LOG`].
    pub key: String,
    /// Serialized payload; the engine defines the format.
    pub data: Vec<u8>,
}

/// A bundle of all partial states for a tenant, used for replica bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullState {
    /// One part per non-empty state key.
    pub parts: Vec<StatePart>,
}

/// Client for a single peer.
#[async_trait]
pub trait AlertmanagerClient: Send + Sync {
    /// Pushes a partial-state update for a tenant. Best-effort merge: the
    /// peer responds with success even when the merge was a no-op.
    async fn update_state(&self, tenant_id: &str, part: StatePart) -> Result<()>;

    /// Pulls the full state of a tenant.
    ///
    /// Returns `Ok(None)` when the peer does not host the tenant.
    async fn read_state(&self, tenant_id: &str) -> Result<Option<FullState>>;

    /// The peer address this client dials.
    fn remote_address(&self) -> String;
}

/// Pool of peer clients keyed by address.
pub trait ClientPool: Send + Sync {
    /// Returns (lazily creating) the client for a peer address.
    fn client_for(&self, addr: &str) -> Result<Arc<dyn AlertmanagerClient>>;

    /// Drops pooled clients whose address is not in `keep`.
    fn evict_except(&self, keep: &HashSet<String>);
}

/// HTTP client for a single peer.
pub struct HttpAlertmanagerClient {
    addr: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpAlertmanagerClient {
    /// Creates a client dialing `addr` with the default per-call deadline.
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: format!("http://{addr}"),
            addr,
            client,
        }
    }

    fn state_url(&self, tenant_id: &str) -> String {
        format!("{}/api/v1/replication/{tenant_id}/state", self.base_url)
    }
}

#[async_trait]
impl AlertmanagerClient for HttpAlertmanagerClient {
    async fn update_state(&self, tenant_id: &str, part: StatePart) -> Result<()> {
        let response = self
            .client
            .post(self.state_url(tenant_id))
            .json(&part)
            .send()
            .await
            .map_err(|e| Error::storage_with_source("update_state request failed", e))?;

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            Ok(())
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(Error::NotFound(format!(
                "peer {} does not host tenant {tenant_id}",
                self.addr
            )))
        } else {
            Err(Error::storage(format!(
                "update_state to {} returned {status}",
                self.addr
            )))
        }
    }

    async fn read_state(&self, tenant_id: &str) -> Result<Option<FullState>> {
        let response = self
            .client
            .get(self.state_url(tenant_id))
            .send()
            .await
            .map_err(|e| Error::storage_with_source("read_state request failed", e))?;

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            let state = response
                .json::<FullState>()
                .await
                .map_err(|e| Error::Serialization(e.to_string()))?;
            Ok(Some(state))
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Ok(None)
        } else {
            Err(Error::storage(format!(
                "read_state from {} returned {status}",
                self.addr
            )))
        }
    }

    fn remote_address(&self) -> String {
        self.addr.clone()
    }
}

/// Address-keyed pool of HTTP clients.
#[derive(Default)]
pub struct HttpClientPool {
    clients: RwLock<HashMap<String, Arc<dyn AlertmanagerClient>>>,
}

impl HttpClientPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientPool for HttpClientPool {
    fn client_for(&self, addr: &str) -> Result<Arc<dyn AlertmanagerClient>> {
        {
            let clients = self
                .clients
                .read()
                .map_err(|_| Error::Internal("lock poisoned".into()))?;
            if let Some(client) = clients.get(addr) {
                return Ok(Arc::clone(client));
            }
        }

        let mut clients = self
            .clients
            .write()
            .map_err(|_| Error::Internal("lock poisoned".into()))?;
        let client = clients
            .entry(addr.to_string())
            .or_insert_with(|| Arc::new(HttpAlertmanagerClient::new(addr)) as Arc<dyn AlertmanagerClient>);
        Ok(Arc::clone(client))
    }

    fn evict_except(&self, keep: &HashSet<String>) {
        if let Ok(mut clients) = self.clients.write() {
            clients.retain(|addr, _| keep.contains(addr));
        }
    }
}

/// Shared, watcher-maintained snapshot of the ring descriptor.
pub type RingView = Arc<RwLock<RingDesc>>;

/// Fans local state changes out to peers and pulls initial state for new
/// replicas.
pub struct Replicator {
    instance_id: String,
    replication_factor: usize,
    heartbeat_timeout: chrono::Duration,
    ring_view: Option<RingView>,
    pool: Arc<dyn ClientPool>,
    metrics: ControllerMetrics,
}

impl Replicator {
    /// Creates a replicator for a sharded instance.
    #[must_use]
    pub fn new(
        instance_id: impl Into<String>,
        replication_factor: usize,
        heartbeat_timeout: chrono::Duration,
        ring_view: RingView,
        pool: Arc<dyn ClientPool>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            replication_factor,
            heartbeat_timeout,
            ring_view: Some(ring_view),
            pool,
            metrics: ControllerMetrics::new(),
        }
    }

    /// Creates a no-op replicator for a non-sharded deployment: broadcasts
    /// and pulls do nothing.
    #[must_use]
    pub fn disabled(pool: Arc<dyn ClientPool>) -> Self {
        Self {
            instance_id: String::new(),
            replication_factor: 0,
            heartbeat_timeout: chrono::Duration::seconds(60),
            ring_view: None,
            pool,
            metrics: ControllerMetrics::new(),
        }
    }

    fn peers_of(&self, tenant_id: &str) -> Vec<vigil_ring::Owner> {
        let Some(view) = &self.ring_view else {
            return Vec::new();
        };
        let Ok(desc) = view.read().map(|d| d.clone()) else {
            return Vec::new();
        };
        owners_of(
            tenant_id,
            &desc,
            self.replication_factor,
            self.heartbeat_timeout,
            Utc::now(),
        )
        .into_iter()
        .filter(|owner| owner.instance_id != self.instance_id)
        .collect()
    }

    /// Broadcasts a partial-state update to the other owners of a tenant.
    ///
    /// Best-effort: per-peer failures are counted and logged, never
    /// propagated. State converges through the next update or through the
    /// peer pulling on its next restart.
    pub async fn broadcast(&self, tenant_id: &str, part: StatePart) {
        if self.ring_view.is_none() {
            return;
        }
        self.metrics.record_state_replication();

        for peer in self.peers_of(tenant_id) {
            let client = match self.pool.client_for(&peer.addr) {
                Ok(client) => client,
                Err(e) => {
                    self.metrics.record_state_replication_failure();
                    tracing::warn!(peer = %peer.addr, error = %e, "failed to get replication client");
                    continue;
                }
            };
            if let Err(e) = client.update_state(tenant_id, part.clone()).await {
                self.metrics.record_state_replication_failure();
                tracing::warn!(
                    tenant = %tenant_id,
                    peer = %peer.addr,
                    error = %e,
                    "state replication push failed"
                );
            }
        }
    }

    /// Pulls the full state of a tenant from its peers.
    ///
    /// Peers are queried in parallel and the first successful response wins.
    /// When every peer fails or responds not-found, the instance starts
    /// empty.
    pub async fn fetch_full_state(&self, tenant_id: &str) -> Option<FullState> {
        let peers = self.peers_of(tenant_id);
        if peers.is_empty() {
            return None;
        }

        let mut requests: FuturesUnordered<_> = peers
            .into_iter()
            .filter_map(|peer| {
                let client = match self.pool.client_for(&peer.addr) {
                    Ok(client) => client,
                    Err(e) => {
                        tracing::warn!(peer = %peer.addr, error = %e, "failed to get replication client");
                        return None;
                    }
                };
                let tenant = tenant_id.to_string();
                Some(async move { (client.remote_address(), client.read_state(&tenant).await) })
            })
            .collect();

        while let Some((peer, result)) = requests.next().await {
            match result {
                Ok(Some(state)) => {
                    tracing::debug!(tenant = %tenant_id, peer = %peer, "fetched initial state from peer");
                    return Some(state);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(tenant = %tenant_id, peer = %peer, error = %e, "read_state failed");
                }
            }
        }
        None
    }
}
