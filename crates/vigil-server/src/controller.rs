//! The multitenant lifecycle controller.
//!
//! The controller polls the config store, reconciles the set of locally
//! hosted tenant alertmanagers against ring ownership, maintains per-tenant
//! on-disk state, coordinates state replication between replicas, and
//! dispatches per-tenant HTTP requests.
//!
//! Three triggers feed the sync loop: the periodic poll ticker, a ring
//! ownership change, and the initial sync at startup. All of them funnel
//! into one serialized path through a bounded channel, so at most one sync
//! runs at a time and at most one more is pending.
//!
//! The tenants map is guarded by a plain `RwLock` that is never held across
//! I/O: desired state is computed off-lock and only the map insert/remove is
//! locked.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tokio::sync::{mpsc, watch};

use vigil_core::error::{Error, Result};
use vigil_core::storage::KvBackend;
use vigil_core::{AlertStore, TenantConfig};
use vigil_ring::{
    InstanceState, Lifecycler, LifecyclerConfig, RingDesc, RingStore, owners_of, replica_position,
};

use crate::config::VigilConfig;
use crate::engine::TenantAlertmanager;
use crate::lifecycle::{LifecycleCell, ServiceState};
use crate::metrics::{ControllerMetrics, SyncReason};
use crate::replication::{ClientPool, FullState, Replicator, RingView, StatePart};
use crate::tenant_fs::TenantFs;

/// Ring plumbing for a sharded controller.
pub struct RingState {
    /// CAS access to the shared descriptor.
    pub store: RingStore,
    /// This instance's membership driver.
    pub lifecycler: Arc<Lifecycler>,
    /// Watcher-maintained descriptor snapshot, shared with the replicator.
    pub view: RingView,
}

/// Body served for tenants without a configuration.
pub const NOT_CONFIGURED_BODY: &str = "the Alertmanager is not configured\n";

/// The distributed lifecycle controller hosting one alertmanager per owned
/// tenant.
pub struct MultitenantController {
    config: VigilConfig,
    external_path: String,
    store: Arc<dyn AlertStore>,
    fs: TenantFs,
    metrics: ControllerMetrics,
    lifecycle: LifecycleCell,
    tenants: RwLock<HashMap<String, Arc<TenantAlertmanager>>>,
    ring: Option<RingState>,
    replicator: Arc<Replicator>,
    pool: Arc<dyn ClientPool>,
    sync_tx: mpsc::Sender<SyncReason>,
    sync_rx: Mutex<Option<mpsc::Receiver<SyncReason>>>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for MultitenantController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultitenantController").finish_non_exhaustive()
    }
}

impl MultitenantController {
    /// Creates a controller.
    ///
    /// `ring_kv` is the CAS store backing the ring; it is required when
    /// sharding is enabled and ignored otherwise.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` when the configuration is invalid, in
    /// particular when the external URL has not been configured.
    pub fn new(
        config: VigilConfig,
        store: Arc<dyn AlertStore>,
        ring_kv: Option<Arc<dyn KvBackend>>,
        pool: Arc<dyn ClientPool>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let external_path = config.external_path();
        let fs = TenantFs::new(&config.data_dir);

        let ring = if config.sharding_enabled {
            let kv = ring_kv.ok_or_else(|| {
                Error::InvalidInput("sharding is enabled but no ring store was provided".into())
            })?;
            let ring_store = RingStore::new(kv);
            let lifecycler = Arc::new(Lifecycler::new(
                ring_store.clone(),
                LifecyclerConfig::new(
                    config.sharding_ring.instance_id.clone(),
                    config.sharding_ring.instance_addr.clone(),
                    config.sharding_ring.heartbeat_period,
                    config.heartbeat_timeout(),
                ),
            ));
            Some(RingState {
                store: ring_store,
                lifecycler,
                view: Arc::new(RwLock::new(RingDesc::default())),
            })
        } else {
            None
        };

        let replicator = match &ring {
            Some(ring) => Arc::new(Replicator::new(
                config.sharding_ring.instance_id.clone(),
                config.sharding_ring.replication_factor,
                config.heartbeat_timeout(),
                Arc::clone(&ring.view),
                Arc::clone(&pool),
            )),
            None => Arc::new(Replicator::disabled(Arc::clone(&pool))),
        };

        let (sync_tx, sync_rx) = mpsc::channel(1);
        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            config,
            external_path,
            store,
            fs,
            metrics: ControllerMetrics::new(),
            lifecycle: LifecycleCell::new(),
            tenants: RwLock::new(HashMap::new()),
            ring,
            replicator,
            pool,
            sync_tx,
            sync_rx: Mutex::new(Some(sync_rx)),
            shutdown,
        }))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        self.lifecycle.state()
    }

    /// Whether a ring was built for this controller.
    #[must_use]
    pub fn has_ring(&self) -> bool {
        self.ring.is_some()
    }

    /// The ring lifecycler, when sharding is enabled.
    #[must_use]
    pub fn ring_lifecycler(&self) -> Option<&Arc<Lifecycler>> {
        self.ring.as_ref().map(|r| &r.lifecycler)
    }

    /// IDs of the tenants currently hosted.
    #[must_use]
    pub fn tenant_ids(&self) -> Vec<String> {
        let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = tenants.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of tenants currently hosted.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.tenants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The instance hosting `tenant_id`, if any.
    #[must_use]
    pub fn instance(&self, tenant_id: &str) -> Option<Arc<TenantAlertmanager>> {
        self.tenants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant_id)
            .cloned()
    }

    /// Existing per-tenant directories on disk.
    pub fn per_tenant_dirs(&self) -> Result<HashMap<String, std::path::PathBuf>> {
        self.fs.per_tenant_dirs()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Starts the service: filesystem migration, ring join and the initial
    /// sync, then the periodic loops.
    ///
    /// # Errors
    ///
    /// On failure the service transitions to `Failed` and, when sharding,
    /// deregisters from the ring so no peer routes traffic here.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.lifecycle.set(ServiceState::Starting);

        if let Err(e) = self.start_inner().await {
            tracing::error!(error = %e, "startup failed");
            if let Some(ring) = &self.ring {
                if ring.lifecycler.is_registered() {
                    let _ = ring.lifecycler.unregister().await;
                }
            }
            self.lifecycle.set(ServiceState::Failed);
            return Err(e);
        }

        self.spawn_loops();
        self.lifecycle.set(ServiceState::Running);
        Ok(())
    }

    async fn start_inner(&self) -> Result<()> {
        self.fs.migrate_legacy_layout()?;

        if let Some(ring) = &self.ring {
            // Join while invisible to peers: the initial sync runs in
            // JOINING, and only success promotes to ACTIVE.
            ring.lifecycler.register_joining().await?;
            self.load_and_sync_configs(SyncReason::InitialSync).await?;
            ring.lifecycler.change_state(InstanceState::Active).await?;
            self.refresh_ring_view().await?;
        } else {
            self.load_and_sync_configs(SyncReason::InitialSync).await?;
        }
        Ok(())
    }

    /// Stops the service: halts the loops, leaves the ring, snapshots and
    /// drops every tenant instance.
    pub async fn stop(&self) {
        self.lifecycle.set(ServiceState::Stopping);
        let _ = self.shutdown.send(true);

        if let Some(ring) = &self.ring {
            if ring.lifecycler.is_registered() {
                let _ = ring.lifecycler.change_state(InstanceState::Leaving).await;
                let _ = ring.lifecycler.unregister().await;
            }
        }

        let instances: Vec<Arc<TenantAlertmanager>> = {
            let mut tenants = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
            tenants.drain().map(|(_, instance)| instance).collect()
        };
        for instance in instances {
            if let Err(e) = instance.persist_snapshots() {
                tracing::warn!(tenant = %instance.tenant_id(), error = %e, "snapshot on shutdown failed");
            }
        }

        self.lifecycle.set(ServiceState::Terminated);
    }

    fn spawn_loops(self: &Arc<Self>) {
        let Ok(mut rx_slot) = self.sync_rx.lock() else {
            return;
        };
        let Some(mut sync_rx) = rx_slot.take() else {
            return;
        };
        drop(rx_slot);

        // Serialized sync worker: receives coalesced trigger reasons.
        {
            let controller = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        reason = sync_rx.recv() => {
                            let Some(reason) = reason else { break };
                            if let Err(e) = controller.load_and_sync_configs(reason).await {
                                tracing::warn!(error = %e, ?reason, "config sync failed");
                            }
                        }
                    }
                }
            });
        }

        // Periodic poll ticker.
        {
            let controller = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            let period = self.config.poll_interval;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        () = tokio::time::sleep(period) => controller.trigger_sync(SyncReason::Periodic),
                    }
                }
            });
        }

        if let Some(ring) = &self.ring {
            // Ring watcher: re-sync only when the ownership fingerprint
            // changes, so heartbeat refreshes don't cause sync storms.
            {
                let controller = Arc::clone(self);
                let mut shutdown = self.shutdown.subscribe();
                let period = self.config.sharding_ring.ring_check_period;
                let heartbeat_timeout = self.config.heartbeat_timeout();
                let initial = ring
                    .view
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .ownership_fingerprint(heartbeat_timeout, Utc::now());
                tokio::spawn(async move {
                    let mut last_fingerprint = initial;
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            () = tokio::time::sleep(period) => {
                                match controller.refresh_ring_view().await {
                                    Ok(desc) => {
                                        let fingerprint =
                                            desc.ownership_fingerprint(heartbeat_timeout, Utc::now());
                                        if fingerprint != last_fingerprint {
                                            last_fingerprint = fingerprint;
                                            controller.trigger_sync(SyncReason::RingChange);
                                        }
                                    }
                                    Err(e) => {
                                        controller.metrics.record_ring_check_error();
                                        tracing::warn!(error = %e, "ring check failed");
                                    }
                                }
                            }
                        }
                    }
                });
            }

            // Heartbeat loop.
            {
                let lifecycler = Arc::clone(&ring.lifecycler);
                let mut shutdown = self.shutdown.subscribe();
                let period = self.config.sharding_ring.heartbeat_period;
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            () = tokio::time::sleep(period) => {
                                if let Err(e) = lifecycler.heartbeat().await {
                                    tracing::warn!(error = %e, "ring heartbeat failed");
                                }
                            }
                        }
                    }
                });
            }
        }

        // Snapshot persister.
        {
            let controller = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            let period = self.config.persist_interval();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        () = tokio::time::sleep(period) => {
                            let instances: Vec<Arc<TenantAlertmanager>> = {
                                let tenants = controller
                                    .tenants
                                    .read()
                                    .unwrap_or_else(PoisonError::into_inner);
                                tenants.values().cloned().collect()
                            };
                            for instance in instances {
                                if let Err(e) = instance.persist_snapshots() {
                                    tracing::warn!(
                                        tenant = %instance.tenant_id(),
                                        error = %e,
                                        "snapshot failed"
                                    );
                                }
                            }
                        }
                    }
                }
            });
        }
    }

    /// Enqueues a sync. A full queue means one is already pending; the
    /// trigger is coalesced into it.
    pub fn trigger_sync(&self, reason: SyncReason) {
        let _ = self.sync_tx.try_send(reason);
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Runs one config sync: discover, filter by ownership, fetch, diff and
    /// apply, prune orphaned state.
    ///
    /// # Errors
    ///
    /// Returns store errors; the next sync retries. A single bad tenant never
    /// aborts the sync.
    pub async fn load_and_sync_configs(&self, reason: SyncReason) -> Result<()> {
        if self.is_shutting_down() {
            return Ok(());
        }

        tracing::debug!(reason = reason.as_str(), "syncing tenant configurations");
        self.metrics.record_sync(reason);

        let started = Instant::now();
        let result = self.sync_once().await;
        self.metrics.observe_sync_duration(started.elapsed());
        if result.is_err() {
            self.metrics.record_sync_failure(reason);
        }
        result
    }

    async fn sync_once(&self) -> Result<()> {
        let discovered = self.store.list_tenants().await?;

        let ring_desc = match &self.ring {
            Some(_) => Some(self.refresh_ring_view().await?),
            None => None,
        };
        let (owned, positions) = self.filter_owned(&discovered, ring_desc.as_ref());
        self.metrics.set_tenant_counts(discovered.len(), owned.len());

        let configs = self.store.get_configs(&owned).await?;
        self.sync_configs(configs, &positions, ring_desc.as_ref())
            .await;

        // An abandoned sync must not prune against a drained tenants map;
        // that would look like every tenant went away at once.
        if self.is_shutting_down() {
            return Ok(());
        }
        let keep: HashSet<String> = self.tenant_ids().into_iter().collect();
        self.fs.prune_orphan_dirs(&keep)?;
        Ok(())
    }

    /// Reads the ring fresh, publishes it to the shared view and reaps
    /// pooled clients for departed addresses.
    async fn refresh_ring_view(&self) -> Result<RingDesc> {
        let ring = self
            .ring
            .as_ref()
            .ok_or_else(|| Error::Internal("refresh_ring_view without a ring".into()))?;
        let (desc, _) = ring.store.get().await?;
        {
            let mut view = ring.view.write().unwrap_or_else(PoisonError::into_inner);
            *view = desc.clone();
        }
        self.pool.evict_except(&desc.instance_addrs());
        Ok(desc)
    }

    fn filter_owned(
        &self,
        discovered: &[String],
        ring_desc: Option<&RingDesc>,
    ) -> (Vec<String>, HashMap<String, usize>) {
        let Some(desc) = ring_desc else {
            // Sharding disabled: every instance owns every tenant.
            let positions = discovered.iter().map(|t| (t.clone(), 0)).collect();
            return (discovered.to_vec(), positions);
        };

        let me = self.config.sharding_ring.instance_id.as_str();
        let now = Utc::now();
        let mut owned = Vec::new();
        let mut positions = HashMap::new();
        for tenant in discovered {
            let owners = owners_of(
                tenant,
                desc,
                self.config.sharding_ring.replication_factor,
                self.config.heartbeat_timeout(),
                now,
            );
            if let Some(position) = replica_position(&owners, me) {
                owned.push(tenant.clone());
                positions.insert(tenant.clone(), position);
            }
        }
        (owned, positions)
    }

    fn owns_tenant(&self, tenant_id: &str, ring_desc: Option<&RingDesc>) -> bool {
        let Some(desc) = ring_desc else {
            return true;
        };
        let owners = owners_of(
            tenant_id,
            desc,
            self.config.sharding_ring.replication_factor,
            self.config.heartbeat_timeout(),
            Utc::now(),
        );
        replica_position(&owners, &self.config.sharding_ring.instance_id).is_some()
    }

    async fn sync_configs(
        &self,
        configs: HashMap<String, TenantConfig>,
        positions: &HashMap<String, usize>,
        ring_desc: Option<&RingDesc>,
    ) {
        let current: HashMap<String, Arc<TenantAlertmanager>> = self
            .tenants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        // Adds and updates. A failing tenant is reported and skipped; the
        // rest of the sync proceeds.
        for (tenant, config) in &configs {
            if self.is_shutting_down() {
                tracing::debug!("abandoning config sync: service is stopping");
                return;
            }
            let position = positions.get(tenant).copied().unwrap_or(0);

            let result = match current.get(tenant) {
                Some(instance) => {
                    instance.set_position(position);
                    if instance.current_config() == *config {
                        Ok(())
                    } else {
                        self.update_instance(instance, config)
                    }
                }
                None => match self.build_instance(config.clone(), position, false).await {
                    Ok(instance) => {
                        if self.insert_instance(instance).is_none() {
                            tracing::debug!(tenant = %tenant, "discarding instance built during shutdown");
                            return;
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
            };

            match result {
                Ok(()) => self.metrics.set_config_reload(tenant, true),
                Err(e) => {
                    tracing::warn!(tenant = %tenant, error = %e, "failed to apply tenant config");
                    self.metrics.set_config_reload(tenant, false);
                }
            }
        }

        // Removals: configs deleted upstream, and ownership losses. Fallback
        // instances have no stored config and survive until ownership is
        // lost.
        for (tenant, instance) in &current {
            let keep = if configs.contains_key(tenant) {
                true
            } else if instance.from_fallback() {
                self.owns_tenant(tenant, ring_desc)
            } else {
                false
            };
            if keep {
                continue;
            }

            tracing::info!(tenant = %tenant, "stopping tenant instance");
            let removed = {
                let mut tenants = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
                tenants.remove(tenant)
            };
            drop(removed);
        }
    }

    /// Rewrites template files and reconfigures the engine in place.
    /// Templates dropped by the new config are deleted before the engine
    /// sees it.
    fn update_instance(&self, instance: &TenantAlertmanager, config: &TenantConfig) -> Result<()> {
        let keep: HashSet<&str> = config
            .templates
            .iter()
            .map(|t| t.filename.as_str())
            .collect();
        self.fs.remove_unused_templates(&config.tenant_id, &keep)?;
        for template in &config.templates {
            self.fs
                .write_template(&config.tenant_id, &template.filename, &template.body)?;
        }
        instance.apply_config(config.clone());
        Ok(())
    }

    async fn build_instance(
        &self,
        config: TenantConfig,
        position: usize,
        from_fallback: bool,
    ) -> Result<Arc<TenantAlertmanager>> {
        let tenant_id = config.tenant_id.clone();
        let data_dir = self.fs.ensure_tenant_dir(&tenant_id)?;
        for template in &config.templates {
            self.fs
                .write_template(&tenant_id, &template.filename, &template.body)?;
        }

        let engine = Arc::new(TenantAlertmanager::build(
            config,
            data_dir,
            self.external_path.clone(),
            position,
            from_fallback,
            Arc::clone(&self.replicator),
        )?);

        // A new sharded replica bootstraps from its peers before serving
        // writes; if all peers fail, it starts empty.
        if self.ring.is_some() && self.config.sharding_ring.replication_factor > 1 {
            if let Some(state) = self.replicator.fetch_full_state(&tenant_id).await {
                if let Err(e) = engine.merge_full_state(state) {
                    tracing::warn!(tenant = %tenant_id, error = %e, "failed to install peer state");
                }
            }
        }

        Ok(engine)
    }

    fn is_shutting_down(&self) -> bool {
        matches!(
            self.lifecycle.state(),
            ServiceState::Stopping | ServiceState::Terminated
        )
    }

    /// Publishes a freshly built instance, unless the service started
    /// stopping in the meantime.
    ///
    /// The lifecycle check happens under the map lock: `stop()` flips the
    /// state before draining the map under the same lock, so a build that
    /// loses the race is discarded here instead of resurrecting a tenant the
    /// shutdown sequence will never see.
    fn insert_instance(&self, instance: Arc<TenantAlertmanager>) -> Option<Arc<TenantAlertmanager>> {
        let mut tenants = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
        if self.is_shutting_down() {
            return None;
        }
        Some(Arc::clone(
            tenants
                .entry(instance.tenant_id().to_string())
                .or_insert(instance),
        ))
    }

    // ------------------------------------------------------------------
    // Replication server side
    // ------------------------------------------------------------------

    /// Merges a partial-state update pushed by a peer.
    ///
    /// When the merge changed local state, the update is re-broadcast once
    /// to the other owners; no-op merges stop the fanout.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` when this instance does not host the
    /// tenant.
    pub async fn update_state(&self, tenant_id: &str, part: StatePart) -> Result<()> {
        let instance = self
            .instance(tenant_id)
            .ok_or_else(|| Error::NotFound(format!("tenant {tenant_id} is not hosted here")))?;

        let changed = match instance.merge_partial_state(&part) {
            Ok(changed) => {
                self.metrics.record_partial_merge(true);
                changed
            }
            Err(e) => {
                self.metrics.record_partial_merge(false);
                return Err(e);
            }
        };

        if changed {
            self.replicator.broadcast(tenant_id, part).await;
        }
        Ok(())
    }

    /// Serves a full-state snapshot for replica bootstrap.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` when this instance does not host the
    /// tenant.
    pub fn read_state(&self, tenant_id: &str) -> Result<FullState> {
        let instance = self
            .instance(tenant_id)
            .ok_or_else(|| Error::NotFound(format!("tenant {tenant_id} is not hosted here")))?;
        Ok(instance.full_state())
    }

    // ------------------------------------------------------------------
    // Request routing
    // ------------------------------------------------------------------

    /// Lazily synthesizes a tenant instance from the fallback config.
    ///
    /// Returns `Ok(None)` when no fallback config is set, or when the
    /// service is stopping and no new instances may start.
    pub async fn get_or_create_fallback_instance(
        &self,
        tenant_id: &str,
    ) -> Result<Option<Arc<TenantAlertmanager>>> {
        if let Some(instance) = self.instance(tenant_id) {
            return Ok(Some(instance));
        }
        if self.is_shutting_down() {
            return Ok(None);
        }
        let Some(fallback) = self.config.fallback_config.clone() else {
            return Ok(None);
        };

        tracing::info!(tenant = %tenant_id, "starting tenant from the fallback config");
        let config = TenantConfig::new(tenant_id, fallback);

        let position = match &self.ring {
            Some(ring) => {
                let desc = ring.view.read().unwrap_or_else(PoisonError::into_inner).clone();
                let owners = owners_of(
                    tenant_id,
                    &desc,
                    self.config.sharding_ring.replication_factor,
                    self.config.heartbeat_timeout(),
                    Utc::now(),
                );
                replica_position(&owners, &self.config.sharding_ring.instance_id).unwrap_or(0)
            }
            None => 0,
        };

        let engine = self.build_instance(config, position, true).await?;
        Ok(self.insert_instance(engine))
    }

    /// Routes one tenant-scoped HTTP request.
    ///
    /// `path` is the full request path; the external URL prefix is stripped
    /// before matching. `/metrics`, `/-/reload` and `/debug/*` are reserved
    /// for the host and never reach a tenant engine.
    pub async fn serve_tenant_request(
        &self,
        tenant_id: &str,
        method: &Method,
        path: &str,
        body: &[u8],
    ) -> Response {
        let rel = path.strip_prefix(&self.external_path).unwrap_or(path);
        let reserved = rel == "/metrics" || rel == "/-/reload" || rel.starts_with("/debug");

        match self.instance(tenant_id) {
            Some(instance) => {
                if reserved {
                    return StatusCode::NOT_FOUND.into_response();
                }
                instance.handle(method, rel, body).await
            }
            None => {
                if !reserved {
                    match self.get_or_create_fallback_instance(tenant_id).await {
                        Ok(Some(instance)) => return instance.handle(method, rel, body).await,
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(tenant = %tenant_id, error = %e, "fallback instance failed");
                            return (StatusCode::INTERNAL_SERVER_ERROR, format!("{e}\n"))
                                .into_response();
                        }
                    }
                }
                Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::from(NOT_CONFIGURED_BODY))
                    .unwrap_or_else(|_| StatusCode::NOT_FOUND.into_response())
            }
        }
    }
}
