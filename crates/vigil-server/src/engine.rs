//! Minimal per-tenant alertmanager engine.
//!
//! The controller treats each tenant engine as a black box that can be
//! built, served HTTP, fed state updates, and stopped. This engine keeps a
//! silences store and a notification-log store in memory, snapshots them to
//! the tenant's data directory, and hands every local state change to the
//! replicator.
//!
//! Both stores merge commutatively and idempotently:
//! - silences are keyed by ID with last-write-wins on `updated_at`,
//! - notification-log entries are keyed and insert-only.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Json;
use axum::body::Body;
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ulid::Ulid;

use vigil_core::error::{Error, Result};
use vigil_core::TenantConfig;

use crate::metrics::ControllerMetrics;
use crate::replication::{
    FullState, Replicator, STATE_KEY_NOTIFICATION_LOG, STATE_KEY_SILENCES, StatePart,
};
use crate::tenant_fs::{NOTIFICATION_LOG_SNAPSHOT, SILENCES_SNAPSHOT, write_snapshot};

/// A label matcher on a silence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matcher {
    /// Label name.
    pub name: String,
    /// Label value.
    pub value: String,
    /// Whether the value is a regular expression.
    #[serde(default)]
    pub is_regex: bool,
}

/// One silence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Silence {
    /// Silence ID, assigned by the engine on creation.
    #[serde(default)]
    pub id: String,
    /// Matchers selecting the alerts to silence.
    #[serde(default)]
    pub matchers: Vec<Matcher>,
    /// When the silence starts.
    pub starts_at: DateTime<Utc>,
    /// When the silence ends.
    pub ends_at: DateTime<Utc>,
    /// Who created the silence.
    #[serde(default)]
    pub created_by: String,
    /// Free-text comment.
    #[serde(default)]
    pub comment: String,
    /// Last modification time; drives last-write-wins merges.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// One notification-log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEntry {
    /// Entry key (receiver + alert group).
    pub key: String,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl std::fmt::Debug for TenantAlertmanager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantAlertmanager").finish_non_exhaustive()
    }
}

/// A running per-tenant alertmanager.
pub struct TenantAlertmanager {
    tenant_id: String,
    config: RwLock<TenantConfig>,
    data_dir: PathBuf,
    external_path: String,
    from_fallback: bool,
    position: AtomicUsize,
    silences: RwLock<HashMap<String, Silence>>,
    nflog: RwLock<BTreeMap<String, NotificationEntry>>,
    replicator: Arc<Replicator>,
    metrics: ControllerMetrics,
}

impl TenantAlertmanager {
    /// Builds an engine for one tenant.
    ///
    /// Existing snapshots in `data_dir` are loaded; a missing snapshot means
    /// the engine starts empty.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` when the configuration is empty, or a
    /// storage error when a snapshot exists but cannot be read.
    pub fn build(
        config: TenantConfig,
        data_dir: PathBuf,
        external_path: String,
        position: usize,
        from_fallback: bool,
        replicator: Arc<Replicator>,
    ) -> Result<Self> {
        if config.raw_config.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "tenant {} has an empty configuration",
                config.tenant_id
            )));
        }

        let engine = Self {
            tenant_id: config.tenant_id.clone(),
            config: RwLock::new(config),
            data_dir,
            external_path,
            from_fallback,
            position: AtomicUsize::new(position),
            silences: RwLock::new(HashMap::new()),
            nflog: RwLock::new(BTreeMap::new()),
            replicator,
            metrics: ControllerMetrics::new(),
        };
        engine.load_snapshots()?;
        Ok(engine)
    }

    /// The tenant this engine serves.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// The configuration the engine currently runs.
    #[must_use]
    pub fn current_config(&self) -> TenantConfig {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Reconfigures the engine in place. State is retained.
    pub fn apply_config(&self, config: TenantConfig) {
        if let Ok(mut current) = self.config.write() {
            *current = config;
        }
    }

    /// Whether this instance was synthesized from the fallback config.
    #[must_use]
    pub fn from_fallback(&self) -> bool {
        self.from_fallback
    }

    /// This replica's position among the tenant's owners.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Relaxed)
    }

    /// Updates the replica position after a ring change.
    pub fn set_position(&self, position: usize) {
        self.position.store(position, Ordering::Relaxed);
    }

    /// Number of silences currently held.
    #[must_use]
    pub fn silence_count(&self) -> usize {
        self.silences.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Creates a silence and replicates it to the tenant's other owners.
    pub async fn create_silence(&self, mut silence: Silence) -> Result<String> {
        if silence.id.is_empty() {
            silence.id = Ulid::new().to_string();
        }
        silence.updated_at = Some(Utc::now());
        let id = silence.id.clone();

        let count = {
            let mut silences = self
                .silences
                .write()
                .map_err(|_| Error::Internal("lock poisoned".into()))?;
            silences.insert(id.clone(), silence.clone());
            silences.len()
        };
        self.metrics.set_silences(&self.tenant_id, count);

        let part = StatePart {
            key: STATE_KEY_SILENCES.to_string(),
            data: serde_json::to_vec(&vec![silence])?,
        };
        self.replicator.broadcast(&self.tenant_id, part).await;

        Ok(id)
    }

    /// All silences, ordered by ID.
    #[must_use]
    pub fn list_silences(&self) -> Vec<Silence> {
        let Ok(silences) = self.silences.read() else {
            return Vec::new();
        };
        let mut list: Vec<Silence> = silences.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Looks up one silence.
    #[must_use]
    pub fn get_silence(&self, id: &str) -> Option<Silence> {
        self.silences.read().ok().and_then(|s| s.get(id).cloned())
    }

    /// Merges a partial-state payload into the engine.
    ///
    /// Returns whether local state changed. The merge is idempotent and
    /// commutative, so replicas converge regardless of delivery order.
    pub fn merge_partial_state(&self, part: &StatePart) -> Result<bool> {
        match part.key.as_str() {
            STATE_KEY_SILENCES => {
                let incoming: Vec<Silence> = serde_json::from_slice(&part.data)?;
                self.merge_silences(incoming)
            }
            STATE_KEY_NOTIFICATION_LOG => {
                let incoming: Vec<NotificationEntry> = serde_json::from_slice(&part.data)?;
                self.merge_notification_entries(incoming)
            }
            other => Err(Error::InvalidInput(format!("unknown state key: {other}"))),
        }
    }

    fn merge_silences(&self, incoming: Vec<Silence>) -> Result<bool> {
        let mut changed = false;
        let count = {
            let mut silences = self
                .silences
                .write()
                .map_err(|_| Error::Internal("lock poisoned".into()))?;
            for silence in incoming {
                if silence.id.is_empty() {
                    continue;
                }
                match silences.get(&silence.id) {
                    Some(existing) if existing.updated_at >= silence.updated_at => {}
                    _ => {
                        silences.insert(silence.id.clone(), silence);
                        changed = true;
                    }
                }
            }
            silences.len()
        };
        if changed {
            self.metrics.set_silences(&self.tenant_id, count);
        }
        Ok(changed)
    }

    fn merge_notification_entries(&self, incoming: Vec<NotificationEntry>) -> Result<bool> {
        let mut changed = false;
        let mut nflog = self
            .nflog
            .write()
            .map_err(|_| Error::Internal("lock poisoned".into()))?;
        for entry in incoming {
            if nflog.insert(entry.key.clone(), entry.clone()) != Some(entry) {
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Installs a full-state snapshot pulled from a peer during bootstrap.
    pub fn merge_full_state(&self, state: FullState) -> Result<()> {
        for part in &state.parts {
            self.merge_partial_state(part)?;
        }
        Ok(())
    }

    /// The full state of this engine, for peer bootstrap.
    #[must_use]
    pub fn full_state(&self) -> FullState {
        let mut parts = Vec::new();

        let silences = self.list_silences();
        if !silences.is_empty() {
            if let Ok(data) = serde_json::to_vec(&silences) {
                parts.push(StatePart {
                    key: STATE_KEY_SILENCES.to_string(),
                    data,
                });
            }
        }

        if let Ok(nflog) = self.nflog.read() {
            if !nflog.is_empty() {
                let entries: Vec<&NotificationEntry> = nflog.values().collect();
                if let Ok(data) = serde_json::to_vec(&entries) {
                    parts.push(StatePart {
                        key: STATE_KEY_NOTIFICATION_LOG.to_string(),
                        data,
                    });
                }
            }
        }

        FullState { parts }
    }

    /// Writes the silences and notification-log snapshots to the tenant
    /// directory.
    pub fn persist_snapshots(&self) -> Result<()> {
        let silences = self.list_silences();
        write_snapshot(
            &self.data_dir.join(SILENCES_SNAPSHOT),
            &serde_json::to_vec(&silences)?,
        )?;

        let entries: Vec<NotificationEntry> = self
            .nflog
            .read()
            .map(|n| n.values().cloned().collect())
            .unwrap_or_default();
        write_snapshot(
            &self.data_dir.join(NOTIFICATION_LOG_SNAPSHOT),
            &serde_json::to_vec(&entries)?,
        )?;
        Ok(())
    }

    fn load_snapshots(&self) -> Result<()> {
        match std::fs::read(self.data_dir.join(SILENCES_SNAPSHOT)) {
            Ok(data) if !data.is_empty() => {
                let silences: Vec<Silence> = serde_json::from_slice(&data)?;
                self.merge_silences(silences)?;
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        match std::fs::read(self.data_dir.join(NOTIFICATION_LOG_SNAPSHOT)) {
            Ok(data) if !data.is_empty() => {
                let entries: Vec<NotificationEntry> = serde_json::from_slice(&data)?;
                self.merge_notification_entries(entries)?;
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Serves one tenant-scoped HTTP request. `path` is relative to the
    /// external URL.
    pub async fn handle(&self, method: &Method, path: &str, body: &[u8]) -> Response {
        match path {
            "" | "/" if *method == Method::GET => Response::builder()
                .status(StatusCode::MOVED_PERMANENTLY)
                .header(header::LOCATION, format!("{}/#/alerts", self.external_path))
                .body(Body::empty())
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),

            "/api/v1/status" if *method == Method::GET => {
                Json(serde_json::json!({"status": "success"})).into_response()
            }

            "/api/v2/silences" if *method == Method::POST => {
                let silence: Silence = match serde_json::from_slice(body) {
                    Ok(silence) => silence,
                    Err(e) => {
                        return (StatusCode::BAD_REQUEST, format!("invalid silence: {e}\n"))
                            .into_response();
                    }
                };
                match self.create_silence(silence).await {
                    Ok(id) => Json(serde_json::json!({"silenceID": id})).into_response(),
                    Err(e) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, format!("{e}\n")).into_response()
                    }
                }
            }

            "/api/v2/silences" if *method == Method::GET => {
                Json(self.list_silences()).into_response()
            }

            p if p.starts_with("/api/v2/silence/") && *method == Method::GET => {
                let id = p.trim_start_matches("/api/v2/silence/");
                match self.get_silence(id) {
                    Some(silence) => Json(silence).into_response(),
                    None => StatusCode::NOT_FOUND.into_response(),
                }
            }

            _ => StatusCode::NOT_FOUND.into_response(),
        }
    }
}
