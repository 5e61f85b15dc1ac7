//! Tenant alert-configuration store.
//!
//! Each tenant owns exactly one configuration: the raw alertmanager YAML plus
//! an ordered list of template files. Configurations carry no version number;
//! two configurations are equal iff their content is byte-equal.
//!
//! [`AlertStore`] is the narrow contract the controller consumes. The default
//! implementation stores each config as a JSON object under `alerts/<tenant>`
//! in any [`KvBackend`]. All reads are snapshot reads; the controller never
//! holds store transactions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::{KvBackend, WritePrecondition};

/// Key prefix for tenant configurations.
const ALERTS_PREFIX: &str = "alerts/";

/// A template file shipped alongside a tenant configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateFile {
    /// File name, relative to the tenant's templates directory.
    pub filename: String,
    /// Template body.
    pub body: String,
}

/// A tenant's alertmanager configuration.
///
/// Identity is `tenant_id`; the value is immutable. Equality is byte equality
/// of the raw config and the template list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Tenant identifier.
    pub tenant_id: String,
    /// Raw alertmanager configuration (YAML, treated as opaque text here).
    pub raw_config: String,
    /// Template files, in the order they were submitted.
    #[serde(default)]
    pub templates: Vec<TemplateFile>,
}

impl TenantConfig {
    /// Creates a config without templates.
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, raw_config: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            raw_config: raw_config.into(),
            templates: Vec::new(),
        }
    }
}

/// Abstract store of tenant alert configurations.
///
/// Errors are either transient (`Error::Storage`, retry on the next sync) or
/// permanent (`Error::NotFound`).
#[async_trait]
pub trait AlertStore: Send + Sync + 'static {
    /// Lists all tenant IDs that have a configuration.
    async fn list_tenants(&self) -> Result<Vec<String>>;

    /// Reads one tenant's configuration.
    ///
    /// Returns `Error::NotFound` when the tenant has no configuration.
    async fn get_config(&self, tenant_id: &str) -> Result<TenantConfig>;

    /// Creates or replaces a tenant's configuration.
    async fn set_config(&self, config: TenantConfig) -> Result<()>;

    /// Deletes a tenant's configuration. Idempotent.
    async fn delete_config(&self, tenant_id: &str) -> Result<()>;

    /// Batch-reads full configurations for the given tenants.
    ///
    /// Tenants that have disappeared since listing are silently skipped;
    /// transient errors abort the batch.
    async fn get_configs(&self, tenant_ids: &[String]) -> Result<HashMap<String, TenantConfig>>;
}

/// [`AlertStore`] backed by any [`KvBackend`].
pub struct ObjectAlertStore {
    storage: Arc<dyn KvBackend>,
}

impl ObjectAlertStore {
    /// Creates a store over the given backend.
    #[must_use]
    pub fn new(storage: Arc<dyn KvBackend>) -> Self {
        Self { storage }
    }

    fn config_key(tenant_id: &str) -> String {
        format!("{ALERTS_PREFIX}{tenant_id}")
    }
}

#[async_trait]
impl AlertStore for ObjectAlertStore {
    async fn list_tenants(&self) -> Result<Vec<String>> {
        let objects = self.storage.list(ALERTS_PREFIX).await?;
        let mut tenants: Vec<String> = objects
            .into_iter()
            .filter_map(|meta| {
                meta.key
                    .strip_prefix(ALERTS_PREFIX)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
            })
            .collect();
        tenants.sort_unstable();
        Ok(tenants)
    }

    async fn get_config(&self, tenant_id: &str) -> Result<TenantConfig> {
        let data = self.storage.get(&Self::config_key(tenant_id)).await?;
        let config: TenantConfig = serde_json::from_slice(&data)?;
        Ok(config)
    }

    async fn set_config(&self, config: TenantConfig) -> Result<()> {
        if config.tenant_id.is_empty() {
            return Err(Error::InvalidInput("tenant id must not be empty".into()));
        }
        let key = Self::config_key(&config.tenant_id);
        let data = serde_json::to_vec(&config)?;
        self.storage
            .put(&key, Bytes::from(data), WritePrecondition::None)
            .await?;
        Ok(())
    }

    async fn delete_config(&self, tenant_id: &str) -> Result<()> {
        self.storage.delete(&Self::config_key(tenant_id)).await
    }

    async fn get_configs(&self, tenant_ids: &[String]) -> Result<HashMap<String, TenantConfig>> {
        let mut configs = HashMap::with_capacity(tenant_ids.len());
        for tenant_id in tenant_ids {
            match self.get_config(tenant_id).await {
                Ok(config) => {
                    configs.insert(tenant_id.clone(), config);
                }
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(configs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn store() -> ObjectAlertStore {
        ObjectAlertStore::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn set_list_get_delete() {
        let store = store();

        store
            .set_config(TenantConfig::new("u1", "route:\n  receiver: dummy"))
            .await
            .expect("set");
        store
            .set_config(TenantConfig::new("u2", "route:\n  receiver: dummy"))
            .await
            .expect("set");

        assert_eq!(store.list_tenants().await.unwrap(), vec!["u1", "u2"]);

        let cfg = store.get_config("u1").await.expect("get");
        assert_eq!(cfg.tenant_id, "u1");
        assert!(cfg.templates.is_empty());

        store.delete_config("u1").await.expect("delete");
        assert!(store.get_config("u1").await.unwrap_err().is_not_found());
        assert_eq!(store.list_tenants().await.unwrap(), vec!["u2"]);
    }

    #[tokio::test]
    async fn batch_read_skips_missing() {
        let store = store();
        store
            .set_config(TenantConfig::new("u1", "cfg"))
            .await
            .expect("set");

        let configs = store
            .get_configs(&["u1".to_string(), "gone".to_string()])
            .await
            .expect("batch");
        assert_eq!(configs.len(), 1);
        assert!(configs.contains_key("u1"));
    }

    #[tokio::test]
    async fn templates_round_trip_in_order() {
        let store = store();
        let mut config = TenantConfig::new("u3", "cfg");
        config.templates = vec![
            TemplateFile {
                filename: "first.tpl".into(),
                body: "{{ define \"t1\" }}one{{ end }}".into(),
            },
            TemplateFile {
                filename: "second.tpl".into(),
                body: "{{ define \"t2\" }}two{{ end }}".into(),
            },
        ];
        store.set_config(config.clone()).await.expect("set");

        let read = store.get_config("u3").await.expect("get");
        assert_eq!(read, config);
    }

    #[tokio::test]
    async fn rejects_empty_tenant_id() {
        let store = store();
        let err = store
            .set_config(TenantConfig::new("", "cfg"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
