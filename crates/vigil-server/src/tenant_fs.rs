//! Per-tenant on-disk layout.
//!
//! Each tenant owns one directory under the data dir:
//!
//! ```text
//! <data_dir>/<tenant>/notification_log
//! <data_dir>/<tenant>/silences
//! <data_dir>/<tenant>/templates/<template-name>
//! ```
//!
//! A tenant directory exists iff a tenant instance exists; orphans are pruned
//! at the end of every sync. Older deployments used a flat layout
//! (`nflog:<tenant>`, `silences:<tenant>`, `templates/<tenant>/...`) which is
//! migrated exactly once at service start.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use vigil_core::error::{Error, Result};

/// File name of the notification-log snapshot inside a tenant directory.
pub const NOTIFICATION_LOG_SNAPSHOT: &str = "notification_log";

/// File name of the silences snapshot inside a tenant directory.
pub const SILENCES_SNAPSHOT: &str = "silences";

/// Name of the templates subdirectory inside a tenant directory.
pub const TEMPLATES_DIR: &str = "templates";

/// Legacy flat-layout prefix for notification-log snapshots.
const LEGACY_NFLOG_PREFIX: &str = "nflog:";

/// Legacy flat-layout prefix for silences snapshots.
const LEGACY_SILENCES_PREFIX: &str = "silences:";

/// Owns the per-tenant directory layout under one data dir.
#[derive(Debug, Clone)]
pub struct TenantFs {
    data_dir: PathBuf,
}

impl TenantFs {
    /// Creates a layout rooted at `data_dir`. The directory is created on
    /// first use.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// The tenant's directory (not necessarily existing yet).
    #[must_use]
    pub fn tenant_dir(&self, tenant_id: &str) -> PathBuf {
        self.data_dir.join(tenant_id)
    }

    /// The tenant's templates directory.
    #[must_use]
    pub fn templates_dir(&self, tenant_id: &str) -> PathBuf {
        self.tenant_dir(tenant_id).join(TEMPLATES_DIR)
    }

    /// Creates the tenant's directory and returns its path.
    pub fn ensure_tenant_dir(&self, tenant_id: &str) -> Result<PathBuf> {
        let dir = self.tenant_dir(tenant_id);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Maps every existing tenant directory to its path.
    pub fn per_tenant_dirs(&self) -> Result<HashMap<String, PathBuf>> {
        let mut dirs = HashMap::new();
        let entries = match std::fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            dirs.insert(name, entry.path());
        }
        Ok(dirs)
    }

    /// Removes every tenant directory whose tenant is not in `keep`.
    pub fn prune_orphan_dirs(&self, keep: &HashSet<String>) -> Result<()> {
        for (tenant, path) in self.per_tenant_dirs()? {
            if keep.contains(&tenant) {
                continue;
            }
            tracing::info!(tenant = %tenant, path = %path.display(), "deleting obsolete tenant state");
            std::fs::remove_dir_all(&path)?;
        }
        Ok(())
    }

    /// Writes one template for a tenant. Returns whether the file changed.
    pub fn write_template(&self, tenant_id: &str, name: &str, body: &str) -> Result<bool> {
        store_template_file(&self.templates_dir(tenant_id), name, body)
    }

    /// Removes template files not named in `keep`. Missing directories are
    /// fine (the tenant may have no templates at all).
    pub fn remove_unused_templates(&self, tenant_id: &str, keep: &HashSet<&str>) -> Result<()> {
        let dir = self.templates_dir(tenant_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !keep.contains(name.as_str()) {
                tracing::debug!(tenant = %tenant_id, template = %name, "removing unused template");
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Migrates the legacy flat layout into per-tenant directories.
    ///
    /// Idempotent: re-running after a partial migration finishes the job, and
    /// a data dir without legacy files is left untouched. On success no
    /// legacy paths remain.
    pub fn migrate_legacy_layout(&self) -> Result<()> {
        let entries = match std::fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };

            let target = if let Some(tenant) = name.strip_prefix(LEGACY_NFLOG_PREFIX) {
                Some((tenant.to_string(), NOTIFICATION_LOG_SNAPSHOT))
            } else if let Some(tenant) = name.strip_prefix(LEGACY_SILENCES_PREFIX) {
                Some((tenant.to_string(), SILENCES_SNAPSHOT))
            } else {
                None
            };

            let Some((tenant, snapshot)) = target else {
                continue;
            };
            if tenant.is_empty() {
                continue;
            }

            let dest = self.ensure_tenant_dir(&tenant)?.join(snapshot);
            tracing::info!(
                from = %entry.path().display(),
                to = %dest.display(),
                "migrating legacy state file"
            );
            std::fs::rename(entry.path(), dest)?;
        }

        self.migrate_legacy_templates()?;
        Ok(())
    }

    /// Moves `templates/<tenant>/*` into `<tenant>/templates/*` and removes
    /// the legacy templates root.
    fn migrate_legacy_templates(&self) -> Result<()> {
        let legacy_root = self.data_dir.join(TEMPLATES_DIR);
        let entries = match std::fs::read_dir(&legacy_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Ok(tenant) = entry.file_name().into_string() else {
                continue;
            };

            let dest_dir = self.templates_dir(&tenant);
            std::fs::create_dir_all(&dest_dir)?;
            for template in std::fs::read_dir(entry.path())? {
                let template = template?;
                let dest = dest_dir.join(template.file_name());
                tracing::info!(
                    from = %template.path().display(),
                    to = %dest.display(),
                    "migrating legacy template"
                );
                std::fs::rename(template.path(), dest)?;
            }
            std::fs::remove_dir(entry.path())?;
        }

        std::fs::remove_dir(&legacy_root)?;
        Ok(())
    }
}

/// Stores one template file, writing atomically and only when the content
/// differs.
///
/// Returns whether the file changed.
///
/// # Errors
///
/// Returns `Error::InvalidInput` for names that escape the templates
/// directory (`.`, `..`, or anything containing a path separator); no
/// filesystem write happens in that case.
pub fn store_template_file(templates_dir: &Path, name: &str, content: &str) -> Result<bool> {
    if name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(Error::InvalidInput(format!(
            "template name is not valid: {name}"
        )));
    }

    std::fs::create_dir_all(templates_dir)?;
    let path = templates_dir.join(name);

    match std::fs::read(&path) {
        Ok(existing) if existing == content.as_bytes() => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut tmp = tempfile::NamedTempFile::new_in(templates_dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path)
        .map_err(|e| Error::storage_with_source("failed to persist template file", e.error))?;
    Ok(true)
}

/// Atomically writes a snapshot file (write to temp in the same directory,
/// fsync, rename).
pub fn write_snapshot(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Internal(format!("snapshot path has no parent: {}", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| Error::storage_with_source("failed to persist snapshot", e.error))?;
    Ok(())
}
