//! Controller configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use vigil_core::error::{Error, Result};

/// Configuration for the multitenant controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VigilConfig {
    /// External URL tenants reach this service under. Required: request
    /// routing and UI redirects are derived from its path.
    pub external_url: Option<Url>,

    /// Root directory for per-tenant state (snapshots, templates).
    pub data_dir: PathBuf,

    /// How often to poll the config store.
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,

    /// HTTP listen port.
    pub http_port: u16,

    /// Whether tenants are partitioned across the fleet via the ring.
    pub sharding_enabled: bool,

    /// Ring membership settings (used when sharding is enabled).
    pub sharding_ring: ShardingRingConfig,

    /// Per-tenant state snapshot settings.
    pub persister: PersisterConfig,

    /// Instance-wide default configuration used to lazily synthesize a
    /// tenant that has no stored config.
    pub fallback_config: Option<String>,
}

/// Ring membership settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardingRingConfig {
    /// This instance's ID in the ring.
    pub instance_id: String,
    /// Address peers dial for replication RPCs.
    pub instance_addr: String,
    /// How many instances host each tenant.
    pub replication_factor: usize,
    /// How often to heartbeat the ring.
    #[serde(with = "duration_secs")]
    pub heartbeat_period: Duration,
    /// Heartbeats older than this mark an instance unhealthy.
    #[serde(with = "duration_secs")]
    pub heartbeat_timeout: Duration,
    /// How often to check the ring for ownership changes.
    #[serde(with = "duration_secs")]
    pub ring_check_period: Duration,
}

/// Snapshot persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersisterConfig {
    /// Interval between state snapshots, in seconds. Must be positive.
    pub interval_secs: i64,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            external_url: None,
            data_dir: PathBuf::from("data/"),
            poll_interval: Duration::from_secs(15),
            http_port: 8080,
            sharding_enabled: false,
            sharding_ring: ShardingRingConfig::default(),
            persister: PersisterConfig::default(),
            fallback_config: None,
        }
    }
}

impl Default for ShardingRingConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            instance_addr: "127.0.0.1".to_string(),
            replication_factor: 3,
            heartbeat_period: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(60),
            ring_check_period: Duration::from_secs(5),
        }
    }
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self { interval_secs: 900 }
    }
}

fn default_instance_id() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "vigil".to_string())
}

impl VigilConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` when the external URL is missing, the
    /// persist interval is not strictly positive, or the ring settings are
    /// inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self
            .external_url
            .as_ref()
            .is_none_or(|u| u.as_str().is_empty())
        {
            return Err(Error::InvalidInput(
                "unable to create Alertmanager because the external URL has not been configured"
                    .to_string(),
            ));
        }
        if self.persister.interval_secs <= 0 {
            return Err(Error::InvalidInput("invalid persist interval".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidInput(
                "poll interval must be positive".to_string(),
            ));
        }
        if self.sharding_enabled {
            if self.sharding_ring.instance_id.is_empty() {
                return Err(Error::InvalidInput(
                    "ring instance id must not be empty".to_string(),
                ));
            }
            if self.sharding_ring.replication_factor == 0 {
                return Err(Error::InvalidInput(
                    "replication factor must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// External URL path prefix, without a trailing slash.
    ///
    /// Call only after [`VigilConfig::validate`].
    #[must_use]
    pub fn external_path(&self) -> String {
        self.external_url
            .as_ref()
            .map(|u| u.path().trim_end_matches('/').to_string())
            .unwrap_or_default()
    }

    /// Persist interval as a std duration.
    ///
    /// Call only after [`VigilConfig::validate`].
    #[must_use]
    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.persister.interval_secs).unwrap_or(900))
    }

    /// Heartbeat timeout as a chrono duration, for ring health checks.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.sharding_ring.heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(60))
    }

    /// Loads configuration from environment variables.
    ///
    /// Supported env vars:
    /// - `VIGIL_EXTERNAL_URL`
    /// - `VIGIL_DATA_DIR`
    /// - `VIGIL_HTTP_PORT`
    /// - `VIGIL_POLL_INTERVAL_SECS`
    /// - `VIGIL_SHARDING_ENABLED`
    /// - `VIGIL_INSTANCE_ID`
    /// - `VIGIL_INSTANCE_ADDR`
    /// - `VIGIL_REPLICATION_FACTOR`
    /// - `VIGIL_HEARTBEAT_PERIOD_SECS`
    /// - `VIGIL_HEARTBEAT_TIMEOUT_SECS`
    /// - `VIGIL_RING_CHECK_PERIOD_SECS`
    /// - `VIGIL_PERSIST_INTERVAL_SECS`
    /// - `VIGIL_FALLBACK_CONFIG_FILE`
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed, or if
    /// the resulting configuration fails validation.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = env_string("VIGIL_EXTERNAL_URL") {
            let url = Url::parse(&raw)
                .map_err(|e| Error::InvalidInput(format!("VIGIL_EXTERNAL_URL is not a URL: {e}")))?;
            config.external_url = Some(url);
        }
        if let Some(dir) = env_string("VIGIL_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(port) = env_u16("VIGIL_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(secs) = env_u64("VIGIL_POLL_INTERVAL_SECS")? {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(enabled) = env_bool("VIGIL_SHARDING_ENABLED")? {
            config.sharding_enabled = enabled;
        }
        if let Some(id) = env_string("VIGIL_INSTANCE_ID") {
            config.sharding_ring.instance_id = id;
        }
        if let Some(addr) = env_string("VIGIL_INSTANCE_ADDR") {
            config.sharding_ring.instance_addr = addr;
        }
        if let Some(rf) = env_u64("VIGIL_REPLICATION_FACTOR")? {
            config.sharding_ring.replication_factor = usize::try_from(rf)
                .map_err(|_| Error::InvalidInput("VIGIL_REPLICATION_FACTOR is too large".into()))?;
        }
        if let Some(secs) = env_u64("VIGIL_HEARTBEAT_PERIOD_SECS")? {
            config.sharding_ring.heartbeat_period = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("VIGIL_HEARTBEAT_TIMEOUT_SECS")? {
            config.sharding_ring.heartbeat_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("VIGIL_RING_CHECK_PERIOD_SECS")? {
            config.sharding_ring.ring_check_period = Duration::from_secs(secs);
        }
        if let Some(secs) = env_string("VIGIL_PERSIST_INTERVAL_SECS") {
            config.persister.interval_secs = secs.parse::<i64>().map_err(|e| {
                Error::InvalidInput(format!("VIGIL_PERSIST_INTERVAL_SECS must be an integer: {e}"))
            })?;
        }
        if let Some(path) = env_string("VIGIL_FALLBACK_CONFIG_FILE") {
            let body = std::fs::read_to_string(&path).map_err(|e| {
                Error::InvalidInput(format!("VIGIL_FALLBACK_CONFIG_FILE failed to read {path}: {e}"))
            })?;
            config.fallback_config = Some(body);
        }

        config.validate()?;
        Ok(config)
    }
}

mod duration_secs {
    //! Serializes a `std::time::Duration` as whole seconds.

    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        value.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u16: {e}")))
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(Some(true)),
        "false" | "0" | "no" | "n" => Ok(Some(false)),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> VigilConfig {
        VigilConfig {
            external_url: Some(Url::parse("http://localhost/api/prom").expect("url")),
            ..VigilConfig::default()
        }
    }

    #[test]
    fn default_values_with_external_url_validate() {
        valid_config().validate().expect("valid");
    }

    #[test]
    fn missing_external_url_is_rejected() {
        let config = VigilConfig::default();
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid input: unable to create Alertmanager because the external URL has not been configured"
        );
    }

    #[test]
    fn zero_persist_interval_is_rejected() {
        let mut config = valid_config();
        config.persister.interval_secs = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid input: invalid persist interval");
    }

    #[test]
    fn negative_persist_interval_is_rejected() {
        let mut config = valid_config();
        config.persister.interval_secs = -1;
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid input: invalid persist interval");
    }

    #[test]
    fn sharding_requires_replication_factor() {
        let mut config = valid_config();
        config.sharding_enabled = true;
        config.sharding_ring.replication_factor = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn external_path_strips_trailing_slash() {
        let mut config = valid_config();
        config.external_url = Some(Url::parse("http://localhost:8080/alertmanager/").expect("url"));
        assert_eq!(config.external_path(), "/alertmanager");
    }
}
