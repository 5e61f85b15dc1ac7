//! Shared helpers for controller integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, Snapshotter};
use url::Url;

use vigil_core::storage::{KvBackend, MemoryBackend};
use vigil_core::{AlertStore, ObjectAlertStore, TenantConfig};
use vigil_ring::{InstanceState, RingStore};
use vigil_server::config::VigilConfig;

pub const SIMPLE_CONFIG_ONE: &str = "route:\n  receiver: dummy\n\nreceivers:\n  - name: dummy";
pub const SIMPLE_CONFIG_TWO: &str = "route:\n  receiver: dummy2\n\nreceivers:\n  - name: dummy2";

/// A controller config suitable for tests: real external URL, tenant state
/// in a temp dir, and periodic loops slowed down so tests drive syncs
/// explicitly.
pub fn mock_config(data_dir: &Path) -> VigilConfig {
    let mut config = VigilConfig {
        external_url: Some(Url::parse("http://localhost/api/prom").expect("url")),
        data_dir: data_dir.to_path_buf(),
        poll_interval: Duration::from_secs(3600),
        ..VigilConfig::default()
    };
    config.sharding_ring.instance_id = "test".to_string();
    config.sharding_ring.instance_addr = "127.0.0.1".to_string();
    config.sharding_ring.ring_check_period = Duration::from_secs(3600);
    config.sharding_ring.heartbeat_period = Duration::from_secs(3600);
    config
}

/// Builds an in-memory alert store over a shared KV backend.
pub fn memory_alert_store(kv: &Arc<MemoryBackend>) -> Arc<dyn AlertStore> {
    let backend: Arc<dyn KvBackend> = Arc::clone(kv) as Arc<dyn KvBackend>;
    Arc::new(ObjectAlertStore::new(backend))
}

/// Seeds one tenant config.
pub async fn set_config(store: &Arc<dyn AlertStore>, tenant: &str, raw: &str) {
    store
        .set_config(TenantConfig::new(tenant, raw))
        .await
        .expect("set config");
}

/// Waits until every listed instance is ACTIVE in the ring.
pub async fn wait_all_active(ring_store: &RingStore, instance_ids: &[String]) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let (desc, _) = ring_store.get().await.expect("ring get");
        let all_active = instance_ids.iter().all(|id| {
            desc.instances
                .get(id)
                .is_some_and(|i| i.state == InstanceState::Active)
        });
        if all_active {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "ring did not settle: {desc:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Sums every counter with the given name across label sets.
pub fn counter_sum(snapshotter: &Snapshotter, name: &str) -> u64 {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter(|(key, _, _, _)| key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => v,
            _ => 0,
        })
        .sum()
}

/// Reads one gauge by name and label pair.
pub fn gauge_value(snapshotter: &Snapshotter, name: &str, label: (&str, &str)) -> Option<f64> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find(|(key, _, _, _)| {
            key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label.0 && l.value() == label.1)
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Gauge(v) => v.into_inner(),
            _ => f64::NAN,
        })
}
