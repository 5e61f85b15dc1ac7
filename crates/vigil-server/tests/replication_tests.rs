//! State replication tests: push fanout between replicas and initial-state
//! bootstrap from peers.

mod support;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use http_body_util::BodyExt;
use metrics_util::debugging::DebuggingRecorder;
use tempfile::TempDir;
use tower::ServiceExt;

use support::{
    SIMPLE_CONFIG_ONE, counter_sum, memory_alert_store, mock_config, set_config, wait_all_active,
};
use vigil_core::error::{Error, Result};
use vigil_core::storage::{KvBackend, MemoryBackend};
use vigil_core::AlertStore;
use vigil_ring::RingStore;
use vigil_server::controller::MultitenantController;
use vigil_server::metrics::{SyncReason, names};
use vigil_server::replication::{AlertmanagerClient, ClientPool, FullState, StatePart};
use vigil_server::router::{TENANT_HEADER, api_router};

/// Invokes peer calls directly on the target controller, without a server
/// running.
struct PassthroughClient {
    server: Arc<MultitenantController>,
    addr: String,
}

#[async_trait]
impl AlertmanagerClient for PassthroughClient {
    async fn update_state(&self, tenant_id: &str, part: StatePart) -> Result<()> {
        self.server.update_state(tenant_id, part).await
    }

    async fn read_state(&self, tenant_id: &str) -> Result<Option<FullState>> {
        match self.server.read_state(tenant_id) {
            Ok(state) => Ok(Some(state)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remote_address(&self) -> String {
        self.addr.clone()
    }
}

/// Client pool resolving addresses to in-process controllers.
#[derive(Default)]
struct PassthroughPool {
    servers: RwLock<HashMap<String, Arc<MultitenantController>>>,
}

impl PassthroughPool {
    fn register(&self, addr: &str, server: Arc<MultitenantController>) {
        self.servers
            .write()
            .expect("lock")
            .insert(addr.to_string(), server);
    }
}

impl ClientPool for PassthroughPool {
    fn client_for(&self, addr: &str) -> Result<Arc<dyn AlertmanagerClient>> {
        let servers = self.servers.read().expect("lock");
        let server = servers
            .get(addr)
            .ok_or_else(|| Error::NotFound(format!("client not found for address: {addr}")))?;
        Ok(Arc::new(PassthroughClient {
            server: Arc::clone(server),
            addr: addr.to_string(),
        }))
    }

    fn evict_except(&self, _keep: &HashSet<String>) {}
}

struct Fleet {
    kv: Arc<MemoryBackend>,
    store: Arc<dyn AlertStore>,
    pool: Arc<PassthroughPool>,
    tempdirs: Vec<TempDir>,
    controllers: Vec<Arc<MultitenantController>>,
    instance_ids: Vec<String>,
}

impl Fleet {
    fn new() -> Self {
        let kv = Arc::new(MemoryBackend::new());
        let store = memory_alert_store(&kv);
        Self {
            kv,
            store,
            pool: Arc::new(PassthroughPool::default()),
            tempdirs: Vec::new(),
            controllers: Vec::new(),
            instance_ids: Vec::new(),
        }
    }

    fn ring_store(&self) -> RingStore {
        RingStore::new(Arc::clone(&self.kv) as Arc<dyn KvBackend>)
    }

    /// Starts one instance, waits for the ring to settle, and re-syncs it so
    /// it picks up the tenants it now owns.
    async fn add_instance(&mut self, index: usize, replication_factor: usize) {
        let tmp = TempDir::new().expect("tempdir");
        let mut config = mock_config(tmp.path());
        config.external_url =
            Some(url::Url::parse("http://localhost:8080/alertmanager").expect("url"));
        config.sharding_enabled = true;
        config.sharding_ring.instance_id = format!("alertmanager-{index}");
        config.sharding_ring.instance_addr = format!("127.0.0.{index}");
        config.sharding_ring.replication_factor = replication_factor;
        self.tempdirs.push(tmp);

        let pool: Arc<dyn ClientPool> = Arc::clone(&self.pool) as Arc<dyn ClientPool>;
        let controller = MultitenantController::new(
            config,
            Arc::clone(&self.store),
            Some(Arc::clone(&self.kv) as Arc<dyn KvBackend>),
            pool,
        )
        .expect("controller");
        self.pool
            .register(&format!("127.0.0.{index}"), Arc::clone(&controller));
        controller.start().await.expect("start");

        self.instance_ids.push(format!("alertmanager-{index}"));
        self.controllers.push(Arc::clone(&controller));

        wait_all_active(&self.ring_store(), &self.instance_ids).await;
        self.controllers
            .last()
            .expect("instance")
            .load_and_sync_configs(SyncReason::RingChange)
            .await
            .expect("sync");
    }
}

fn silence_body(comment: &str) -> Vec<u8> {
    let now = Utc::now();
    serde_json::to_vec(&serde_json::json!({
        "matchers": [{"name": "instance", "value": "prometheus-one", "isRegex": false}],
        "comment": comment,
        "startsAt": now.to_rfc3339(),
        "endsAt": (now + chrono::Duration::hours(1)).to_rfc3339(),
    }))
    .expect("serialize")
}

async fn write_silence(controller: &Arc<MultitenantController>, tenant: &str) {
    let router = api_router(Arc::clone(controller));
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("http://localhost:8080/alertmanager/api/v2/silences")
                .header(TENANT_HEADER, tenant)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(silence_body("Created for a test case.")))
                .expect("request"),
        )
        .await
        .expect("response");

    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let body = String::from_utf8_lossy(&bytes);
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert!(
        body.contains("\"silenceID\":\"") && !body.contains("\"silenceID\":\"\""),
        "unexpected body: {body}"
    );
}

async fn check_silence(controller: &Arc<MultitenantController>, tenant: &str) {
    let router = api_router(Arc::clone(controller));
    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("http://localhost:8080/alertmanager/api/v2/silences")
                .header(TENANT_HEADER, tenant)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let body = String::from_utf8_lossy(&bytes);
    assert_eq!(status, StatusCode::OK);
    assert!(
        body.contains("\"comment\":\"Created for a test case.\""),
        "unexpected body: {body}"
    );
}

#[tokio::test]
async fn silences_replicate_across_the_fleet() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let _guard = metrics::set_default_local_recorder(&recorder);

    let replication_factor = 3;
    let mut fleet = Fleet::new();
    set_config(&fleet.store, "u-1", SIMPLE_CONFIG_ONE).await;

    for i in 1..=3 {
        fleet.add_instance(i, replication_factor).await;
    }
    // Every instance owns the tenant at RF = instance count; settle
    // ownership everywhere.
    for controller in &fleet.controllers {
        controller
            .load_and_sync_configs(SyncReason::RingChange)
            .await
            .expect("sync");
        assert!(controller.instance("u-1").is_some());
    }

    write_silence(&fleet.controllers[0], "u-1").await;

    // The silence reaches every replica.
    let total_silences: usize = fleet
        .controllers
        .iter()
        .map(|c| c.instance("u-1").expect("replica").silence_count())
        .sum();
    assert_eq!(total_silences, replication_factor);
    for controller in &fleet.controllers {
        check_silence(controller, "u-1").await;
    }

    // One broadcast per replica that changed state.
    assert_eq!(
        counter_sum(&snapshotter, names::STATE_REPLICATION_TOTAL),
        replication_factor as u64
    );
    assert_eq!(
        counter_sum(&snapshotter, names::STATE_REPLICATION_FAILED_TOTAL),
        0
    );

    // Two-hop fanout: (RF-1) first-hop merges plus (RF-1)^2 second-hop
    // no-op merges.
    let fanout = (replication_factor - 1) as u64;
    assert_eq!(
        counter_sum(&snapshotter, names::PARTIAL_STATE_MERGES_TOTAL),
        fanout + fanout * fanout
    );
    assert_eq!(
        counter_sum(&snapshotter, names::PARTIAL_STATE_MERGES_FAILED_TOTAL),
        0
    );

    for controller in &fleet.controllers {
        controller.stop().await;
    }
}

#[tokio::test]
async fn new_replicas_bootstrap_from_peers() {
    for replication_factor in [2, 3] {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let mut fleet = Fleet::new();
        for i in 1..=2 {
            set_config(&fleet.store, &format!("u-{i}"), SIMPLE_CONFIG_ONE).await;
        }

        // First instance hosts the tenants and takes a silence.
        fleet.add_instance(1, replication_factor).await;
        write_silence(&fleet.controllers[0], "u-1").await;
        check_silence(&fleet.controllers[0], "u-1").await;
        assert_eq!(
            counter_sum(&snapshotter, names::STATE_REPLICATION_TOTAL),
            1,
            "RF {replication_factor}"
        );

        // A second instance joins and pulls the silence from its peer
        // instead of being pushed to.
        fleet.add_instance(2, replication_factor).await;
        check_silence(&fleet.controllers[1], "u-1").await;
        assert_eq!(
            counter_sum(&snapshotter, names::STATE_REPLICATION_TOTAL),
            1,
            "join must not push, RF {replication_factor}"
        );
        assert_eq!(
            counter_sum(&snapshotter, names::STATE_REPLICATION_FAILED_TOTAL),
            0
        );

        if replication_factor >= 3 {
            // A third instance can pull from either peer.
            fleet.add_instance(3, replication_factor).await;
            check_silence(&fleet.controllers[2], "u-1").await;
            assert_eq!(
                counter_sum(&snapshotter, names::STATE_REPLICATION_TOTAL),
                1
            );
        }

        let silences: usize = fleet
            .controllers
            .iter()
            .filter_map(|c| c.instance("u-1"))
            .map(|i| i.silence_count())
            .sum();
        assert_eq!(silences, fleet.controllers.len());

        for controller in &fleet.controllers {
            controller.stop().await;
        }
    }
}
