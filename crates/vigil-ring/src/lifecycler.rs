//! Ring membership lifecycle for one instance.
//!
//! The lifecycler drives this instance's record in the shared descriptor:
//!
//! 1. Register as JOINING, reusing previously claimed tokens when the
//!    instance is already known (topping up to the full token count).
//! 2. After the initial configuration sync succeeds, promote to ACTIVE.
//! 3. Heartbeat periodically; on each heartbeat, auto-forget peers whose
//!    heartbeat is older than `RING_AUTO_FORGET_UNHEALTHY_PERIODS` heartbeat
//!    timeouts.
//! 4. On shutdown, flip to LEAVING and then unregister.
//!
//! The lifecycler never promotes to ACTIVE on its own: the owner decides
//! when joining is complete, so a failed initial sync leaves the instance
//! invisible to traffic.

use std::sync::{Arc, RwLock};

use chrono::{Duration, Utc};

use vigil_core::error::{Error, Result};

use crate::desc::{InstanceDesc, InstanceState, RING_NUM_TOKENS};
use crate::store::RingStore;

/// Heartbeat-timeout multiples after which an unresponsive peer is forgotten.
pub const RING_AUTO_FORGET_UNHEALTHY_PERIODS: i32 = 10;

/// Static identity and timing configuration for the lifecycler.
#[derive(Debug, Clone)]
pub struct LifecyclerConfig {
    /// This instance's ID in the ring.
    pub instance_id: String,
    /// Address peers dial for replication RPCs.
    pub instance_addr: String,
    /// How often to heartbeat.
    pub heartbeat_period: std::time::Duration,
    /// Heartbeats older than this mark an instance unhealthy.
    pub heartbeat_timeout: Duration,
    /// Tokens to claim on the ring.
    pub num_tokens: usize,
}

impl LifecyclerConfig {
    /// Creates a config with the default token count.
    #[must_use]
    pub fn new(
        instance_id: impl Into<String>,
        instance_addr: impl Into<String>,
        heartbeat_period: std::time::Duration,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            instance_addr: instance_addr.into(),
            heartbeat_period,
            heartbeat_timeout,
            num_tokens: RING_NUM_TOKENS,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct LocalState {
    registered: bool,
    state: Option<InstanceState>,
    tokens: Vec<u32>,
}

/// Manages this instance's membership in the ring.
pub struct Lifecycler {
    store: RingStore,
    config: LifecyclerConfig,
    local: Arc<RwLock<LocalState>>,
}

impl Lifecycler {
    /// Creates a lifecycler. Nothing is written to the ring until
    /// [`Lifecycler::register_joining`] is called.
    #[must_use]
    pub fn new(store: RingStore, config: LifecyclerConfig) -> Self {
        Self {
            store,
            config,
            local: Arc::new(RwLock::new(LocalState::default())),
        }
    }

    /// Whether this instance has registered itself in the ring.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.local.read().map(|l| l.registered).unwrap_or(false)
    }

    /// The instance state as last written by this lifecycler.
    #[must_use]
    pub fn state(&self) -> Option<InstanceState> {
        self.local.read().ok().and_then(|l| l.state)
    }

    /// Tokens claimed by this instance.
    #[must_use]
    pub fn tokens(&self) -> Vec<u32> {
        self.local.read().map(|l| l.tokens.clone()).unwrap_or_default()
    }

    /// This instance's ID.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    fn set_local(&self, state: InstanceState, tokens: Vec<u32>) -> Result<()> {
        let mut local = self
            .local
            .write()
            .map_err(|_| Error::Internal("lock poisoned".into()))?;
        local.registered = true;
        local.state = Some(state);
        local.tokens = tokens;
        Ok(())
    }

    /// Registers this instance as JOINING.
    ///
    /// Tokens already recorded for this instance are retained and topped up
    /// to the configured count with fresh random tokens that avoid collisions
    /// with the rest of the ring.
    pub async fn register_joining(&self) -> Result<()> {
        let config = self.config.clone();
        let mut claimed = Vec::new();

        self.store
            .cas(|desc| {
                let now = Utc::now();
                let previous = desc.instances.get(&config.instance_id);
                let registered_ts = previous.map_or(now, |d| d.registered_ts);
                let mut tokens = previous.map(|d| d.tokens.clone()).unwrap_or_default();
                if tokens.len() < config.num_tokens {
                    let fresh = desc.generate_tokens(config.num_tokens - tokens.len(), &tokens);
                    tokens.extend(fresh);
                    tokens.sort_unstable();
                }
                claimed = tokens.clone();

                desc.upsert_instance(
                    &config.instance_id,
                    InstanceDesc {
                        addr: config.instance_addr.clone(),
                        tokens,
                        state: InstanceState::Joining,
                        heartbeat_ts: now,
                        registered_ts,
                    },
                );
                Ok(true)
            })
            .await?;

        tracing::info!(
            instance_id = %config.instance_id,
            tokens = claimed.len(),
            "registered in the ring as JOINING"
        );
        self.set_local(InstanceState::Joining, claimed)
    }

    /// Promotes this instance to the given state (ACTIVE after a successful
    /// initial sync, LEAVING on shutdown).
    pub async fn change_state(&self, state: InstanceState) -> Result<()> {
        let config = self.config.clone();
        self.store
            .cas(|desc| {
                let Some(instance) = desc.instances.get_mut(&config.instance_id) else {
                    return Err(Error::Internal(format!(
                        "instance {} missing from the ring",
                        config.instance_id
                    )));
                };
                instance.state = state;
                instance.heartbeat_ts = Utc::now();
                Ok(true)
            })
            .await?;

        tracing::info!(instance_id = %config.instance_id, ?state, "ring state changed");
        let tokens = self.tokens();
        self.set_local(state, tokens)
    }

    /// Refreshes this instance's heartbeat and forgets long-dead peers.
    ///
    /// Peers whose heartbeat is older than
    /// `RING_AUTO_FORGET_UNHEALTHY_PERIODS × heartbeat_timeout` are removed
    /// from the descriptor so their tokens stop consuming walk slots forever.
    pub async fn heartbeat(&self) -> Result<()> {
        let config = self.config.clone();
        let forget_after = self.config.heartbeat_timeout * RING_AUTO_FORGET_UNHEALTHY_PERIODS;
        let tokens = self.tokens();
        let state = self.state().unwrap_or(InstanceState::Active);

        self.store
            .cas(|desc| {
                let now = Utc::now();

                let forgotten: Vec<String> = desc
                    .instances
                    .iter()
                    .filter(|(id, instance)| {
                        *id != &config.instance_id && now - instance.heartbeat_ts > forget_after
                    })
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in &forgotten {
                    tracing::warn!(instance_id = %id, "auto-forgetting unhealthy ring member");
                    desc.remove_instance(id);
                }

                match desc.instances.get_mut(&config.instance_id) {
                    Some(instance) => instance.heartbeat_ts = now,
                    // Someone forgot us (e.g. after a long pause); re-register
                    // with the tokens and state we last held.
                    None => {
                        desc.upsert_instance(
                            &config.instance_id,
                            InstanceDesc {
                                addr: config.instance_addr.clone(),
                                tokens: tokens.clone(),
                                state,
                                heartbeat_ts: now,
                                registered_ts: now,
                            },
                        );
                    }
                }
                Ok(true)
            })
            .await
            .map(|_| ())
    }

    /// Removes this instance from the ring.
    pub async fn unregister(&self) -> Result<()> {
        let config = self.config.clone();
        self.store
            .cas(|desc| Ok(desc.remove_instance(&config.instance_id)))
            .await?;

        let mut local = self
            .local
            .write()
            .map_err(|_| Error::Internal("lock poisoned".into()))?;
        local.registered = false;
        local.state = None;
        tracing::info!(instance_id = %config.instance_id, "left the ring");
        Ok(())
    }
}
