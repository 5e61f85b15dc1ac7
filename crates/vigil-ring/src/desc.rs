//! Ring descriptor model.
//!
//! The descriptor is a single JSON document in the ring KV store mapping
//! instance IDs to their address, tokens, state and heartbeat. Token sets
//! across healthy ACTIVE instances partition the 32-bit token space; LEAVING
//! instances are still owners (for token transfer), PENDING/JOINING are not
//! yet owners.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Number of tokens each instance claims on the ring.
pub const RING_NUM_TOKENS: usize = 128;

/// Lifecycle state of a ring member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceState {
    /// Registered but not yet joining (no tokens).
    Pending,
    /// Running the initial sync; not yet an owner.
    Joining,
    /// Fully joined; owns its token ranges.
    Active,
    /// Shutting down; still an owner for token transfer.
    Leaving,
}

impl InstanceState {
    /// Whether instances in this state own tenants.
    #[must_use]
    pub fn is_owner(self) -> bool {
        matches!(self, Self::Active | Self::Leaving)
    }
}

/// One ring member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDesc {
    /// Address peers dial for replication RPCs.
    pub addr: String,
    /// Tokens claimed on the ring, kept sorted.
    pub tokens: Vec<u32>,
    /// Lifecycle state.
    pub state: InstanceState,
    /// Last heartbeat timestamp.
    pub heartbeat_ts: DateTime<Utc>,
    /// When the instance first registered.
    pub registered_ts: DateTime<Utc>,
}

impl InstanceDesc {
    /// Whether the instance's heartbeat is fresh enough to be considered
    /// healthy.
    #[must_use]
    pub fn is_healthy(&self, heartbeat_timeout: Duration, now: DateTime<Utc>) -> bool {
        now - self.heartbeat_ts <= heartbeat_timeout
    }
}

/// The full ring descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingDesc {
    /// Instances keyed by instance ID.
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceDesc>,
}

impl RingDesc {
    /// Returns true when no instances are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Adds or replaces an instance.
    pub fn upsert_instance(&mut self, instance_id: &str, desc: InstanceDesc) {
        self.instances.insert(instance_id.to_string(), desc);
    }

    /// Removes an instance. Returns true when it was present.
    pub fn remove_instance(&mut self, instance_id: &str) -> bool {
        self.instances.remove(instance_id).is_some()
    }

    /// All `(token, instance_id)` pairs sorted by token.
    #[must_use]
    pub fn sorted_tokens(&self) -> Vec<(u32, &str)> {
        let mut tokens: Vec<(u32, &str)> = self
            .instances
            .iter()
            .flat_map(|(id, desc)| desc.tokens.iter().map(move |t| (*t, id.as_str())))
            .collect();
        tokens.sort_unstable();
        tokens
    }

    /// Generates `count` fresh tokens avoiding collisions with every token
    /// already present in the descriptor and in `extra_taken`.
    #[must_use]
    pub fn generate_tokens(&self, count: usize, extra_taken: &[u32]) -> Vec<u32> {
        let mut taken: HashSet<u32> = self
            .instances
            .values()
            .flat_map(|d| d.tokens.iter().copied())
            .collect();
        taken.extend(extra_taken.iter().copied());

        let mut rng = rand::thread_rng();
        let mut tokens = Vec::with_capacity(count);
        while tokens.len() < count {
            let candidate: u32 = rng.gen();
            if taken.insert(candidate) {
                tokens.push(candidate);
            }
        }
        tokens.sort_unstable();
        tokens
    }

    /// Computes the ownership fingerprint of the ring.
    ///
    /// The fingerprint covers `(instance_id, addr, state, tokens)` of healthy
    /// instances only, in ID order. It changes exactly when ownership could
    /// change: membership of healthy instances, their tokens, their state, or
    /// a healthy/unhealthy transition. Pure heartbeat refreshes, and the
    /// removal of a peer that was already unhealthy, leave it unchanged.
    #[must_use]
    pub fn ownership_fingerprint(&self, heartbeat_timeout: Duration, now: DateTime<Utc>) -> u64 {
        let mut hasher = DefaultHasher::new();
        for (id, desc) in &self.instances {
            if !desc.is_healthy(heartbeat_timeout, now) {
                continue;
            }
            id.hash(&mut hasher);
            desc.addr.hash(&mut hasher);
            desc.state.hash(&mut hasher);
            desc.tokens.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Addresses of all registered instances, for replication-client pool
    /// eviction.
    #[must_use]
    pub fn instance_addrs(&self) -> HashSet<String> {
        self.instances.values().map(|d| d.addr.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(tokens: Vec<u32>, state: InstanceState, heartbeat_ts: DateTime<Utc>) -> InstanceDesc {
        InstanceDesc {
            addr: "127.0.0.1".to_string(),
            tokens,
            state,
            heartbeat_ts,
            registered_ts: heartbeat_ts,
        }
    }

    #[test]
    fn generated_tokens_are_unique_and_sorted() {
        let mut ring = RingDesc::default();
        let now = Utc::now();
        ring.upsert_instance("a", desc(vec![1, 2, 3], InstanceState::Active, now));

        let tokens = ring.generate_tokens(RING_NUM_TOKENS, &[]);
        assert_eq!(tokens.len(), RING_NUM_TOKENS);
        let unique: HashSet<u32> = tokens.iter().copied().collect();
        assert_eq!(unique.len(), RING_NUM_TOKENS);
        assert!(tokens.windows(2).all(|w| w[0] < w[1]));
        assert!(!tokens.contains(&1));
    }

    #[test]
    fn fingerprint_stable_under_heartbeat_refresh() {
        let now = Utc::now();
        let timeout = Duration::minutes(1);

        let mut ring = RingDesc::default();
        ring.upsert_instance("a", desc(vec![1, 2, 3], InstanceState::Active, now));
        ring.upsert_instance("b", desc(vec![4, 5, 6], InstanceState::Active, now));
        let before = ring.ownership_fingerprint(timeout, now);

        // Refresh a heartbeat only.
        if let Some(b) = ring.instances.get_mut("b") {
            b.heartbeat_ts = now + Duration::seconds(1);
        }
        assert_eq!(before, ring.ownership_fingerprint(timeout, now));
    }

    #[test]
    fn fingerprint_changes_on_membership_state_and_health() {
        let now = Utc::now();
        let timeout = Duration::minutes(1);

        let mut ring = RingDesc::default();
        ring.upsert_instance("a", desc(vec![1, 2, 3], InstanceState::Active, now));
        let base = ring.ownership_fingerprint(timeout, now);

        // New instance joins.
        ring.upsert_instance("b", desc(vec![4, 5, 6], InstanceState::Joining, now));
        let with_joining = ring.ownership_fingerprint(timeout, now);
        assert_ne!(base, with_joining);

        // State flip changes the fingerprint.
        if let Some(b) = ring.instances.get_mut("b") {
            b.state = InstanceState::Active;
        }
        let with_active = ring.ownership_fingerprint(timeout, now);
        assert_ne!(with_joining, with_active);

        // Healthy instance going stale changes the fingerprint.
        if let Some(b) = ring.instances.get_mut("b") {
            b.heartbeat_ts = now - Duration::hours(1);
        }
        let with_stale = ring.ownership_fingerprint(timeout, now);
        assert_ne!(with_active, with_stale);
        assert_eq!(base, with_stale);

        // Removing the already-unhealthy instance does not change it again.
        ring.remove_instance("b");
        assert_eq!(with_stale, ring.ownership_fingerprint(timeout, now));
    }
}
