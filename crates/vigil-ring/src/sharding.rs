//! Tenant ownership: hashing tenants onto the ring and walking it.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::desc::RingDesc;

/// One owner of a tenant, in replica order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    /// Instance ID of the owner.
    pub instance_id: String,
    /// Address peers dial for replication.
    pub addr: String,
}

/// Hashes a tenant ID into the 32-bit token space (FNV-1a).
#[must_use]
pub fn tenant_token(tenant_id: &str) -> u32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let mut hash = FNV_OFFSET;
    for byte in tenant_id.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Computes the ordered owners of a tenant.
///
/// The tenant hashes into the token space and the ring is walked clockwise,
/// collecting distinct instances until `replication_factor` owners are found.
/// The order defines the replica position: `owners[0]` is position 0.
///
/// An instance that is unhealthy, or not in an owner state (PENDING/JOINING),
/// is skipped, but it still consumes its slot in the walk: the next distinct
/// instance fills the position.
#[must_use]
pub fn owners_of(
    tenant_id: &str,
    ring: &RingDesc,
    replication_factor: usize,
    heartbeat_timeout: Duration,
    now: DateTime<Utc>,
) -> Vec<Owner> {
    let tokens = ring.sorted_tokens();
    if tokens.is_empty() || replication_factor == 0 {
        return Vec::new();
    }

    let target = tenant_token(tenant_id);
    let start = tokens.partition_point(|(t, _)| *t < target);

    let mut owners = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for i in 0..tokens.len() {
        let (_, instance_id) = tokens[(start + i) % tokens.len()];
        if !seen.insert(instance_id) {
            continue;
        }

        let Some(desc) = ring.instances.get(instance_id) else {
            continue;
        };
        if desc.state.is_owner() && desc.is_healthy(heartbeat_timeout, now) {
            owners.push(Owner {
                instance_id: instance_id.to_string(),
                addr: desc.addr.clone(),
            });
            if owners.len() == replication_factor {
                break;
            }
        }
    }

    owners
}

/// Returns the replica position of `instance_id` among `owners`, if any.
#[must_use]
pub fn replica_position(owners: &[Owner], instance_id: &str) -> Option<usize> {
    owners.iter().position(|o| o.instance_id == instance_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{InstanceDesc, InstanceState};

    fn instance(addr: &str, tokens: Vec<u32>, state: InstanceState) -> InstanceDesc {
        let now = Utc::now();
        InstanceDesc {
            addr: addr.to_string(),
            tokens,
            state,
            heartbeat_ts: now,
            registered_ts: now,
        }
    }

    fn timeout() -> Duration {
        Duration::minutes(1)
    }

    #[test]
    fn tenant_token_is_stable() {
        assert_eq!(tenant_token("u1"), tenant_token("u1"));
        assert_ne!(tenant_token("u1"), tenant_token("u2"));
    }

    #[test]
    fn single_instance_owns_everything() {
        let mut ring = RingDesc::default();
        ring.upsert_instance("a", instance("127.0.0.1", vec![0], InstanceState::Active));

        let owners = owners_of("u1", &ring, 3, timeout(), Utc::now());
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].instance_id, "a");
    }

    #[test]
    fn replication_factor_bounds_owner_count() {
        let mut ring = RingDesc::default();
        for (id, addr) in [("a", "127.0.0.1"), ("b", "127.0.0.2"), ("c", "127.0.0.3")] {
            let tokens = ring.generate_tokens(16, &[]);
            ring.upsert_instance(id, instance(addr, tokens, InstanceState::Active));
        }

        let owners = owners_of("u1", &ring, 2, timeout(), Utc::now());
        assert_eq!(owners.len(), 2);
        assert_ne!(owners[0].instance_id, owners[1].instance_id);
    }

    #[test]
    fn joining_instances_are_not_owners() {
        let mut ring = RingDesc::default();
        ring.upsert_instance("a", instance("127.0.0.1", vec![0], InstanceState::Active));
        ring.upsert_instance(
            "b",
            instance("127.0.0.2", vec![1, u32::MAX / 2], InstanceState::Joining),
        );

        let owners = owners_of("u1", &ring, 2, timeout(), Utc::now());
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].instance_id, "a");
    }

    #[test]
    fn leaving_instances_still_own() {
        let mut ring = RingDesc::default();
        ring.upsert_instance("a", instance("127.0.0.1", vec![0], InstanceState::Leaving));

        let owners = owners_of("u1", &ring, 1, timeout(), Utc::now());
        assert_eq!(owners.len(), 1);
    }

    #[test]
    fn unhealthy_instance_is_skipped() {
        let now = Utc::now();
        let mut ring = RingDesc::default();
        ring.upsert_instance("a", instance("127.0.0.1", vec![0], InstanceState::Active));

        let mut stale = instance("127.0.0.2", vec![1, u32::MAX / 2], InstanceState::Active);
        stale.heartbeat_ts = now - Duration::hours(1);
        ring.upsert_instance("b", stale);

        let owners = owners_of("u1", &ring, 2, timeout(), now);
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].instance_id, "a");
    }

    #[test]
    fn positions_cover_all_replicas() {
        let mut ring = RingDesc::default();
        for (id, addr) in [("a", "127.0.0.1"), ("b", "127.0.0.2"), ("c", "127.0.0.3")] {
            let tokens = ring.generate_tokens(16, &[]);
            ring.upsert_instance(id, instance(addr, tokens, InstanceState::Active));
        }

        let owners = owners_of("u1", &ring, 3, timeout(), Utc::now());
        assert_eq!(owners.len(), 3);

        let mut positions: Vec<usize> = ["a", "b", "c"]
            .iter()
            .filter_map(|id| replica_position(&owners, id))
            .collect();
        positions.sort_unstable();
        assert_eq!(positions, vec![0, 1, 2]);
    }
}
