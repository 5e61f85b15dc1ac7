//! # vigil-ring
//!
//! Consistent-hash ring membership for the Vigil fleet.
//!
//! The ring is a single JSON descriptor replicated through a CAS-capable
//! key/value store (see [`vigil_core::storage::KvBackend`]). Each instance
//! runs a [`lifecycler::Lifecycler`] that registers the instance, heartbeats,
//! auto-forgets dead peers and deregisters on shutdown. Tenant ownership is
//! computed with [`sharding::owners_of`]: a clockwise token walk collecting
//! distinct healthy owners up to the replication factor.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod desc;
pub mod lifecycler;
pub mod sharding;
pub mod store;

pub use desc::{InstanceDesc, InstanceState, RING_NUM_TOKENS, RingDesc};
pub use lifecycler::{Lifecycler, LifecyclerConfig, RING_AUTO_FORGET_UNHEALTHY_PERIODS};
pub use sharding::{Owner, owners_of, replica_position, tenant_token};
pub use store::{RING_KEY, RingStore};
