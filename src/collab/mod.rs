//! Consistent hashing over a pool of cache nodes.
//!
//! Every node is hashed onto a u64 ring at `virtual_nodes_per_weight_unit * weight / 100`
//! positions. A key belongs to the first position at or after its own hash, wrapping around.
//! Removing a node only hands its own positions to their clockwise neighbours, so roughly 1/N
//! of the keys move and they spread over all survivors.
//!
//! Health is tracked per node by the [`health::HealthMonitor`]. Failed nodes keep their ring
//! positions for a while (routing skips them); [`membership::MembershipManager`] evicts them
//! once they stay failed past a ceiling and puts them back when they recover.

pub mod health;
pub mod membership;
pub mod node;
pub mod ring;

pub use node::{CacheNode, NodeConfig, NodeId, NodeStatus};
pub use ring::{HashRing, SharedRing};
