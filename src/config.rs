use crate::collab::ring::DEFAULT_VIRTUAL_NODES_PER_WEIGHT_UNIT;
use crate::eager_env;
use std::time::Duration;

/// Tuning knobs of a [`crate::cache::CacheOrchestrator`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when a caller doesn't pass one.
    pub default_ttl: Duration,
    pub health_check_interval: Duration,
    /// Ceiling on a single ping; exceeding it counts as a hard failure.
    pub probe_timeout: Duration,
    /// How long a node may stay failed before it's taken off the ring.
    pub failed_node_eviction_after: Duration,
    /// Reserved. Reads are served by the key's owner only and never retried elsewhere.
    pub max_retries: u32,
    /// Virtual nodes for a node of weight 100.
    pub virtual_nodes_per_weight_unit: u32,
    pub replication_workers: usize,
    pub replication_timeout: Duration,
    pub shutdown_grace_period: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            health_check_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(1),
            failed_node_eviction_after: Duration::from_secs(300),
            max_retries: 3,
            virtual_nodes_per_weight_unit: DEFAULT_VIRTUAL_NODES_PER_WEIGHT_UNIT,
            replication_workers: 16,
            replication_timeout: Duration::from_secs(5),
            shutdown_grace_period: Duration::from_secs(5),
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            default_ttl: Duration::from_secs(*eager_env::DEFAULT_TTL_SECONDS),
            health_check_interval: Duration::from_secs(*eager_env::HEALTH_CHECK_INTERVAL_SECONDS),
            probe_timeout: Duration::from_millis(*eager_env::PROBE_TIMEOUT_MILLIS),
            failed_node_eviction_after: Duration::from_secs(
                *eager_env::FAILED_NODE_EVICTION_SECONDS,
            ),
            max_retries: *eager_env::MAX_RETRIES,
            virtual_nodes_per_weight_unit: *eager_env::VIRTUAL_NODES_PER_WEIGHT_UNIT,
            replication_workers: *eager_env::REPLICATION_WORKERS,
            replication_timeout: Duration::from_millis(*eager_env::REPLICATION_TIMEOUT_MILLIS),
            shutdown_grace_period: Duration::from_secs(*eager_env::SHUTDOWN_GRACE_SECONDS),
        }
    }
}
