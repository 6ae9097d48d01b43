pub mod metrics;
pub mod replication;


use crate::backend::{Backend, BackendConnector};
use crate::cache::{
    metrics::{MetricsCollector, MetricsSnapshot},
    replication::ReplicationPool,
};
use crate::collab::{
    CacheNode, HashRing, NodeConfig, NodeId, NodeStatus, SharedRing,
    health::{HealthMonitor, initial_probe},
    membership::MembershipManager,
};
use crate::config::CacheConfig;
use crate::error::CacheError;
use anyhow::{Context, bail};
use futures::future::join_all;
use itertools::Itertools;
use log::{debug, error, info, warn};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time;

/// Prefix of the key a value's replica is stored under.
pub const BACKUP_KEY_PREFIX: &str = "backup:";

pub fn backup_key(key: &str) -> String {
    format!("{BACKUP_KEY_PREFIX}{key}")
}

type StopFn = Box<dyn FnOnce() + Send>;

/// Routes cache operations to the node owning each key.
///
/// Reads and writes go to the owner only. After a successful write a copy is pushed under
/// [`backup_key`] to the next healthy node clockwise, in the background.
pub struct CacheOrchestrator<B: Backend> {
    config: CacheConfig,
    nodes: Arc<Vec<Arc<CacheNode<B>>>>,
    ring: Arc<SharedRing<CacheNode<B>>>,
    health: HealthMonitor<B>,
    stop_membership: Mutex<Option<StopFn>>,
    replication: ReplicationPool,
    metrics: Arc<MetricsCollector>,
}

impl<B: Backend> CacheOrchestrator<B> {
    /// Connects to every node, probes each once and starts the background loops.
    ///
    /// Nodes that fail the first probe still join the ring as failed. Only fails when no node
    /// could be connected at all.
    pub async fn initialize<C>(
        config: CacheConfig,
        connector: &C,
        nodes: &[NodeConfig],
    ) -> anyhow::Result<Self>
    where
        C: BackendConnector<Backend = B>,
    {
        let unique_nodes: Vec<&NodeConfig> = nodes.iter().unique_by(|node| &node.id).collect();

        let (connected, failures): (Vec<_>, Vec<_>) =
            join_all(unique_nodes.iter().map(|node| async move {
                connector
                    .connect(node)
                    .await
                    .map(|backend| Arc::new(CacheNode::new(node, backend)))
                    .with_context(|| format!("failed to connect to node {}", node.id))
            }))
            .await
            .into_iter()
            .partition_result();

        for failure in &failures {
            error!("{failure:#}");
        }

        if connected.is_empty() {
            bail!(
                "none of the {} configured cache nodes could be connected",
                unique_nodes.len()
            );
        }

        let healthy = join_all(
            connected
                .iter()
                .map(|node| initial_probe(node, config.probe_timeout)),
        )
        .await
        .into_iter()
        .filter(|healthy| *healthy)
        .count();

        let mut ring = HashRing::new(config.virtual_nodes_per_weight_unit);
        for node in &connected {
            ring.add_node(node.clone());
        }

        info!(
            "cache ring built with {} nodes ({healthy} healthy) and {} positions",
            ring.node_count(),
            ring.position_count()
        );

        if config.max_retries > 0 {
            debug!(
                "max_retries={} is reserved, reads are served by the owner only",
                config.max_retries
            );
        }

        let nodes = Arc::new(connected);
        let ring = Arc::new(SharedRing::new(ring));

        let health = HealthMonitor::new(
            nodes.clone(),
            config.health_check_interval,
            config.probe_timeout,
        );
        health.start().await;

        let stop_membership = MembershipManager::new(
            ring.clone(),
            nodes.clone(),
            config.failed_node_eviction_after,
        )
        .start(config.health_check_interval);

        Ok(Self {
            replication: ReplicationPool::new(config.replication_workers),
            config,
            nodes,
            ring,
            health,
            stop_membership: Mutex::new(Some(Box::new(stop_membership))),
            metrics: Arc::new(MetricsCollector::new()),
        })
    }

    /// Owner of `key` if it can take traffic. Counts an error otherwise.
    fn route(&self, key: &str) -> Result<Arc<CacheNode<B>>, CacheError> {
        let ring = self.ring.snapshot();

        match ring.node_for(key) {
            Some(node) if node.is_routable() => Ok(node.clone()),
            Some(node) => {
                debug!("owner {} of '{key}' is failed", node.id());
                self.metrics.record_error();
                Err(CacheError::NoAvailableNode)
            }
            None => {
                self.metrics.record_error();
                Err(CacheError::NoAvailableNode)
            }
        }
    }

    /// First healthy node after `primary` in ring order.
    fn replica_for(&self, key: &str, primary: &NodeId) -> Option<Arc<CacheNode<B>>> {
        self.ring
            .snapshot()
            .successors(key)
            .into_iter()
            .find(|node| node.id() != primary && node.status() == NodeStatus::Healthy)
            .cloned()
    }

    fn backend_error(
        &self,
        error: anyhow::Error,
        operation: &str,
        key: &str,
        node: &NodeId,
    ) -> CacheError {
        self.metrics.record_error();
        CacheError::Backend(error.context(format!("{operation} '{key}' on {node}")))
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.metrics.record_request();
        let node = self.route(key)?;

        match node.backend().get(key).await {
            Ok(Some(value)) => {
                self.metrics.record_hit();
                Ok(Some(value))
            }
            Ok(None) => {
                self.metrics.record_miss();
                Ok(None)
            }
            Err(e) => Err(self.backend_error(e, "get", key, node.id())),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(bytes) = self.get_bytes(key).await? else {
            return Ok(None);
        };

        let value = serde_json::from_slice(&bytes).inspect_err(|e| {
            warn!("cached value of '{key}' isn't valid for the requested type: {e}");
            self.metrics.record_error();
        })?;

        Ok(Some(value))
    }

    pub async fn set_bytes(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.metrics.record_request();
        let node = self.route(key)?;

        self.store(node, key, value, ttl).await
    }

    /// Stores `value` as JSON. `ttl` falls back to the configured default.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.metrics.record_request();
        let node = self.route(key)?;

        let value = serde_json::to_vec(value).inspect_err(|_| self.metrics.record_error())?;

        self.store(node, key, value, ttl).await
    }

    async fn store(
        &self,
        node: Arc<CacheNode<B>>,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let replica = self.replica_for(key, node.id());

        let replica_value = replica.as_ref().map(|_| value.clone());

        node.backend()
            .set_with_ttl(key, value, ttl)
            .await
            .map_err(|e| self.backend_error(e, "set", key, node.id()))?;

        if let (Some(replica), Some(value)) = (replica, replica_value) {
            self.replicate_set(replica, key, value, ttl);
        }

        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.metrics.record_request();
        let node = self.route(key)?;

        node.backend()
            .delete(key)
            .await
            .map_err(|e| self.backend_error(e, "delete", key, node.id()))?;

        if let Some(replica) = self.replica_for(key, node.id()) {
            self.replicate_delete(replica, key);
        }

        Ok(())
    }

    fn replicate_set(
        &self,
        replica: Arc<CacheNode<B>>,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) {
        let backup_key = backup_key(key);
        let description = format!("replication of '{backup_key}' to {}", replica.id());

        self.submit_replication(description, async move {
            replica
                .backend()
                .set_with_ttl(&backup_key, value, ttl)
                .await
        });
    }

    fn replicate_delete(&self, replica: Arc<CacheNode<B>>, key: &str) {
        let backup_key = backup_key(key);
        let description = format!("deletion of '{backup_key}' on {}", replica.id());

        self.submit_replication(description, async move {
            replica.backend().delete(&backup_key).await
        });
    }

    fn submit_replication<F>(&self, description: String, write: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let metrics = self.metrics.clone();
        let timeout = self.config.replication_timeout;
        let task_description = description.clone();

        let accepted = self.replication.submit(description, async move {
            match time::timeout(timeout, write).await {
                Ok(Ok(())) => debug!("completed {task_description}"),
                Ok(Err(e)) => {
                    warn!("{task_description} failed: {e:#}");
                    metrics.record_replication_failure();
                }
                Err(_) => {
                    warn!("{task_description} timed out after {timeout:?}");
                    metrics.record_replication_failure();
                }
            }
        });

        if !accepted {
            self.metrics.record_replication_failure();
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.health.healthy_count())
    }

    pub fn node_statuses(&self) -> Vec<(NodeId, NodeStatus)> {
        self.nodes
            .iter()
            .map(|node| (node.id().clone(), node.status()))
            .collect()
    }

    /// Stops background work, gives replication a grace period and closes every backend.
    pub async fn shutdown(&self) {
        self.health.stop().await;

        let stop_membership = self
            .stop_membership
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(stop) = stop_membership {
            stop();
        }

        let abandoned = self
            .replication
            .drain(self.config.shutdown_grace_period)
            .await;
        if abandoned > 0 {
            warn!("{abandoned} replication tasks were abandoned during shutdown");
        }

        let results = join_all(
            self.nodes
                .iter()
                .map(|node| async move { (node.id(), node.backend().close().await) }),
        )
        .await;

        for (id, result) in results {
            if let Err(e) = result {
                error!("failed to close backend of {id}: {e:#}");
            }
        }

        info!("cache orchestrator shut down");
    }
}
