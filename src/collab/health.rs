use crate::backend::Backend;
use crate::collab::node::{CacheNode, NodeStatus, ProbeOutcome};
use chrono::Utc;
use futures::{StreamExt, stream};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Upper bound on probes in flight during one tick.
const MAX_CONCURRENT_PROBES: usize = 16;

fn log_transition<B: Backend>(node: &CacheNode<B>, previous: NodeStatus, current: NodeStatus) {
    match (previous, current) {
        (NodeStatus::Failed, NodeStatus::Failed) => {}
        (_, NodeStatus::Failed) => error!("node {} is now FAILED (was {previous})", node.id()),
        (NodeStatus::Failed, _) => info!("node {} recovered, now {current}", node.id()),
        (NodeStatus::Healthy, NodeStatus::Degraded) => {
            warn!("node {} is DEGRADED", node.id())
        }
        (NodeStatus::Degraded, NodeStatus::Healthy) => {
            info!("node {} is HEALTHY again", node.id())
        }
        _ => {}
    }
}

async fn ping_outcome<B: Backend>(node: &CacheNode<B>, timeout: Duration) -> ProbeOutcome {
    match time::timeout(timeout, node.backend().ping()).await {
        Ok(Ok(true)) => ProbeOutcome::Alive,
        Ok(Ok(false)) => ProbeOutcome::Unresponsive,
        Ok(Err(e)) => {
            debug!("ping to {} failed: {e:#}", node.id());
            ProbeOutcome::Unreachable
        }
        Err(_) => {
            debug!("ping to {} timed out after {timeout:?}", node.id());
            ProbeOutcome::Unreachable
        }
    }
}

/// Pings `node` once and updates its health. Returns whether the node is now healthy.
pub async fn probe<B: Backend>(node: &CacheNode<B>, timeout: Duration) -> bool {
    node.mark_checked(Utc::now());

    let outcome = ping_outcome(node, timeout).await;
    let (previous, current) = node.record_probe(outcome, Utc::now());
    log_transition(node, previous, current);

    current == NodeStatus::Healthy
}

/// First contact with a freshly connected node: anything but a positive answer marks it failed.
pub async fn initial_probe<B: Backend>(node: &CacheNode<B>, timeout: Duration) -> bool {
    node.mark_checked(Utc::now());

    let outcome = match ping_outcome(node, timeout).await {
        ProbeOutcome::Alive => ProbeOutcome::Alive,
        ProbeOutcome::Unresponsive | ProbeOutcome::Unreachable => ProbeOutcome::Unreachable,
    };
    let (previous, current) = node.record_probe(outcome, Utc::now());
    log_transition(node, previous, current);

    current == NodeStatus::Healthy
}

async fn probe_due_nodes<B: Backend>(
    nodes: &[Arc<CacheNode<B>>],
    interval: Duration,
    probe_timeout: Duration,
) {
    let now = Utc::now();
    let due: Vec<Arc<CacheNode<B>>> = nodes
        .iter()
        .filter(|node| node.is_check_due(now, interval))
        .cloned()
        .collect();

    stream::iter(due)
        .for_each_concurrent(MAX_CONCURRENT_PROBES, |node| async move {
            probe(&node, probe_timeout).await;
        })
        .await;
}

/// Periodically probes every registered node and keeps its status current.
pub struct HealthMonitor<B: Backend> {
    nodes: Arc<Vec<Arc<CacheNode<B>>>>,
    interval: Duration,
    probe_timeout: Duration,
    task_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<B: Backend> HealthMonitor<B> {
    pub fn new(
        nodes: Arc<Vec<Arc<CacheNode<B>>>>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            nodes,
            interval,
            probe_timeout,
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn start(&self) {
        let mut handle = self.task_handle.lock().await;

        if handle.is_some() {
            return;
        }

        let nodes = self.nodes.clone();
        let interval = self.interval;
        let probe_timeout = self.probe_timeout;

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                probe_due_nodes(&nodes, interval, probe_timeout).await;
            }
        });

        *handle = Some(task);

        info!(
            "HealthMonitor started for {} nodes every {interval:?}",
            self.nodes.len()
        )
    }

    pub async fn stop(&self) {
        let mut handle = self.task_handle.lock().await;

        if let Some(task) = handle.take() {
            task.abort();
            info!("HealthMonitor stopped")
        }
    }

    pub fn healthy_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.status() == NodeStatus::Healthy)
            .count()
    }

    /// Probes every node right away, regardless of when it was last checked.
    #[cfg(test)]
    pub async fn probe_all(&self) {
        for node in self.nodes.iter() {
            probe(node, self.probe_timeout).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::TestBackend;
    use crate::collab::node::NodeConfig;
    use crate::utils::init_logging;
    use log::LevelFilter;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn test_node() -> (Arc<CacheNode<TestBackend>>, TestBackend) {
        let backend = TestBackend::default();
        let node = CacheNode::new(&NodeConfig::new("10.0.0.1", 6379, 100), backend.clone());
        (Arc::new(node), backend)
    }

    #[tokio::test]
    async fn test_probe_transitions() {
        init_logging(LevelFilter::Debug);
        let (node, backend) = test_node();

        assert!(probe(&node, TIMEOUT).await);
        assert_eq!(node.status(), NodeStatus::Healthy);

        backend.set_unresponsive(true);
        assert!(!probe(&node, TIMEOUT).await);
        assert_eq!(node.status(), NodeStatus::Degraded);

        backend.set_unreachable(true);
        assert!(!probe(&node, TIMEOUT).await);
        assert_eq!(node.status(), NodeStatus::Failed);

        // A soft failure doesn't lift a failed node to degraded
        backend.set_unreachable(false);
        assert!(!probe(&node, TIMEOUT).await);
        assert_eq!(node.status(), NodeStatus::Failed);

        backend.set_unresponsive(false);
        assert!(probe(&node, TIMEOUT).await);
        assert_eq!(node.status(), NodeStatus::Healthy);
    }

    #[tokio::test]
    async fn test_probe_timeout_is_hard_failure() {
        let (node, backend) = test_node();
        backend.set_stalled(true);

        let started = time::Instant::now();
        assert!(!probe(&node, TIMEOUT).await);

        assert_eq!(node.status(), NodeStatus::Failed);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_probe_always_records_check_time() {
        let (node, backend) = test_node();
        assert!(node.last_health_check().is_none());

        backend.set_unreachable(true);
        let before = Utc::now();
        probe(&node, TIMEOUT).await;

        let checked = node.last_health_check().expect("check time recorded");
        assert!(checked.timestamp_millis() >= before.timestamp_millis());
    }

    #[tokio::test]
    async fn test_initial_probe_is_strict() {
        let (node, backend) = test_node();
        backend.set_unresponsive(true);

        assert!(!initial_probe(&node, TIMEOUT).await);
        assert_eq!(node.status(), NodeStatus::Failed);

        backend.set_unresponsive(false);
        assert!(initial_probe(&node, TIMEOUT).await);
        assert_eq!(node.status(), NodeStatus::Healthy);
    }

    #[tokio::test]
    async fn test_monitor_loop_detects_failure_and_recovery() {
        let (node, backend) = test_node();
        let monitor = HealthMonitor::new(
            Arc::new(vec![node.clone()]),
            Duration::from_millis(40),
            TIMEOUT,
        );

        monitor.start().await;
        // Starting twice is a no-op
        monitor.start().await;

        backend.set_unreachable(true);
        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(node.status(), NodeStatus::Failed);
        assert_eq!(monitor.healthy_count(), 0);

        backend.set_unreachable(false);
        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(node.status(), NodeStatus::Healthy);
        assert_eq!(monitor.healthy_count(), 1);

        monitor.stop().await;

        // Stopped: further faults go unnoticed
        backend.set_unreachable(true);
        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(node.status(), NodeStatus::Healthy);
    }

    #[tokio::test]
    async fn test_loop_skips_recently_checked_nodes() {
        let (node, backend) = test_node();
        let interval = Duration::from_secs(3600);
        let monitor = HealthMonitor::new(Arc::new(vec![node.clone()]), interval, TIMEOUT);

        probe(&node, TIMEOUT).await;
        backend.set_unreachable(true);

        monitor.start().await;
        time::sleep(Duration::from_millis(100)).await;
        monitor.stop().await;

        // The immediate first tick found the node checked moments ago
        assert_eq!(node.status(), NodeStatus::Healthy);
    }
}
