use crate::backend::Backend;
use crate::collab::node::{CacheNode, NodeId, NodeStatus};
use crate::collab::ring::SharedRing;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::{sync::Arc, time::Duration};
use tokio::time;

/// Ring changes decided by one reconciliation pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MembershipChange {
    pub evicted: Vec<NodeId>,
    pub readmitted: Vec<NodeId>,
}

impl MembershipChange {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.readmitted.is_empty()
    }
}

/// Keeps ring membership in line with node health.
///
/// Failed nodes stay on the ring (and are skipped by routing) until they've been failed for
/// `eviction_after`; then their positions are removed. Evicted nodes are put back once they
/// probe healthy again.
pub struct MembershipManager<B: Backend> {
    ring: Arc<SharedRing<CacheNode<B>>>,
    nodes: Arc<Vec<Arc<CacheNode<B>>>>,
    eviction_after: Duration,
}

impl<B: Backend> MembershipManager<B> {
    pub fn new(
        ring: Arc<SharedRing<CacheNode<B>>>,
        nodes: Arc<Vec<Arc<CacheNode<B>>>>,
        eviction_after: Duration,
    ) -> Self {
        Self {
            ring,
            nodes,
            eviction_after,
        }
    }

    pub fn reconcile(&self, now: DateTime<Utc>) -> MembershipChange {
        let snapshot = self.ring.snapshot();
        let mut evict = Vec::new();
        let mut readmit = Vec::new();

        for node in self.nodes.iter() {
            let on_ring = snapshot.contains(node.id());

            match node.status() {
                NodeStatus::Failed if on_ring => {
                    if node
                        .failed_for(now)
                        .is_some_and(|failed_for| failed_for >= self.eviction_after)
                    {
                        evict.push(node.clone());
                    }
                }
                NodeStatus::Healthy if !on_ring => readmit.push(node.clone()),
                _ => {}
            }
        }

        let change = MembershipChange {
            evicted: evict.iter().map(|node| node.id().clone()).collect(),
            readmitted: readmit.iter().map(|node| node.id().clone()).collect(),
        };

        if change.is_empty() {
            return change;
        }

        self.ring.update(|ring| {
            for node in &evict {
                ring.remove_node(node.id());
            }
            for node in readmit {
                ring.add_node(node);
            }
        });

        for id in &change.evicted {
            warn!(
                "evicted node {id} from the ring after being failed for over {:?}",
                self.eviction_after
            );
        }
        for id in &change.readmitted {
            info!("readmitted recovered node {id} to the ring");
        }

        change
    }

    pub fn start(self, interval: Duration) -> impl FnOnce() + Send + 'static {
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);

            loop {
                ticker.tick().await;
                self.reconcile(Utc::now());
            }
        });

        let close_function = move || {
            task.abort();
            info!("MembershipManager stopped");
        };

        info!("MembershipManager started");

        close_function
    }
}
