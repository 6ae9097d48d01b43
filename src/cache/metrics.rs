use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use utoipa::ToSchema;

/// Request counters of one orchestrator. Counters only ever grow.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    total_requests: AtomicU64,
    replication_failures: AtomicU64,
}

/// Point-in-time copy of the counters with derived rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub total_requests: u64,
    pub replication_failures: u64,
    /// `hits / total_requests`, 0 before the first request
    pub hit_rate: f64,
    /// `errors / total_requests`, 0 before the first request
    pub error_rate: f64,
    pub healthy_node_count: usize,
}

fn rate(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replication_failure(&self) {
        self.replication_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, healthy_node_count: usize) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let total_requests = self.total_requests.load(Ordering::Relaxed);

        MetricsSnapshot {
            hits,
            misses,
            errors,
            total_requests,
            replication_failures: self.replication_failures.load(Ordering::Relaxed),
            hit_rate: rate(hits, total_requests),
            error_rate: rate(errors, total_requests),
            healthy_node_count,
        }
    }
}
