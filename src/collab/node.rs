use crate::backend::Backend;
use crate::collab::ring::RingNode;
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::time::Duration;
use strum::{AsRefStr, Display as StrumDisplay};
use utoipa::ToSchema;

/// Weight given to nodes that don't specify one.
pub const DEFAULT_NODE_WEIGHT: u32 = 100;

/// Network identity of a cache node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub host: String,
    pub port: u16,
}

impl NodeId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .with_context(|| format!("missing port in node address '{s}'"))?;

        if host.is_empty() {
            bail!("missing host in node address '{s}'");
        }

        let port = port
            .parse()
            .with_context(|| format!("invalid port in node address '{s}'"))?;

        Ok(Self::new(host, port))
    }
}

/// Static description of a node, as supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: NodeId,
    pub weight: u32,
}

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            id: NodeId::new(host, port),
            weight,
        }
    }
}

/// Parses `host:port` or `host:port:weight`.
impl FromStr for NodeConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();

        match parts.as_slice() {
            [host, port] => Ok(Self {
                id: format!("{host}:{port}").parse()?,
                weight: DEFAULT_NODE_WEIGHT,
            }),
            [host, port, weight] => Ok(Self {
                id: format!("{host}:{port}").parse()?,
                weight: weight
                    .parse()
                    .with_context(|| format!("invalid weight in node entry '{s}'"))?,
            }),
            _ => bail!("expected 'host:port[:weight]', got '{s}'"),
        }
    }
}

/// Parses a comma-separated node list, skipping empty entries.
pub fn parse_node_list(nodes: &str) -> Result<Vec<NodeConfig>> {
    nodes
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

impl RingNode for NodeConfig {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn weight(&self) -> u32 {
        self.weight
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, StrumDisplay, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum NodeStatus {
    Healthy = 0,
    Degraded = 1,
    Failed = 2,
}

impl NodeStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => NodeStatus::Healthy,
            1 => NodeStatus::Degraded,
            _ => NodeStatus::Failed,
        }
    }
}

/// Result of a single ping against a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Ping answered positively.
    Alive,
    /// Ping completed without error but the backend reported itself not ready.
    Unresponsive,
    /// Connection error or the ping exceeded its timeout.
    Unreachable,
}

/// Status reached from `current` after observing `outcome`.
///
/// `Degraded` is only entered from `Healthy`; a soft failure on a failed node keeps it failed.
fn next_status(current: NodeStatus, outcome: ProbeOutcome) -> NodeStatus {
    match (current, outcome) {
        (_, ProbeOutcome::Alive) => NodeStatus::Healthy,
        (_, ProbeOutcome::Unreachable) => NodeStatus::Failed,
        (NodeStatus::Failed, ProbeOutcome::Unresponsive) => NodeStatus::Failed,
        (_, ProbeOutcome::Unresponsive) => NodeStatus::Degraded,
    }
}

const NEVER: i64 = i64::MIN;

fn to_millis(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    if millis == NEVER {
        None
    } else {
        DateTime::from_timestamp_millis(millis)
    }
}

/// A cache node and its backend handle.
///
/// Health fields are atomics so probing never contends with request routing.
pub struct CacheNode<B> {
    id: NodeId,
    weight: u32,
    status: AtomicU8,
    last_health_check: AtomicI64,
    failed_since: AtomicI64,
    backend: B,
}

impl<B: Backend> CacheNode<B> {
    pub fn new(config: &NodeConfig, backend: B) -> Self {
        Self {
            id: config.id.clone(),
            weight: config.weight,
            status: AtomicU8::new(NodeStatus::Healthy as u8),
            last_health_check: AtomicI64::new(NEVER),
            failed_since: AtomicI64::new(NEVER),
            backend,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_routable(&self) -> bool {
        self.status() != NodeStatus::Failed
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn last_health_check(&self) -> Option<DateTime<Utc>> {
        from_millis(self.last_health_check.load(Ordering::Acquire))
    }

    pub fn failed_since(&self) -> Option<DateTime<Utc>> {
        from_millis(self.failed_since.load(Ordering::Acquire))
    }

    /// How long the node has been failed as of `now`, or `None` if it isn't failed.
    pub fn failed_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.failed_since()
            .map(|since| (now - since).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn mark_checked(&self, at: DateTime<Utc>) {
        self.last_health_check.store(to_millis(at), Ordering::Release);
    }

    /// Whether the last check is at least `interval` old, tolerating a tenth of it for tick jitter.
    pub fn is_check_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        let Some(last) = self.last_health_check() else {
            return true;
        };

        let slack = interval / 10;
        let elapsed = now - last + ChronoDuration::from_std(slack).unwrap_or(ChronoDuration::zero());

        elapsed
            .to_std()
            .map(|elapsed| elapsed >= interval)
            .unwrap_or(false)
    }

    /// Applies a probe outcome and returns `(previous, current)`.
    pub fn record_probe(
        &self,
        outcome: ProbeOutcome,
        at: DateTime<Utc>,
    ) -> (NodeStatus, NodeStatus) {
        let mut previous = self.status();
        let mut current = next_status(previous, outcome);

        // Retry if the monitor raced with itself on the same node.
        while let Err(actual) = self.status.compare_exchange(
            previous as u8,
            current as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            previous = NodeStatus::from_u8(actual);
            current = next_status(previous, outcome);
        }

        match (previous, current) {
            (NodeStatus::Failed, NodeStatus::Failed) => {}
            (_, NodeStatus::Failed) => self.failed_since.store(to_millis(at), Ordering::Release),
            (NodeStatus::Failed, _) => self.failed_since.store(NEVER, Ordering::Release),
            _ => {}
        }

        (previous, current)
    }
}

impl<B: Backend> RingNode for CacheNode<B> {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn weight(&self) -> u32 {
        self.weight
    }
}

impl<B> std::fmt::Debug for CacheNode<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheNode")
            .field("id", &self.id)
            .field("weight", &self.weight)
            .field("status", &NodeStatus::from_u8(self.status.load(Ordering::Relaxed)))
            .finish()
    }
}
