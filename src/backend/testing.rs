// Test doubles for exercising routing and health logic without a network.

use crate::backend::{Backend, BackendConnector, memory::MemoryBackend};
use crate::collab::node::{NodeConfig, NodeId};
use anyhow::{Result, bail};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Faults {
    unreachable: AtomicBool,
    unresponsive: AtomicBool,
    stalled: AtomicBool,
    closed: AtomicBool,
    writes: AtomicUsize,
}

/// A [`MemoryBackend`] with switchable failure modes. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct TestBackend {
    store: MemoryBackend,
    faults: Arc<Faults>,
}

impl TestBackend {
    /// Every call fails as if the connection were refused.
    pub fn set_unreachable(&self, value: bool) {
        self.faults.unreachable.store(value, Ordering::SeqCst);
    }

    /// Pings answer `false` without an error.
    pub fn set_unresponsive(&self, value: bool) {
        self.faults.unresponsive.store(value, Ordering::SeqCst);
    }

    /// Every call hangs forever.
    pub fn set_stalled(&self, value: bool) {
        self.faults.stalled.store(value, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.faults.closed.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.faults.writes.load(Ordering::SeqCst)
    }

    /// Reads the underlying store, bypassing any injected fault.
    pub async fn stored(&self, key: &str) -> Option<Vec<u8>> {
        self.store.get(key).await.ok().flatten()
    }

    async fn inject_faults(&self) -> Result<()> {
        if self.faults.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if self.faults.unreachable.load(Ordering::SeqCst) {
            bail!("connection refused");
        }

        Ok(())
    }
}

impl Backend for TestBackend {
    async fn ping(&self) -> Result<bool> {
        self.inject_faults().await?;
        Ok(!self.faults.unresponsive.load(Ordering::SeqCst))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inject_faults().await?;
        self.store.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.inject_faults().await?;
        self.faults.writes.fetch_add(1, Ordering::SeqCst);
        self.store.set_with_ttl(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inject_faults().await?;
        self.store.delete(key).await
    }

    async fn close(&self) -> Result<()> {
        self.faults.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out one shared [`TestBackend`] per node id so tests can flip faults after connecting.
#[derive(Debug, Default)]
pub struct TestConnector {
    backends: Mutex<HashMap<NodeId, TestBackend>>,
    refused: HashSet<NodeId>,
}

impl TestConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `connect` fail for `id`.
    pub fn refuse(mut self, id: NodeId) -> Self {
        self.refused.insert(id);
        self
    }

    pub fn backend(&self, id: &NodeId) -> TestBackend {
        self.backends
            .lock()
            .unwrap()
            .entry(id.clone())
            .or_default()
            .clone()
    }
}

impl BackendConnector for TestConnector {
    type Backend = TestBackend;

    async fn connect(&self, node: &NodeConfig) -> Result<TestBackend> {
        if self.refused.contains(&node.id) {
            bail!("cannot construct backend for {}", node.id);
        }

        Ok(self.backend(&node.id))
    }
}
