//! Storage backends a cache node can sit on top of.
//!
//! The orchestrator only ever talks to [`Backend`]; which store is behind it (another ringcache
//! process over HTTP, the in-process map, a test double) is decided by a [`BackendConnector`].

pub mod http;
pub mod memory;
#[cfg(test)]
pub mod testing;

use crate::backend::{
    http::{HttpBackend, HttpConnector},
    memory::MemoryBackend,
};
use crate::collab::node::{NodeConfig, NodeId};
use anyhow::Result;
use std::time::Duration;

pub trait Backend: Send + Sync + 'static {
    /// `Ok(false)` means the store answered but isn't ready; `Err` means it couldn't be reached.
    fn ping(&self) -> impl Future<Output = Result<bool>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

pub trait BackendConnector: Send + Sync {
    type Backend: Backend;

    fn connect(&self, node: &NodeConfig) -> impl Future<Output = Result<Self::Backend>> + Send;
}

/// Backend used by the server: this process's own store, or a peer reached over HTTP.
#[derive(Debug, Clone)]
pub enum NodeBackend {
    Local(MemoryBackend),
    Remote(HttpBackend),
}

impl Backend for NodeBackend {
    async fn ping(&self) -> Result<bool> {
        match self {
            NodeBackend::Local(backend) => backend.ping().await,
            NodeBackend::Remote(backend) => backend.ping().await,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self {
            NodeBackend::Local(backend) => backend.get(key).await,
            NodeBackend::Remote(backend) => backend.get(key).await,
        }
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        match self {
            NodeBackend::Local(backend) => backend.set_with_ttl(key, value, ttl).await,
            NodeBackend::Remote(backend) => backend.set_with_ttl(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            NodeBackend::Local(backend) => backend.delete(key).await,
            NodeBackend::Remote(backend) => backend.delete(key).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            NodeBackend::Local(backend) => backend.close().await,
            NodeBackend::Remote(backend) => backend.close().await,
        }
    }
}

/// Serves the node matching `local_id` from the in-process store and every other node over HTTP.
pub struct NodeConnector {
    local_id: NodeId,
    local_store: MemoryBackend,
    http: HttpConnector,
}

impl NodeConnector {
    pub fn new(local_id: NodeId, local_store: MemoryBackend, http: HttpConnector) -> Self {
        Self {
            local_id,
            local_store,
            http,
        }
    }
}

impl BackendConnector for NodeConnector {
    type Backend = NodeBackend;

    async fn connect(&self, node: &NodeConfig) -> Result<NodeBackend> {
        if node.id == self.local_id {
            return Ok(NodeBackend::Local(self.local_store.clone()));
        }

        Ok(NodeBackend::Remote(self.http.connect(node).await?))
    }
}
