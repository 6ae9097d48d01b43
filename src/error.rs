use thiserror::Error;

/// Failures surfaced by cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The ring is empty or the key's owner is failed.
    #[error("no available node for the requested key")]
    NoAvailableNode,

    /// The owning node's backend failed.
    #[error("backend error: {0:#}")]
    Backend(anyhow::Error),

    /// The value couldn't be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
