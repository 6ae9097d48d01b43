use crate::backend::Backend;
use anyhow::Result;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{self, Instant};

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// In-process key-value store with per-entry TTL.
///
/// Clones share the same map. Expired entries are dropped lazily on read and by
/// [`MemoryBackend::purge_expired`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// Drops every expired entry and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();

        entries.retain(|_, entry| !entry.is_expired(now));

        before - entries.len()
    }

    /// Periodically purges expired entries until the returned function is called.
    pub fn start_sweeper(&self, interval: Duration) -> impl FnOnce() + Send + use<> {
        let store = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);

            loop {
                ticker.tick().await;

                let purged = store.purge_expired().await;
                if purged > 0 {
                    debug!("purged {purged} expired entries");
                }
            }
        });

        let close_function = move || {
            task.abort();
            info!("MemoryBackend sweeper stopped");
        };

        info!("MemoryBackend sweeper started");

        close_function
    }
}

impl Backend for MemoryBackend {
    async fn ping(&self) -> Result<bool> {
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();

        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: drop it unless a writer replaced it in the meantime
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }

        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let entry = Entry {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };

        self.entries.write().await.insert(key.to_string(), entry);

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Shared with the server's internal store endpoints, so the data stays.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() -> Result<()> {
        let store = MemoryBackend::new();

        assert_eq!(store.get("missing").await?, None);

        store
            .set_with_ttl("user:1", b"alice".to_vec(), Duration::from_secs(60))
            .await?;
        assert_eq!(store.get("user:1").await?, Some(b"alice".to_vec()));

        store
            .set_with_ttl("user:1", b"bob".to_vec(), Duration::from_secs(60))
            .await?;
        assert_eq!(store.get("user:1").await?, Some(b"bob".to_vec()));

        store.delete("user:1").await?;
        assert_eq!(store.get("user:1").await?, None);

        // Deleting twice is fine
        store.delete("user:1").await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_entries_expire() -> Result<()> {
        let store = MemoryBackend::new();

        store
            .set_with_ttl("short", b"1".to_vec(), Duration::from_millis(30))
            .await?;
        store
            .set_with_ttl("long", b"2".to_vec(), Duration::from_secs(60))
            .await?;
        assert_eq!(store.len().await, 2);

        time::sleep(Duration::from_millis(60)).await;

        assert_eq!(store.get("short").await?, None);
        assert_eq!(store.get("long").await?, Some(b"2".to_vec()));
        assert_eq!(store.len().await, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_purge_expired() -> Result<()> {
        let store = MemoryBackend::new();

        for i in 0..5 {
            store
                .set_with_ttl(&format!("k{i}"), vec![i], Duration::ZERO)
                .await?;
        }
        store
            .set_with_ttl("kept", vec![9], Duration::from_secs(60))
            .await?;

        assert_eq!(store.purge_expired().await, 5);
        assert_eq!(store.purge_expired().await, 0);
        assert_eq!(store.len().await, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_sweeper_outlives_the_handle_it_started_from() -> Result<()> {
        let store = MemoryBackend::new();
        let stop_sweeper = store.start_sweeper(Duration::from_millis(20));

        // The stop function doesn't borrow the store it came from
        let owned = vec![store];
        let store = owned[0].clone();

        store
            .set_with_ttl("stale", vec![1], Duration::ZERO)
            .await?;
        store
            .set_with_ttl("fresh", vec![2], Duration::from_secs(60))
            .await?;

        for _ in 0..50 {
            if store.entries.read().await.len() == 1 {
                break;
            }
            time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(store.entries.read().await.len(), 1);
        assert_eq!(store.get("fresh").await?, Some(vec![2]));

        let stopper = tokio::spawn(async move { stop_sweeper() });
        stopper.await?;
        drop(owned);

        Ok(())
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_never_expires() -> Result<()> {
        let store = MemoryBackend::new();

        store
            .set_with_ttl("forever", b"x".to_vec(), Duration::from_secs(u64::MAX))
            .await?;
        store
            .set_with_ttl("max", b"y".to_vec(), Duration::MAX)
            .await?;

        assert_eq!(store.get("forever").await?, Some(b"x".to_vec()));
        assert_eq!(store.get("max").await?, Some(b"y".to_vec()));
        assert_eq!(store.purge_expired().await, 0);
        assert_eq!(store.len().await, 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_clones_share_state() -> Result<()> {
        let store = MemoryBackend::new();
        let other = store.clone();

        store
            .set_with_ttl("shared", b"x".to_vec(), Duration::from_secs(60))
            .await?;

        assert_eq!(other.get("shared").await?, Some(b"x".to_vec()));
        assert!(other.ping().await?);

        Ok(())
    }
}
