use crate::backend::{Backend, BackendConnector};
use crate::collab::node::NodeConfig;
use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

/// Route prefix of the store endpoints every ringcache process exposes to its peers.
pub const INTERNAL_STORE_PATH: &str = "internal/store";
pub const INTERNAL_PING_PATH: &str = "internal/ping";

/// Builds [`HttpBackend`]s sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: Client,
    token: String,
    request_timeout: Duration,
}

impl HttpConnector {
    pub fn new(token: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            token: token.into(),
            request_timeout,
        })
    }
}

impl BackendConnector for HttpConnector {
    type Backend = HttpBackend;

    async fn connect(&self, node: &NodeConfig) -> Result<HttpBackend> {
        let base_url: Url = format!("http://{}:{}/", node.id.host, node.id.port)
            .parse()
            .with_context(|| format!("invalid address for node {}", node.id))?;

        Ok(HttpBackend {
            client: self.client.clone(),
            base_url,
            token: self.token.clone(),
            request_timeout: self.request_timeout,
        })
    }
}

/// A peer ringcache process, reached through its internal store endpoints.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    token: String,
    request_timeout: Duration,
}

impl HttpBackend {
    fn store_url(&self, key: &str) -> Result<Url> {
        let mut url = self.base_url.join(INTERNAL_STORE_PATH)?;

        url.path_segments_mut()
            .map_err(|_| anyhow!("base url {} cannot hold a path", self.base_url))?
            .push(key);

        Ok(url)
    }
}

/// TTL as sent on the wire, saturating at `u64::MAX` milliseconds.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

impl Backend for HttpBackend {
    async fn ping(&self) -> Result<bool> {
        let url = self.base_url.join(INTERNAL_PING_PATH)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            bail!(
                "ping to {} rejected with {status}, check the internal token",
                self.base_url
            );
        }

        Ok(status.is_success())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get(self.store_url(key)?)
            .bearer_auth(&self.token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.bytes().await?.to_vec())),
            status => bail!("GET '{key}' on {} returned {status}", self.base_url),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let response = self
            .client
            .put(self.store_url(key)?)
            .bearer_auth(&self.token)
            .query(&[("ttl_millis", ttl_millis(ttl))])
            .body(value)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!(
                "PUT '{key}' on {} returned {}",
                self.base_url,
                response.status()
            );
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.store_url(key)?)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            bail!("DELETE '{key}' on {} returned {status}", self.base_url);
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Connections belong to the shared pool and are dropped with it.
        debug!("closed HTTP backend {}", self.base_url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    async fn backend_for(server: &MockServer) -> Result<HttpBackend> {
        let connector = HttpConnector::new("secret", Duration::from_millis(500))?;
        connector
            .connect(&NodeConfig::new(server.host(), server.port(), 100))
            .await
    }

    #[tokio::test]
    async fn test_ping() -> Result<()> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/internal/ping")
                    .header("authorization", "Bearer secret");
                then.status(200);
            })
            .await;

        let backend = backend_for(&server).await?;
        assert!(backend.ping().await?);
        mock.assert_async().await;

        Ok(())
    }

    #[tokio::test]
    async fn test_ping_not_ready() -> Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/internal/ping");
                then.status(503);
            })
            .await;

        let backend = backend_for(&server).await?;
        assert!(!backend.ping().await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_ping_with_rejected_token_is_an_error() -> Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/internal/ping");
                then.status(401);
            })
            .await;

        let backend = backend_for(&server).await?;
        assert!(backend.ping().await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_ping_forbidden_is_an_error() -> Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/internal/ping");
                then.status(403);
            })
            .await;

        let backend = backend_for(&server).await?;
        assert!(backend.ping().await.is_err());

        Ok(())
    }

    #[test]
    fn test_ttl_millis_saturates() {
        assert_eq!(ttl_millis(Duration::from_secs(60)), 60_000);
        assert_eq!(ttl_millis(Duration::from_secs(u64::MAX)), u64::MAX);
    }

    #[tokio::test]
    async fn test_ping_unreachable() -> Result<()> {
        // Nothing listens on port 1
        let connector = HttpConnector::new("secret", Duration::from_millis(500))?;
        let backend = connector
            .connect(&NodeConfig::new("127.0.0.1", 1, 100))
            .await?;

        assert!(backend.ping().await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_get() -> Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/internal/store/backup:user:1");
                then.status(200).body("{\"name\":\"alice\"}");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/internal/store/missing");
                then.status(404);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/internal/store/broken");
                then.status(500);
            })
            .await;

        let backend = backend_for(&server).await?;

        assert_eq!(
            backend.get("backup:user:1").await?,
            Some(b"{\"name\":\"alice\"}".to_vec())
        );
        assert_eq!(backend.get("missing").await?, None);
        assert!(backend.get("broken").await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_set_with_ttl() -> Result<()> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/internal/store/session:42")
                    .query_param("ttl_millis", "60000")
                    .header("authorization", "Bearer secret")
                    .body("payload");
                then.status(204);
            })
            .await;

        let backend = backend_for(&server).await?;
        backend
            .set_with_ttl("session:42", b"payload".to_vec(), Duration::from_secs(60))
            .await?;
        mock.assert_async().await;

        Ok(())
    }

    #[tokio::test]
    async fn test_set_rejected() -> Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/internal/store/k");
                then.status(401);
            })
            .await;

        let backend = backend_for(&server).await?;
        let result = backend
            .set_with_ttl("k", b"v".to_vec(), Duration::from_secs(1))
            .await;
        assert!(result.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_delete() -> Result<()> {
        let server = MockServer::start_async().await;
        let deleted = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/internal/store/k");
                then.status(204);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/internal/store/gone");
                then.status(404);
            })
            .await;

        let backend = backend_for(&server).await?;
        backend.delete("k").await?;
        backend.delete("gone").await?;
        deleted.assert_async().await;

        Ok(())
    }

    #[test]
    fn test_keys_are_path_encoded() -> Result<()> {
        let backend = HttpBackend {
            client: Client::new(),
            base_url: "http://cache-1:7000/".parse()?,
            token: String::new(),
            request_timeout: Duration::from_secs(1),
        };

        assert_eq!(
            backend.store_url("a/b c")?.as_str(),
            "http://cache-1:7000/internal/store/a%2Fb%20c"
        );

        Ok(())
    }
}
