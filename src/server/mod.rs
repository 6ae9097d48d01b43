mod cache;
mod health;
mod internal;
mod metrics;
mod openapi;

use crate::{
    backend::{NodeBackend, memory::MemoryBackend},
    cache::CacheOrchestrator,
    server::{health::*, openapi::ApiDoc},
};
use actix_cors::Cors;
use actix_web::{
    App, HttpServer,
    web::{Data, PayloadConfig},
};
use std::{net::TcpListener, sync::Arc};
use utoipa::OpenApi;
use utoipa_actix_web::AppExt;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

/// Largest value accepted on the store endpoints.
const MAX_VALUE_BYTES: usize = 16 * 1024 * 1024;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub orchestrator: CacheOrchestrator<NodeBackend>,
    /// This process's share of the cache, served to peers on `/internal/store`.
    pub local_store: MemoryBackend,
    pub internal_token: String,
    pub process_id: Uuid,
}

pub async fn start_server(state: AppState, listener: TcpListener) -> std::io::Result<()> {
    let data = Data::new(state);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "PUT", "DELETE"])
            .allowed_headers(vec!["Content-Type", "Authorization"])
            .max_age(60 * 60 * 12);

        App::new()
            .wrap(cors)
            .into_utoipa_app()
            .openapi(ApiDoc::openapi())
            .service(home)
            .service(health)
            .configure(cache::configure_routes)
            .configure(metrics::configure_routes)
            .configure(internal::configure_routes)
            .app_data(data.clone())
            .app_data(PayloadConfig::new(MAX_VALUE_BYTES))
            .openapi_service(|api| {
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api/openapi.json", api)
            })
            .into_app()
    })
    .listen(listener)?
    .run();

    server.await
}

#[cfg(test)]
pub const TEST_INTERNAL_TOKEN: &str = "test-internal-token";

#[cfg(test)]
pub fn test_cache_config() -> crate::config::CacheConfig {
    use std::time::Duration;

    crate::config::CacheConfig {
        health_check_interval: Duration::from_millis(100),
        probe_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

/// Starts `size` servers that form one ring over loopback.
#[cfg(test)]
pub async fn start_cluster_test(size: usize) -> Vec<(u16, AppState)> {
    use crate::backend::{NodeConnector, http::HttpConnector};
    use crate::collab::node::{DEFAULT_NODE_WEIGHT, NodeConfig};
    use std::time::Duration;

    let listeners: Vec<TcpListener> = (0..size)
        .map(|_| TcpListener::bind("0.0.0.0:0").expect("failed to bind to random port"))
        .collect();

    let nodes: Vec<NodeConfig> = listeners
        .iter()
        .map(|listener| {
            let port = listener
                .local_addr()
                .expect("failed to get local addr")
                .port();
            NodeConfig::new("127.0.0.1", port, DEFAULT_NODE_WEIGHT)
        })
        .collect();

    let mut servers = Vec::with_capacity(size);

    for (listener, node) in listeners.into_iter().zip(&nodes) {
        let local_store = MemoryBackend::new();
        let connector = NodeConnector::new(
            node.id.clone(),
            local_store.clone(),
            HttpConnector::new(TEST_INTERNAL_TOKEN, Duration::from_secs(1))
                .expect("failed to build HTTP connector"),
        );

        let orchestrator = CacheOrchestrator::initialize(test_cache_config(), &connector, &nodes)
            .await
            .expect("failed to initialize orchestrator");

        let state = Arc::new(AppStateInner {
            orchestrator,
            local_store,
            internal_token: TEST_INTERNAL_TOKEN.to_string(),
            process_id: Uuid::new_v4(),
        });

        let server_state = state.clone();
        tokio::spawn(async move {
            start_server(server_state, listener).await.unwrap();
        });

        servers.push((node.id.port, state));
    }

    servers
}

#[cfg(test)]
pub async fn start_server_test() -> (u16, AppState) {
    start_cluster_test(1)
        .await
        .pop()
        .expect("cluster of one has a server")
}
