mod backend;
mod cache;
mod collab;
mod config;
mod eager_env;
mod error;
mod server;
mod utils;

use crate::{
    backend::{NodeConnector, http::HttpConnector, memory::MemoryBackend},
    cache::CacheOrchestrator,
    collab::node::{NodeId, parse_node_list},
    config::CacheConfig,
    eager_env::check_env,
    server::{AppStateInner, start_server},
};
use log::{info, warn};
use std::{net::TcpListener, sync::Arc, time::Duration};
use uuid::Uuid;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    env_logger::builder()
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();
    check_env();

    let process_id = Uuid::new_v4();
    let config = CacheConfig::from_env();

    let nodes = parse_node_list(&eager_env::CACHE_NODES).expect("Invalid CACHE_NODES");
    let local_id: NodeId = eager_env::NODE_ADDRESS
        .parse()
        .expect("Invalid NODE_ADDRESS");

    if !nodes.iter().any(|node| node.id == local_id) {
        warn!("NODE_ADDRESS {local_id} isn't in CACHE_NODES, this process stores nothing");
    }

    let local_store = MemoryBackend::new();
    let http = HttpConnector::new(
        eager_env::CACHE_INTERNAL_TOKEN.as_str(),
        Duration::from_millis(*eager_env::REQUEST_TIMEOUT_MILLIS),
    )
    .expect("failed to build the peer HTTP client");
    let connector = NodeConnector::new(local_id, local_store.clone(), http);

    let listener =
        TcpListener::bind(format!("0.0.0.0:{}", *eager_env::PORT)).expect("Failed to bind PORT");

    println!(
        "Listening on {}",
        listener.local_addr().expect("Failed to get local address")
    );

    let orchestrator = CacheOrchestrator::initialize(config, &connector, &nodes)
        .await
        .expect("failed to initialize the cache ring");

    let stop_sweeper = local_store.start_sweeper(SWEEP_INTERVAL);

    let state = Arc::new(AppStateInner {
        orchestrator,
        local_store,
        internal_token: eager_env::CACHE_INTERNAL_TOKEN.clone(),
        process_id,
    });

    info!("process {process_id} serving {} cache nodes", nodes.len());

    start_server(state.clone(), listener)
        .await
        .expect("error while running server");

    state.orchestrator.shutdown().await;
    stop_sweeper();
}
