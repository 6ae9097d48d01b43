use crate::{collab::NodeStatus, server::AppState};
use actix_web::{HttpResponse, get, web::Data};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NodeHealth {
    /// `host:port`
    pub node: String,
    pub status: NodeStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub process_id: Uuid,
    pub nodes: Vec<NodeHealth>,
}

#[utoipa::path(
    responses(
        (status = 200, description = "Health check, with the last known status of every cache node", body = HealthResponse)
    ),
    tags = ["health"]
)]
#[get("/health")]
pub async fn health(app_state: Data<AppState>) -> HttpResponse {
    let nodes = app_state
        .orchestrator
        .node_statuses()
        .into_iter()
        .map(|(id, status)| NodeHealth {
            node: id.to_string(),
            status,
        })
        .collect();

    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        process_id: app_state.process_id,
        nodes,
    })
}

#[utoipa::path(
    responses(
        (status = 200, description = "Home endpoint")
    ),
    tags = ["health"]
)]
#[get("/")]
pub async fn home() -> HttpResponse {
    HttpResponse::Ok().body("ringcache")
}
