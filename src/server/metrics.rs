use crate::{cache::metrics::MetricsSnapshot, server::AppState};
use actix_web::{
    get,
    web::{Data, Json},
};
use utoipa_actix_web::service_config::ServiceConfig;

pub fn configure_routes(config: &mut ServiceConfig) {
    config.service(get_metrics);
}

#[utoipa::path(
    summary = "Cache metrics",
    description = "Request counters of this node's orchestrator since startup.",
    responses(
        (status = 200, description = "Current counters", body = MetricsSnapshot)
    ),
    tags = ["metrics"],
    operation_id = "getMetrics"
)]
#[get("/metrics")]
async fn get_metrics(app_state: Data<AppState>) -> Json<MetricsSnapshot> {
    Json(app_state.orchestrator.metrics())
}
