use crate::{backend::Backend, server::AppState};
use actix_web::{
    HttpRequest, HttpResponse, delete, get, put,
    web::{Bytes, Data, Path, Query},
};
use log::{error, warn};
use serde::Deserialize;
use std::time::Duration;
use utoipa::IntoParams;
use utoipa_actix_web::{scope, service_config::ServiceConfig};

pub fn configure_routes(config: &mut ServiceConfig) {
    config.service(
        scope::scope("/internal")
            .service(ping)
            .service(get_stored)
            .service(put_stored)
            .service(delete_stored),
    );
}

fn is_authorized(req: &HttpRequest, app_state: &AppState) -> bool {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if token != Some(app_state.internal_token.as_str()) {
        warn!("unauthorized call to {}", req.path());
        return false;
    }

    true
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().body("Invalid or missing internal token")
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StoreQuery {
    /// Entry lifetime in milliseconds
    pub ttl_millis: u64,
}

#[utoipa::path(
    responses(
        (status = 200, description = "This node's store is ready"),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    ),
    tags = ["internal"],
    security(
        ("internal_bearer" = [])
    )
)]
#[get("/ping")]
async fn ping(req: HttpRequest, app_state: Data<AppState>) -> HttpResponse {
    if !is_authorized(&req, &app_state) {
        return unauthorized();
    }

    match app_state.local_store.ping().await {
        Ok(true) => HttpResponse::Ok().body("pong"),
        Ok(false) | Err(_) => HttpResponse::ServiceUnavailable().finish(),
    }
}

#[utoipa::path(
    params(("key" = String, Path, description = "Store key")),
    responses(
        (status = 200, description = "Raw stored bytes", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 404, description = "Key not stored on this node"),
    ),
    tags = ["internal"],
    security(
        ("internal_bearer" = [])
    )
)]
#[get("/store/{key}")]
async fn get_stored(
    req: HttpRequest,
    key: Path<String>,
    app_state: Data<AppState>,
) -> HttpResponse {
    if !is_authorized(&req, &app_state) {
        return unauthorized();
    }

    match app_state.local_store.get(&key).await {
        Ok(Some(value)) => HttpResponse::Ok()
            .content_type("application/octet-stream")
            .body(value),
        Ok(None) => HttpResponse::NotFound().finish(),
        Err(e) => {
            error!("local store read of '{key}' failed: {e:#}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[utoipa::path(
    params(("key" = String, Path, description = "Store key"), StoreQuery),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 204, description = "Stored"),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    ),
    tags = ["internal"],
    security(
        ("internal_bearer" = [])
    )
)]
#[put("/store/{key}")]
async fn put_stored(
    req: HttpRequest,
    key: Path<String>,
    query: Query<StoreQuery>,
    body: Bytes,
    app_state: Data<AppState>,
) -> HttpResponse {
    if !is_authorized(&req, &app_state) {
        return unauthorized();
    }

    let ttl = Duration::from_millis(query.ttl_millis);

    match app_state
        .local_store
        .set_with_ttl(&key, body.to_vec(), ttl)
        .await
    {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(e) => {
            error!("local store write of '{key}' failed: {e:#}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[utoipa::path(
    params(("key" = String, Path, description = "Store key")),
    responses(
        (status = 204, description = "Removed, or wasn't stored"),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    ),
    tags = ["internal"],
    security(
        ("internal_bearer" = [])
    )
)]
#[delete("/store/{key}")]
async fn delete_stored(
    req: HttpRequest,
    key: Path<String>,
    app_state: Data<AppState>,
) -> HttpResponse {
    if !is_authorized(&req, &app_state) {
        return unauthorized();
    }

    match app_state.local_store.delete(&key).await {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(e) => {
            error!("local store delete of '{key}' failed: {e:#}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
