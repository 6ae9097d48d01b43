use crate::{error::CacheError, server::AppState};
use actix_web::{
    HttpResponse, ResponseError, delete, get,
    http::StatusCode,
    put,
    web::{Data, Json, Path},
};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use utoipa::ToSchema;
use utoipa_actix_web::{scope, service_config::ServiceConfig};

pub fn configure_routes(config: &mut ServiceConfig) {
    config.service(
        scope::scope("/cache")
            .service(get_value)
            .service(set_value)
            .service(delete_value),
    );
}

impl ResponseError for CacheError {
    fn status_code(&self) -> StatusCode {
        match self {
            CacheError::NoAvailableNode => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Backend(_) => StatusCode::BAD_GATEWAY,
            CacheError::Serialization(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let CacheError::Backend(e) = self {
            warn!("cache request failed: {e:#}");
        }

        HttpResponse::build(self.status_code()).json(json!({
            "error": self.to_string()
        }))
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CachedValue {
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SetValueRequest {
    pub value: serde_json::Value,
    /// Falls back to the node's default TTL when omitted
    pub ttl_seconds: Option<u64>,
}

#[utoipa::path(
    summary = "Read a cached value",
    params(("key" = String, Path, description = "Cache key")),
    responses(
        (status = 200, description = "Value found", body = CachedValue),
        (status = 400, description = "Stored value isn't JSON"),
        (status = 404, description = "Key not cached"),
        (status = 502, description = "The owning node failed"),
        (status = 503, description = "No node available for the key")
    ),
    tags = ["cache"],
    operation_id = "getValue"
)]
#[get("/{key}")]
async fn get_value(
    key: Path<String>,
    app_state: Data<AppState>,
) -> Result<HttpResponse, CacheError> {
    let key = key.into_inner();

    match app_state.orchestrator.get(&key).await? {
        Some(value) => Ok(HttpResponse::Ok().json(CachedValue { key, value })),
        None => Ok(HttpResponse::NotFound().finish()),
    }
}

#[utoipa::path(
    summary = "Cache a value",
    description = "Stores a JSON value on the node owning the key and replicates it in the background.",
    params(("key" = String, Path, description = "Cache key")),
    request_body = SetValueRequest,
    responses(
        (status = 204, description = "Value stored"),
        (status = 502, description = "The owning node failed"),
        (status = 503, description = "No node available for the key")
    ),
    tags = ["cache"],
    operation_id = "setValue"
)]
#[put("/{key}")]
async fn set_value(
    key: Path<String>,
    body: Json<SetValueRequest>,
    app_state: Data<AppState>,
) -> Result<HttpResponse, CacheError> {
    let SetValueRequest { value, ttl_seconds } = body.into_inner();

    app_state
        .orchestrator
        .set(&key, &value, ttl_seconds.map(Duration::from_secs))
        .await?;

    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    summary = "Evict a cached value",
    params(("key" = String, Path, description = "Cache key")),
    responses(
        (status = 204, description = "Value removed, or it wasn't cached"),
        (status = 502, description = "The owning node failed"),
        (status = 503, description = "No node available for the key")
    ),
    tags = ["cache"],
    operation_id = "deleteValue"
)]
#[delete("/{key}")]
async fn delete_value(
    key: Path<String>,
    app_state: Data<AppState>,
) -> Result<HttpResponse, CacheError> {
    app_state.orchestrator.delete(&key).await?;

    Ok(HttpResponse::NoContent().finish())
}
