use utoipa::OpenApi;
use utoipa::openapi::{
    OpenApi as OpenApiSpec,
    security::{Http, HttpAuthScheme, SecurityScheme},
};

#[derive(OpenApi)]
#[openapi(
    tags(
        (name = "health", description = "Health-related endpoints."),
        (name = "cache", description = "Cache reads and writes, routed to the node owning each key."),
        (name = "metrics", description = "Request counters."),
        (name = "internal", description = "Store endpoints peers use to reach this node's share of the cache."),
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut OpenApiSpec) {
        let components = openapi.components.get_or_insert_with(Default::default);

        components.add_security_scheme(
            "internal_bearer",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}
