//! OpenAPI documentation and Swagger UI integration.

use axum::Router;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use super::AppContext;

/// OpenAPI documentation for gifforge.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "gifforge API",
        description = "Token-gated conversion of remote videos into animated GIFs",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
    ),
    servers(
        (url = "/", description = "Default server")
    ),
    paths(
        super::routes_api::health,
        super::routes_api::issue_token,
        super::routes_api::convert,
        super::routes_api::convert_with_suffix,
    ),
    components(
        schemas(
            super::routes_api::TokenResponse,
            super::routes_api::HealthResponse,
            crate::cache::CacheStats,
            gifforge_common::ConversionRequest,
            gifforge_common::InputFormat,
            gifforge_common::OutputFormat,
        )
    ),
    modifiers(&BasicAuthScheme),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "conversion", description = "Token issuance and conversion"),
    )
)]
pub struct ApiDoc;

struct BasicAuthScheme;

impl Modify for BasicAuthScheme {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "basic_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Basic).build()),
            );
        }
    }
}

/// Create OpenAPI documentation routes.
/// - `/docs` - Swagger UI
/// - `/openapi.json` - Raw OpenAPI JSON document (served by SwaggerUi)
pub fn openapi_routes() -> Router<AppContext> {
    Router::new().merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}
