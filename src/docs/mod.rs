use utoipa::OpenApi;
use crate::handlers;
use crate::models::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::health::ready_check,
        handlers::diagnostics::diagnostics,
    ),
    components(
        schemas(HealthResponse, ReadyResponse, DiagnosticsResponse, ErrorResponse)
    ),
    tags(
        (name = "api", description = "Relay API endpoints")
    )
)]
pub struct ApiDoc;
