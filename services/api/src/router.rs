//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST surface, the WebSocket endpoint, and OpenAPI
//! documentation.

use crate::{
    handlers,
    models::{ChapterOutline, ErrorResponse, GuideOutline, HealthResponse},
    state::AppState,
    ws::ws_handler,
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::health, handlers::guide_outline),
    components(schemas(GuideOutline, ChapterOutline, HealthResponse, ErrorResponse)),
    tags(
        (name = "Gauntlet API", description = "Guided AI-security challenge sessions")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/health", get(handlers::health))
        .route("/guide", get(handlers::guide_outline))
        .route("/ws", get(ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Merge the stateful routes with the stateless Swagger UI.
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
