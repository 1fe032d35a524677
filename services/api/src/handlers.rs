//! Axum Handlers for the REST API
//!
//! The interactive game runs over the WebSocket; this surface only exposes
//! what a front end needs before connecting: liveness and the guide outline.
//! It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::error;

use crate::{
    models::{ErrorResponse, GuideOutline, HealthResponse},
    state::AppState,
};

pub enum ApiError {
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// The guide outline: chapter and challenge titles for the progress sidebar.
#[utoipa::path(
    get,
    path = "/guide",
    responses(
        (status = 200, description = "Guide outline", body = GuideOutline),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn guide_outline(State(state): State<Arc<AppState>>) -> Json<GuideOutline> {
    Json(GuideOutline::from_guide(&state.guide))
}
