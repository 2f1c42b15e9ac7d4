use crate::hub::Hub;
use crate::subscription::protocol::DataFrame;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Shared application state for publishing
#[derive(Clone)]
pub struct PublishAppState {
    pub hub: Arc<Hub>,
}

/// Success response for a publication
#[derive(Serialize)]
struct PublishResponse {
    /// Sessions connected when the frame was published
    receivers: usize,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create router with the publish endpoint
pub fn create_publish_router(state: Arc<PublishAppState>) -> Router {
    Router::new()
        .route("/api/publish", post(publish_frame))
        .with_state(state)
}

/// POST /api/publish - Fan a labelled frame out to subscribed sessions
///
/// Body: `{"labels": ["topic", ...], ...}`; every other member is delivered
/// verbatim.
async fn publish_frame(
    State(state): State<Arc<PublishAppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<PublishResponse>), PublishError> {
    let frame: DataFrame = serde_json::from_slice(&body)
        .map_err(|e| PublishError::InvalidFrame(e.to_string()))?;

    if frame.labels.is_empty() {
        return Err(PublishError::MissingLabels);
    }

    let labels = frame.labels.join(",");
    let receivers = state.hub.publish(frame);
    info!(labels = %labels, receivers = receivers, "Frame published");

    Ok((StatusCode::ACCEPTED, Json(PublishResponse { receivers })))
}

/// Publish validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum PublishError {
    InvalidFrame(String),
    MissingLabels,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::InvalidFrame(msg) => write!(f, "invalid frame: {}", msg),
            PublishError::MissingLabels => write!(f, "labels must name at least one topic"),
        }
    }
}

impl std::error::Error for PublishError {}

impl IntoResponse for PublishError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}
