use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use qr_scanner_capture::Preview;
use qr_scanner_common::config::LensFacing;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::notice::Notifier;
use crate::presenter::TextView;

/// Requests from the display surface to the app controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    SwitchCamera(LensFacing),
}

pub struct UiState {
    pub view: TextView,
    pub notifier: Notifier,
    pub preview: Preview,
    pub commands: mpsc::UnboundedSender<UiCommand>,
}

#[derive(Debug, Serialize)]
struct Content {
    text: String,
    notice: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SwitchCamera {
    lens_facing: LensFacing,
}

/// GET /api/content: current decoded text and visible notice
async fn content(State(state): State<Arc<UiState>>) -> impl IntoResponse {
    Json(Content {
        text: state.view.text(),
        notice: state.notifier.current(),
    })
}

/// GET /api/preview.jpg: latest full-resolution frame
async fn preview(State(state): State<Arc<UiState>>) -> impl IntoResponse {
    let Some(frame) = state.preview.latest() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let mime = image::guess_format(&frame.data)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream");
    ([(header::CONTENT_TYPE, mime)], frame.data.clone()).into_response()
}

/// POST /api/camera: rebind to another camera
/// Body: { "lens_facing": "front" }
async fn switch_camera(
    State(state): State<Arc<UiState>>,
    Json(body): Json<SwitchCamera>,
) -> impl IntoResponse {
    match state.commands.send(UiCommand::SwitchCamera(body.lens_facing)) {
        Ok(()) => {
            info!(facing = %body.lens_facing, "camera switch requested");
            StatusCode::ACCEPTED
        }
        Err(e) => {
            error!(error = %e, "app controller is gone");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

pub fn router(state: Arc<UiState>) -> Router {
    Router::new()
        .route("/api/content", get(content))
        .route("/api/preview.jpg", get(preview))
        .route("/api/camera", post(switch_camera))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
