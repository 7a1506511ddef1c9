//! HTTP surface over a single [`IntakeController`].
//!
//! `POST /upload` hands the first file field of a multipart form to the
//! controller and answers right away; progress is read back from
//! `GET /state` or streamed from `GET /events`.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use serde_json::json;
use thiserror::Error;
use tokio_stream::{wrappers::WatchStream, Stream, StreamExt};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::analysis::GeminiDescriber;
use crate::config::Config;
use crate::intake::{IntakeController, IntakeSnapshot, UploadCandidate};
use crate::validate::UploadLimits;

const MIN_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub controller: IntakeController,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid multipart upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("upload has no file field")]
    MissingFile,

    #[error("no image has been loaded")]
    NoPreview,

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Multipart(err) => err.status(),
            ApiError::MissingFile => StatusCode::BAD_REQUEST,
            ApiError::NoPreview => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Request bodies may run to twice the upload maximum so that oversized
/// files still reach validation and are reported as too large.
pub fn body_limit(limits: &UploadLimits) -> usize {
    usize::try_from(limits.max_bytes.saturating_mul(2))
        .unwrap_or(usize::MAX)
        .max(MIN_BODY_LIMIT)
}

pub fn router(controller: IntakeController) -> Router {
    let limit = body_limit(&controller.settings().limits);

    Router::new()
        .route("/", get(index))
        .route("/upload", post(upload_image))
        .route("/state", get(current_state))
        .route("/events", get(state_events))
        .route("/preview", get(preview))
        .route("/reset", post(reset))
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { controller })
}

pub async fn serve(config: Config) -> Result<()> {
    let describer = GeminiDescriber::from_config(&config.gemini);
    let controller = IntakeController::new(Arc::new(describer), config.intake);
    info!(model = controller.model_name(), "analysis model configured");
    let app = router(controller);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!("attachment inspector listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<IntakeSnapshot>), ApiError> {
    let max_bytes = state.controller.settings().limits.max_bytes;

    while let Some(mut field) = multipart.next_field().await? {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let mime = field.content_type().unwrap_or_default().to_string();

        // Past the maximum only the length matters; stop buffering.
        let mut bytes = Vec::new();
        let mut len: u64 = 0;
        while let Some(chunk) = field.chunk().await? {
            len += chunk.len() as u64;
            if len <= max_bytes {
                bytes.extend_from_slice(&chunk);
            } else if !bytes.is_empty() {
                bytes = Vec::new();
            }
        }

        let candidate = if len <= max_bytes {
            UploadCandidate::from_bytes(name, mime, bytes)
        } else {
            UploadCandidate::new(name, mime, len, tokio::io::empty())
        };
        state.controller.submit(candidate);

        return Ok((StatusCode::ACCEPTED, Json(state.controller.snapshot())));
    }

    Err(ApiError::MissingFile)
}

async fn current_state(State(state): State<AppState>) -> Json<IntakeSnapshot> {
    Json(state.controller.snapshot())
}

async fn state_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::new(state.controller.subscribe()).filter_map(|snapshot| {
        match Event::default().event("state").json_data(&snapshot) {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                warn!(error = %err, "could not serialize state event");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// The uploaded bytes, as sent. Serves both the preview and "Download Original".
async fn preview(State(state): State<AppState>) -> Result<Response, ApiError> {
    let uri = state.controller.snapshot().preview.ok_or(ApiError::NoPreview)?;
    let (mime, bytes) = uri
        .decode()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, mime),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        bytes,
    )
        .into_response())
}

async fn reset(State(state): State<AppState>) -> Json<IntakeSnapshot> {
    state.controller.reset();
    Json(state.controller.snapshot())
}

async fn index() -> Html<&'static str> {
    Html(include_str!("index.html"))
}
