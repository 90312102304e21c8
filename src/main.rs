mod config;
mod http;
mod llm;
mod metrics;
mod models;
mod pipeline;
mod security;
mod store;
mod supabase;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use models::{ApiError, PublishResponse};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use security::{AuthState, require_access_token};
use serde_json::json;
use std::{net::SocketAddr, path::Path};
use tempfile::NamedTempFile;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "vitrine.api", "server crashed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let pipeline = Pipeline::from_env()?;
    let auth = AuthState::from_env()?;
    let app = router(AppState { pipeline }, auth);

    let port = config::parse_env_u64("PORT", 8000);
    let port = u16::try_from(port).map_err(|_| config::ConfigError::Invalid {
        key: "PORT",
        value: port.to_string(),
    })?;
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "vitrine.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
}

fn router(state: AppState, auth: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/products", post(publish_product))
        .route_layer(middleware::from_fn_with_state(auth, require_access_token));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "vitrine-api-rs",
    }))
}

fn body_limit_from_env() -> usize {
    config::parse_env_u64("REQUEST_MAX_BYTES", 20 * 1024 * 1024) as usize
}

/// Publish a product from a photo and/or a description.
///
/// - Method: `POST`
/// - Path: `/products`
/// - Auth: `Authorization: Bearer <token>` or `X-Vitrine-Token: <token>`
/// - Body: `multipart/form-data` with an optional `photo` file and optional `text`
/// - Response: `PublishResponse`
///
/// The photo is spooled to a temporary file that is removed when the handler
/// returns, whatever the outcome.
async fn publish_product(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PublishResponse>, AppError> {
    crate::metrics::inc_requests("/products");
    let request_id = Uuid::new_v4();

    let mut text = String::new();
    let mut photo: Option<NamedTempFile> = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("text") => text = field.text().await?,
            Some("photo") => {
                let extension = field
                    .file_name()
                    .and_then(|name| Path::new(name).extension())
                    .and_then(|ext| ext.to_str())
                    .map(str::to_lowercase)
                    .unwrap_or_else(|| "jpg".to_string());
                let bytes = field.bytes().await?;
                if !bytes.is_empty() {
                    photo = Some(spool_photo(request_id, &extension, &bytes).await?);
                }
            }
            _ => {}
        }
    }

    if photo.is_none() && text.trim().is_empty() {
        return Err(AppError::BadRequest(
            "send a product photo or a description".into(),
        ));
    }

    info!(
        target = "vitrine.api",
        request_id = %request_id,
        has_photo = photo.is_some(),
        "publish requested"
    );

    let outcome = state
        .pipeline
        .run(photo.as_ref().map(|file| file.path()), &text)
        .await
        .inspect_err(|err| {
            error!(target = "vitrine.api", request_id = %request_id, error = %err, "publish failed");
        })?;

    Ok(Json(PublishResponse {
        message: format!("Product \"{}\" has been published.", outcome.title),
        request_id: request_id.to_string(),
        title: outcome.title,
        image_url: outcome.image_url,
        image_source: outcome.image_source,
        stages: outcome.stages,
    }))
}

async fn spool_photo(
    request_id: Uuid,
    extension: &str,
    bytes: &[u8],
) -> Result<NamedTempFile, AppError> {
    let file = tempfile::Builder::new()
        .prefix(&format!("temp_{}_", request_id.simple()))
        .suffix(&format!(".{extension}"))
        .tempfile()
        .map_err(|err| AppError::Internal(err.to_string()))?;
    tokio::fs::write(file.path(), bytes)
        .await
        .map_err(|err| AppError::Internal(err.to_string()))?;
    Ok(file)
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    BadRequest(String),
    Internal(String),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl From<MultipartError> for AppError {
    fn from(value: MultipartError) -> Self {
        Self::BadRequest(value.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::Input => StatusCode::BAD_REQUEST,
                    _ => StatusCode::BAD_GATEWAY,
                };
                let payload = ApiError {
                    error: err.kind().as_str().to_string(),
                    detail: Some(err.to_string()),
                };
                (status, payload)
            }
            AppError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: "invalid_request".into(),
                    detail: Some(detail),
                },
            ),
            AppError::Internal(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError {
                    error: "internal".into(),
                    detail: Some(detail),
                },
            ),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
