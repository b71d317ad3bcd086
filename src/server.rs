//!
//! tabletalk HTTP server
//! ---------------------
//! Axum binding over the service layer. Three endpoints mirror the
//! browser frontend's contract:
//! - `POST /upload` — multipart batch of tabular files.
//! - `POST /generate-sql` — form field `question`.
//! - `GET /health` — liveness plus whether a model is configured.
//!
//! CORS is fully permissive: the frontend is served from a different origin
//! during development. All domain errors map through `ApiError::http_status`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::error::ApiError;
use crate::ingest::UploadedFile;
use crate::llm::{ChatCompletionsClient, QueryGenerator};
use crate::service::Engine;
use crate::store::TableStore;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

/// Build the engine from config and serve HTTP until shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = match &config.db_path {
        Some(path) => {
            info!(target: "tabletalk::server", "using persistent store at '{}'", path.display());
            TableStore::at_path(path)
        }
        None => {
            info!(target: "tabletalk::server", "using transient in-memory store");
            TableStore::in_memory()?
        }
    };
    let generator: Option<Arc<dyn QueryGenerator>> = match &config.llm {
        Some(llm) => {
            info!(target: "tabletalk::server", "model configured: '{}' via {}", llm.model, llm.base_url);
            Some(Arc::new(ChatCompletionsClient::new(llm)))
        }
        None => {
            info!(target: "tabletalk::server", "no API key set; query generation disabled");
            None
        }
    };
    let engine = Engine::new(store, generator);

    let app = router(engine);
    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Assemble the router for the given engine. Split out so tests can drive
/// the same routes without binding a socket.
pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/", get(|| async { "tabletalk ok" }))
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/generate-sql", post(generate_sql))
        .layer(CorsLayer::permissive())
        .with_state(AppState { engine })
}

fn error_response(err: &ApiError) -> (StatusCode, Json<serde_json::Value>) {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = json!({
        "status": "error",
        "code": err.code_str(),
        "message": err.to_string(),
    });
    // Extraction failures carry the raw model output for diagnostics.
    if let ApiError::Extraction { raw } = err {
        body["raw"] = json!(raw);
    }
    (status, Json(body))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.health())
}

async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> impl IntoResponse {
    let mut files: Vec<UploadedFile> = Vec::new();
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let filename = match field.file_name() {
                    Some(name) => name.to_string(),
                    None => continue, // non-file form fields are ignored
                };
                match field.bytes().await {
                    Ok(bytes) => files.push(UploadedFile { filename, content: bytes.to_vec() }),
                    Err(e) => {
                        error!("upload: failed reading field '{}': {e}", filename);
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"status":"error","code":"bad_multipart","message": e.to_string()})),
                        );
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"status":"error","code":"bad_multipart","message": e.to_string()})),
                );
            }
        }
    }
    match state.engine.upload(&files) {
        Ok(report) => (StatusCode::OK, Json(json!(report))),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct GeneratePayload {
    question: String,
}

async fn generate_sql(
    State(state): State<AppState>,
    Form(payload): Form<GeneratePayload>,
) -> impl IntoResponse {
    match state.engine.generate(&payload.question).await {
        Ok(report) => (StatusCode::OK, Json(json!(report))),
        Err(e) => error_response(&e),
    }
}
