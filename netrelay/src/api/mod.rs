use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;

use crate::websocket::{websocket_handler, ConnectionRegistry};

/// State shared by every route of the relay server
#[derive(Clone)]
pub struct RelayState {
    pub registry: ConnectionRegistry,
    pub static_dir: Arc<PathBuf>,
    pub firebase_config: Option<Arc<str>>,
    pub cancel_token: CancellationToken,
}

pub fn router(st: RelayState) -> Router {
    let static_files = ServeDir::new(st.static_dir.as_path());
    Router::new()
        .route("/", get(index))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .route("/firebase-config", get(firebase_config))
        .route("/health", get(health))
        .route("/ws", get(websocket_handler))
        .nest_service("/static", static_files)
        .with_state(st)
}

async fn index(State(st): State<RelayState>) -> Response {
    match tokio::fs::read_to_string(st.static_dir.join("index.html")).await {
        Ok(content) => Html(content).into_response(),
        Err(e) if e.kind() == ErrorKind::NotFound => (
            StatusCode::NOT_FOUND,
            Html("<h1>Index file not found</h1>"),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to read index page");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn firebase_config(State(st): State<RelayState>) -> Response {
    match parse_client_config(st.firebase_config.as_deref()) {
        Ok(config) => Json(config).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Failed to load Firebase config: {e}") })),
        )
            .into_response(),
    }
}

fn parse_client_config(raw: Option<&str>) -> crate::error::Result<Value> {
    let raw = raw.ok_or_else(|| {
        crate::error::Error::Custom("no browser client configuration provided".to_string())
    })?;
    Ok(serde_json::from_str(raw)?)
}

async fn health(State(st): State<RelayState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "connections": st.registry.count().await })),
    )
}
