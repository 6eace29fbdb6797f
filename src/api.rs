use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    app_state::AppState,
    error::{ErrorKind, RagError},
    models::ConversationTurn,
    service::{ChatReply, Health, RefreshReport},
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads ---

#[derive(Deserialize)]
pub struct ChatPayload {
    message: String,
    #[serde(default)]
    history: Vec<ConversationTurn>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/chat", post(chat_handler))
        .route("/refresh-index", post(refresh_index_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn root_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "ChatDBT con Ollama está en marcha",
        "model": state.config.ollama_model,
        "embedding_model": state.config.ollama_embedding_model,
    }))
}

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Json<ChatReply>, ApiError> {
    state
        .service
        .chat(&payload.message, &payload.history)
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

// El refresco corre en una tarea desacoplada: si el cliente se desconecta,
// la indexación sigue hasta terminar.
#[axum::debug_handler]
async fn refresh_index_handler(
    State(state): State<AppState>,
) -> Result<Json<RefreshReport>, ApiError> {
    info!("Petición de refresco del índice recibida.");
    state
        .service
        .refresh_index()
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Json<Health> {
    Json(state.service.health().await)
}

// --- Utilidades ---

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Configuration | ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::ExternalService | ErrorKind::EmptyIndex => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::RefreshInProgress => StatusCode::CONFLICT,
        ErrorKind::IndexConsistency | ErrorKind::Storage | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: &RagError) -> ApiError {
    let status = status_for(err.kind());
    if status.is_server_error() {
        error!("Error procesando la petición: {err}");
    } else {
        warn!("Petición rechazada: {err}");
    }
    (
        status,
        Json(json!({
            "kind": err.kind(),
            "message": err.to_string(),
            "identifier": err.identifier(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_status_codes() {
        assert_eq!(status_for(ErrorKind::RefreshInProgress), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::InvalidArgument), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::EmptyIndex), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::ExternalService), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::IndexConsistency), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn error_body_is_structured() {
        let (status, Json(body)) = error_response(&RagError::EmbeddingModelMismatch {
            expected: "nomic-embed-text".into(),
            found: "mxbai-embed-large".into(),
        });
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "index_consistency");
        assert!(body["message"].as_str().unwrap().contains("nomic-embed-text"));
        assert!(!body["identifier"].is_null());
    }

    #[test]
    fn chat_payload_history_is_optional() {
        let payload: ChatPayload = serde_json::from_str(r#"{"message":"hola"}"#).unwrap();
        assert_eq!(payload.message, "hola");
        assert!(payload.history.is_empty());

        let payload: ChatPayload = serde_json::from_str(
            r#"{"message":"y?","history":[{"role":"user","content":"hola"},{"role":"assistant","content":"buenas"}]}"#,
        )
        .unwrap();
        assert_eq!(payload.history[1], ConversationTurn::assistant("buenas"));
    }
}
