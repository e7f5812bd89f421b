// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP/WebSocket surface
//!
//! Thin request/response mapping over the Isolator facade. Handlers do no
//! work of their own beyond translating typed errors into status codes:
//! registry misses are 404, an unreachable runtime is 503, invalid limits
//! are 422, everything else is 500. File-operation results come back with
//! their own success flag; a missing-file failure maps to 404 so clients see
//! a 4xx, not a 5xx.

use crate::application::isolator::Isolator;
use crate::domain::container::{
    CreateContainerRequest, ExecuteCommandRequest, FileOperationRequest,
};
use crate::domain::error::IsolatorError;
use crate::infrastructure::terminal::TerminalFrame;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

#[derive(Clone)]
pub struct AppState {
    pub isolator: Arc<Isolator>,
}

pub fn app(isolator: Arc<Isolator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/containers", post(create_container).get(list_containers))
        .route(
            "/containers/{container_id}",
            get(get_container).delete(delete_container),
        )
        .route("/containers/{container_id}/execute", post(execute_command))
        .route("/containers/{container_id}/files", post(file_operation))
        .route("/containers/{container_id}/terminal", get(terminal))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(AppState { isolator }))
}

type ApiError = (StatusCode, Json<Value>);

fn error_response(err: &IsolatorError) -> ApiError {
    let status = match err {
        IsolatorError::ContainerNotFound(_) | IsolatorError::FileNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        IsolatorError::RuntimeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        IsolatorError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "detail": err.to_string() })))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "aegis-isolator",
        "containers": state.isolator.tracked_containers(),
    }))
}

async fn create_container(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateContainerRequest>,
) -> Result<Json<Value>, ApiError> {
    let container_id = state
        .isolator
        .create_container(request)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to create container");
            error_response(&e)
        })?;

    let record = state
        .isolator
        .container_info(&container_id)
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(json!({
        "container_id": record.container_id,
        "status": record.status,
        "workspace_id": record.workspace_id,
        "created_at": record.created_at,
        "image": record.image,
    })))
}

async fn get_container(
    State(state): State<Arc<AppState>>,
    Path(container_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .isolator
        .container_info(&container_id)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(record))
}

async fn list_containers(State(state): State<Arc<AppState>>) -> Json<Value> {
    let containers = state.isolator.list_containers().await;
    Json(json!({ "containers": containers }))
}

async fn delete_container(
    State(state): State<Arc<AppState>>,
    Path(container_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .isolator
        .delete_container(&container_id)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(json!({
        "status": "deleted",
        "container_id": container_id,
    })))
}

async fn execute_command(
    State(state): State<Arc<AppState>>,
    Path(container_id): Path<String>,
    Json(request): Json<ExecuteCommandRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .isolator
        .execute_command(&container_id, request)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(result))
}

async fn file_operation(
    State(state): State<Arc<AppState>>,
    Path(container_id): Path<String>,
    Json(request): Json<FileOperationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .isolator
        .file_operation(&container_id, request)
        .await
        .map_err(|e| error_response(&e))?;

    let status = if result.success {
        StatusCode::OK
    } else if result.not_found {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(result)))
}

async fn terminal(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(container_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| terminal_session(socket, state, container_id))
}

/// Pump WebSocket messages to and from the multiplexer's frame channels.
/// Dropping the inbound sender on disconnect ends the session; the session
/// dropping its outbound sender ends this loop.
async fn terminal_session(mut socket: WebSocket, state: Arc<AppState>, container_id: String) {
    let (to_client_tx, mut to_client_rx) = mpsc::channel::<TerminalFrame>(32);
    let (from_client_tx, from_client_rx) = mpsc::channel::<TerminalFrame>(32);

    let isolator = state.isolator.clone();
    let session_id = container_id.clone();
    let session = tokio::spawn(async move {
        isolator
            .handle_terminal_session(&session_id, from_client_rx, to_client_tx)
            .await;
    });

    loop {
        tokio::select! {
            message = socket.recv() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<TerminalFrame>(text.as_str()) {
                        Ok(frame) => {
                            if from_client_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!(error = %e, "Ignoring malformed terminal frame"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
            frame = to_client_rx.recv() => match frame {
                Some(frame) => {
                    let payload = match serde_json::to_string(&frame) {
                        Ok(payload) => payload,
                        Err(_) => continue,
                    };
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    drop(from_client_tx);
    session.abort();
    let _ = socket.send(Message::Close(None)).await;
    debug!(container_id = %container_id, "Terminal WebSocket closed");
}
