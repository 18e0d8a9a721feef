// WebSocket control endpoint: one JobMessage in, exactly one JobReply out
use crate::runner::JobRunner;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use runbox_common::protocol::{JobMessage, JobReply};
use runbox_common::types::Language;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct WorkerState {
    pub language: Language,
    pub runner: Arc<JobRunner>,
}

pub fn router(state: WorkerState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<WorkerState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "language": state.language }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WorkerState>) -> Response {
    ws.on_upgrade(move |socket| serve_connection(socket, state.runner))
        .into_response()
}

async fn serve_connection(mut socket: WebSocket, runner: Arc<JobRunner>) {
    info!("Host connected");
    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Message::Close(_)) => break,
            // ping/pong are answered by axum
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "Connection error");
                break;
            }
        };

        let reply = handle_message(&runner, &text).await;
        let payload = match serde_json::to_string(&reply) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode reply");
                break;
            }
        };
        if let Err(e) = socket.send(Message::Text(payload)).await {
            debug!(error = %e, "Host went away before the reply was sent");
            break;
        }
    }
    info!("Host disconnected");
}

pub async fn handle_message(runner: &JobRunner, text: &str) -> JobReply {
    match serde_json::from_str::<JobMessage>(text) {
        Ok(job) => {
            debug!(code_bytes = job.code.len(), input_bytes = job.input.len(), "Received job");
            runner.run(&job).await
        }
        Err(e) => {
            debug!(error = %e, "Rejected malformed job");
            JobReply::internal("Invalid JSON format")
        }
    }
}
