use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::instrument;
use uuid::Uuid;

use crate::chat::{router as chat_router, ChatEvent, ChatMessage, ChatTurn};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat_turn))
        .route("/chat/stream", post(chat_turn_stream))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: Uuid,
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    pub inventory_summary: Option<String>,
    pub meal_plan_summary: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

impl From<ChatRequest> for ChatTurn {
    fn from(req: ChatRequest) -> Self {
        ChatTurn {
            user_id: req.user_id,
            message: req.message,
            history: req.history,
            inventory_summary: req.inventory_summary,
            meal_plan_summary: req.meal_plan_summary,
        }
    }
}

#[instrument(skip(state, body), fields(user_id = %body.user_id))]
async fn chat_turn(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    if body.message.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message must be non-empty".into()));
    }

    let reply = chat_router::run_chat(state, body.into()).await;
    Ok(Json(ChatResponse { reply }))
}

/// Streamed variant: newline-delimited JSON events, status lines first,
/// then one content line with the reply.
#[instrument(skip(state, body), fields(user_id = %body.user_id))]
async fn chat_turn_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> impl IntoResponse {
    if body.message.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "message must be non-empty".to_string()).into_response();
    }

    let (tx, rx) = mpsc::channel::<ChatEvent>(64);
    tokio::spawn(chat_router::run_chat_stream(state, body.into(), tx));

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let line = match event {
            ChatEvent::Status(text) => json!({"type": "status", "text": text}),
            ChatEvent::Content(text) => json!({"type": "content", "text": text}),
        };
        Some((
            Ok::<String, std::convert::Infallible>(format!("{}\n", line)),
            rx,
        ))
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}
