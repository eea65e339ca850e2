use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::api::state::AppState;
use crate::db::{ConversationRepository, ConversationSummary, Message, MessageRepository, UserRepository};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub to_user_id: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct GetMessagesQuery {
    pub with: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub after: Option<i64>,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub message_id: i64,
}

/// POST /api/chat/send (requires auth)
pub async fn send_message(
    State(state): State<AppState>,
    axum::Extension(user_id): axum::Extension<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Message>, AppError> {
    if req.to_user_id == user_id {
        return Err(AppError::InvalidContent(
            "Cannot send a message to yourself".to_string(),
        ));
    }

    let message = MessageRepository::append(&state.db, &user_id, &req.to_user_id, &req.content)
        .await?;

    state.subscriptions.publish_message(&message);

    Ok(Json(message))
}

/// GET /api/chat/messages?with=<user_id>&after=<ts>&limit=<n> (requires auth)
pub async fn get_messages(
    State(state): State<AppState>,
    axum::Extension(user_id): axum::Extension<String>,
    Query(query): Query<GetMessagesQuery>,
) -> Result<Json<Vec<Message>>, AppError> {
    if UserRepository::get_by_id(&state.db, &query.with).await?.is_none() {
        return Err(AppError::NotFound(format!(
            "User {} does not exist",
            query.with
        )));
    }

    let limit = query.limit.min(100).max(1); // Cap at 100

    let messages =
        MessageRepository::conversation(&state.db, &user_id, &query.with, query.after, Some(limit))
            .await?;

    Ok(Json(messages))
}

/// POST /api/chat/read (requires auth)
pub async fn mark_read(
    State(state): State<AppState>,
    axum::Extension(user_id): axum::Extension<String>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (message, changed) = MessageRepository::mark_read(&state.db, req.message_id, &user_id)
        .await?;

    if changed {
        state.subscriptions.publish_read(&message, &user_id);
    }

    Ok(Json(serde_json::json!({"success": true})))
}

/// GET /api/chat/conversations (requires auth)
pub async fn conversations(
    State(state): State<AppState>,
    axum::Extension(user_id): axum::Extension<String>,
) -> Result<Json<Vec<ConversationSummary>>, AppError> {
    let summaries = ConversationRepository::summaries_for(&state.db, &user_id).await?;

    Ok(Json(summaries))
}
