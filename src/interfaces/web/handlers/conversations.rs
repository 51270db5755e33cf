use axum::{
    Json,
    extract::{Path, State},
};

use super::super::AppState;

pub async fn get_conversation(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let conversations = state.conversations.lock().await;
    match conversations.get(&id) {
        Some(context) => Json(serde_json::json!({
            "success": true,
            "busy": context.is_busy(),
            "turns": context.history(),
        })),
        None => Json(serde_json::json!({ "success": false, "error": "Conversation not found" })),
    }
}

/// Cancels any in-flight question and forgets the conversation.
pub async fn delete_conversation(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let removed = state.conversations.lock().await.remove(&id);
    match removed {
        Some(mut context) => {
            context.cancel();
            Json(serde_json::json!({ "success": true }))
        }
        None => Json(serde_json::json!({ "success": false, "error": "Conversation not found" })),
    }
}
