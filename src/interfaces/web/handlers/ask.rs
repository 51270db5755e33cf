use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::super::AppState;
use crate::core::pipeline::Reply;

#[derive(Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Serialize)]
pub struct AskResponse {
    pub sql: String,
    pub answer: String,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

/// Always answers 200 with `sql` and `answer`; failures are explained in `answer`.
/// A question supersedes the conversation's in-flight one.
pub async fn ask_endpoint(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Json<AskResponse> {
    let question = req.question.trim().to_string();
    let conversation_id = req
        .conversation_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if question.is_empty() {
        return Json(AskResponse {
            sql: String::new(),
            answer: "Please ask a question about the sensor data.".to_string(),
            conversation_id,
            error_kind: Some("empty_question"),
        });
    }

    let token = state.conversations.lock().await.open(&conversation_id).begin();
    info!(conversation_id = %conversation_id, "Ask request");

    // The question runs detached so a client that disconnects mid-poll neither strands the
    // remote execution nor leaves the conversation busy.
    let orchestrator = state.orchestrator.clone();
    let conversations = state.conversations.clone();
    let id = conversation_id.clone();
    let task = tokio::spawn(async move {
        let reply = orchestrator
            .answer_with_cancel(&question, token.clone())
            .await;
        if let Some(context) = conversations.lock().await.get_mut(&id) {
            context.record(&token, &question, &reply);
        }
        reply
    });
    let reply = match task.await {
        Ok(reply) => reply,
        Err(e) => {
            error!(conversation_id = %conversation_id, "Ask task failed: {}", e);
            Reply {
                sql: String::new(),
                answer: "Sorry, something went wrong while answering that question.".to_string(),
                error_kind: Some("internal_error"),
            }
        }
    };

    Json(AskResponse {
        sql: reply.sql,
        answer: reply.answer,
        conversation_id,
        error_kind: reply.error_kind,
    })
}
