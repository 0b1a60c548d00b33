use axum::{
    extract::State,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppQuery};
use crate::llm::AssistantReply;
use crate::models::Conversation;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ChatMessage {
    message: String,
    context: Option<Value>,
    user_id: Option<String>,
}

pub async fn chat(
    State(state): State<AppState>,
    AppJson(input): AppJson<ChatMessage>,
) -> AppResult<Json<AssistantReply>> {
    let message = input.message.trim();
    if message.is_empty() {
        return Err(AppError::bad_request("message is required"));
    }
    let user_id = input
        .user_id
        .as_deref()
        .unwrap_or(&state.settings.default_user_id);

    let reply = state
        .assistant
        .process_message(message, input.context.as_ref(), user_id)
        .await?;
    Ok(Json(reply))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    20
}

#[derive(Serialize)]
pub struct ChatHistory {
    conversations: Vec<Conversation>,
}

pub async fn chat_history(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<HistoryQuery>,
) -> AppResult<Json<ChatHistory>> {
    let conversations = state.assistant.recent_conversations(query.limit.min(500)).await?;
    Ok(Json(ChatHistory { conversations }))
}

#[derive(Deserialize)]
pub struct LearnRequest {
    question: String,
    answer: String,
    category: Option<String>,
}

#[derive(Serialize)]
pub struct Learned {
    message: &'static str,
    id: i64,
    pattern: String,
}

pub async fn learn(
    State(state): State<AppState>,
    AppJson(input): AppJson<LearnRequest>,
) -> AppResult<Json<Learned>> {
    let category = input
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("general");
    let id = state
        .assistant
        .learn(&input.question, &input.answer, category)
        .await?;
    Ok(Json(Learned {
        message: "Learning data saved successfully",
        id,
        pattern: input.question.trim().to_string(),
    }))
}
