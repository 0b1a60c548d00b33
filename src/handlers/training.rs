use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::extract::{AppJson, AppPath};
use crate::learning::{NewTrainingExample, TrainingExampleUpdate};
use crate::models::LearningData;
use crate::state::AppState;

pub async fn list_examples(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<LearningData>>> {
    auth.require("read")?;
    Ok(Json(state.assistant.learning().list().await?))
}

pub async fn create_example(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(input): AppJson<NewTrainingExample>,
) -> AppResult<impl IntoResponse> {
    auth.require("write")?;
    let example = state.assistant.learning().create(input).await?;
    tracing::info!(id = example.id, by = %auth.user.username, "training example added");
    Ok((StatusCode::CREATED, Json(example)))
}

pub async fn update_example(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<i64>,
    AppJson(changes): AppJson<TrainingExampleUpdate>,
) -> AppResult<Json<LearningData>> {
    auth.require("write")?;
    Ok(Json(state.assistant.learning().update(id, changes).await?))
}

pub async fn delete_example(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<i64>,
) -> AppResult<StatusCode> {
    auth.require("write")?;
    state.assistant.learning().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
