use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::extract::{AppJson, AppPath};
use crate::models::User;
use crate::state::AppState;
use crate::users::{NewUser, UserUpdate};

pub async fn list_users(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<User>>> {
    auth.require("manage_users")?;
    Ok(Json(state.users.list().await?))
}

pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(user_id): AppPath<Uuid>,
) -> AppResult<Json<User>> {
    auth.require("manage_users")?;
    Ok(Json(state.users.get(user_id).await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(new_user): AppJson<NewUser>,
) -> AppResult<impl IntoResponse> {
    auth.require("manage_users")?;
    let user = state.users.create(new_user).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(user_id): AppPath<Uuid>,
    AppJson(changes): AppJson<UserUpdate>,
) -> AppResult<Json<User>> {
    auth.require("manage_users")?;
    Ok(Json(state.users.update(user_id, changes).await?))
}

pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(user_id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    auth.require("manage_users")?;
    state.users.delete(user_id, auth.user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
