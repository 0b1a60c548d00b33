use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::auth::{authenticate, create_auth_token, revoke_auth_token, AuthUser};
use crate::error::AppResult;
use crate::extract::AppJson;
use crate::models::User;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LoginUser {
    email: String,
    password: String,
}

#[derive(Serialize)]
pub struct AuthToken {
    token: String,
    user: User,
}

pub async fn login_user(
    State(state): State<AppState>,
    AppJson(login): AppJson<LoginUser>,
) -> AppResult<impl IntoResponse> {
    let user = authenticate(&state.db, &login.email, &login.password).await?;
    let token = create_auth_token(&state.db, &user.id).await?;
    tracing::info!(user = %user.username, "login");
    Ok((StatusCode::OK, Json(AuthToken { token, user })))
}

pub async fn logout_user(State(state): State<AppState>, auth: AuthUser) -> AppResult<StatusCode> {
    revoke_auth_token(&state.db, &auth.token).await?;
    tracing::info!(user = %auth.user.username, "logout");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn current_user(auth: AuthUser) -> Json<User> {
    Json(auth.user)
}
