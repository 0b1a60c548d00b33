use axum::{extract::State, Json};
use serde_json::Value;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::extract::AppJson;
use crate::models::UserPreferences;
use crate::preferences::{DashboardSettings, PreferencesUpdate};
use crate::state::AppState;

pub async fn get_preferences(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<UserPreferences>> {
    auth.require("read")?;
    state
        .preferences
        .preferences(&state.settings.default_user_id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("preferences"))
}

pub async fn update_preferences(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(changes): AppJson<PreferencesUpdate>,
) -> AppResult<Json<UserPreferences>> {
    auth.require("write")?;
    let prefs = state
        .preferences
        .update_preferences(&state.settings.default_user_id, changes)
        .await?;
    Ok(Json(prefs))
}

pub async fn get_settings(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<DashboardSettings>> {
    Ok(Json(state.preferences.dashboard_settings(auth.user.id).await?))
}

pub async fn patch_settings(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(patch): AppJson<Value>,
) -> AppResult<Json<DashboardSettings>> {
    let settings = state
        .preferences
        .patch_dashboard_settings(auth.user.id, patch)
        .await?;
    tracing::info!(user = %auth.user.username, "dashboard settings updated");
    Ok(Json(settings))
}
