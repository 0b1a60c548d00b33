use std::time::Duration;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::db::component_status;
use crate::error::AppResult;
use crate::state::AppState;
use crate::system::{HostSnapshot, StorageUsage};

pub async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "SMASH Cloud API is running",
        "status": "active",
        "version": env!("CARGO_PKG_VERSION"),
        "assistant": state.settings.assistant_name,
    }))
}

pub async fn system_status(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let settings = &state.settings;
    let preferences = state.preferences.preferences(&settings.default_user_id).await?;
    let status = component_status(&state.db, "api")
        .await?
        .unwrap_or_else(|| "active".to_string());

    Ok(Json(json!({
        "status": status,
        "assistant_name": settings.assistant_name,
        "voice_mode": settings.voice_mode,
        "learning_enabled": settings.learning_enabled,
        "user_preferences": preferences.map(|p| json!({
            "preferred_tone": p.preferred_tone,
            "learning_enabled": p.learning_enabled,
            "context_memory_size": p.context_memory_size,
            "custom_greeting": p.custom_greeting,
            "voice_settings": p.voice_settings,
        })).unwrap_or_else(|| json!({
            "preferred_tone": "jarvis",
            "learning_enabled": true,
            "context_memory_size": 50,
        })),
        "services": {
            "ollama": settings.ollama_host,
            "whisper": settings.whisper_host,
            "piper": settings.piper_host,
            "elevenlabs": if settings.elevenlabs_api_key.is_some() { "configured" } else { "not_configured" },
        },
    })))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceHealth {
    Healthy,
    Unhealthy,
    Unreachable,
}

#[derive(Serialize)]
pub struct HealthReport {
    overall: &'static str,
    database: ServiceHealth,
    whisper: ServiceHealth,
    piper: ServiceHealth,
    timestamp: DateTime<Utc>,
}

async fn probe(client: &Client, host: &str, timeout: Duration) -> ServiceHealth {
    let url = format!("{}/health", host.trim_end_matches('/'));
    match client.get(&url).timeout(timeout).send().await {
        Ok(resp) if resp.status().is_success() => ServiceHealth::Healthy,
        Ok(resp) => {
            tracing::debug!(%url, status = %resp.status(), "health probe failed");
            ServiceHealth::Unhealthy
        }
        Err(err) => {
            tracing::debug!(%url, error = %err, "health probe unreachable");
            ServiceHealth::Unreachable
        }
    }
}

pub fn overall_health(database: ServiceHealth, upstreams: &[ServiceHealth]) -> &'static str {
    if database != ServiceHealth::Healthy {
        "unhealthy"
    } else if upstreams.iter().any(|s| *s != ServiceHealth::Healthy) {
        "degraded"
    } else {
        "healthy"
    }
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    let timeout = state.settings.health_timeout;
    let (whisper, piper) = tokio::join!(
        probe(&state.http, &state.settings.whisper_host, timeout),
        probe(&state.http, &state.settings.piper_host, timeout),
    );

    let database = match state
        .db
        .lock()
        .await
        .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
    {
        Ok(_) => ServiceHealth::Healthy,
        Err(err) => {
            tracing::error!(error = %err, "database health check failed");
            ServiceHealth::Unhealthy
        }
    };

    Json(HealthReport {
        overall: overall_health(database, &[whisper, piper]),
        database,
        whisper,
        piper,
        timestamp: Utc::now(),
    })
}

pub async fn learning_stats(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let stats = state.assistant.conversation_stats().await?;
    let learned_patterns = state.assistant.learning().count().await?;
    Ok(Json(json!({
        "total_conversations": stats.total_conversations,
        "average_confidence": stats.average_confidence,
        "learned_patterns": learned_patterns,
        "learning_enabled": state.settings.learning_enabled,
        "memory_size": state.settings.context_memory_size,
        "last_activity": stats.last_activity,
    })))
}

pub async fn reset_system(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Value>> {
    auth.require("system_control")?;
    let removed = state.assistant.reset().await?;
    tracing::warn!(by = %auth.user.username, "system reset");
    Ok(Json(json!({
        "message": "Conversation history cleared. Learned patterns were kept.",
        "conversations_removed": removed,
    })))
}

pub async fn host_stats(State(state): State<AppState>) -> AppResult<Json<HostSnapshot>> {
    let used = state.files.stats().await?.total_size_bytes;
    let storage = StorageUsage::new(used, state.settings.storage_quota_bytes);
    Ok(Json(state.host.sample(storage).await))
}
