//! Assistant preferences (one row per assistant owner) and per-user
//! dashboard settings.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::db::{time_col, DbConnection};
use crate::error::{AppError, AppResult};
use crate::models::UserPreferences;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct DashboardSettings {
    pub theme: String,
    pub language: String,
    pub font_size: String,

    pub auto_backup: bool,
    pub notifications: bool,
    pub performance_mode: bool,
    pub debug_mode: bool,

    pub two_factor_auth: bool,
    pub session_timeout: u32,
    pub password_complexity: String,

    pub compression: bool,
    pub cache_size: String,
    pub bandwidth_limit: String,

    pub show_system_stats: bool,
    pub show_weather: bool,
    pub show_uptime: bool,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            theme: "dark".into(),
            language: "en".into(),
            font_size: "medium".into(),
            auto_backup: true,
            notifications: true,
            performance_mode: false,
            debug_mode: false,
            two_factor_auth: false,
            session_timeout: 30,
            password_complexity: "medium".into(),
            compression: true,
            cache_size: "medium".into(),
            bandwidth_limit: "unlimited".into(),
            show_system_stats: true,
            show_weather: true,
            show_uptime: true,
        }
    }
}

impl DashboardSettings {
    /// Overlays the keys of `patch` on `self`.
    pub fn merged(&self, patch: Value) -> AppResult<Self> {
        let Value::Object(patch) = patch else {
            return Err(AppError::bad_request("settings patch must be a JSON object"));
        };
        let mut doc = serde_json::to_value(self)?;
        if let Value::Object(fields) = &mut doc {
            fields.extend(patch);
        }
        serde_json::from_value(doc).map_err(|e| AppError::bad_request(format!("invalid settings: {e}")))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PreferencesUpdate {
    pub preferred_tone: Option<String>,
    pub learning_enabled: Option<bool>,
    pub context_memory_size: Option<i64>,
    pub custom_greeting: Option<String>,
    pub voice_settings: Option<Value>,
}

#[derive(Clone)]
pub struct PreferenceStore {
    db: DbConnection,
}

impl PreferenceStore {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    pub async fn preferences(&self, user_id: &str) -> AppResult<Option<UserPreferences>> {
        Ok(self
            .db
            .lock()
            .await
            .query_row(
                "SELECT user_id, preferred_tone, learning_enabled, context_memory_size,
                        custom_greeting, voice_settings, created_at, updated_at
                 FROM user_preferences WHERE user_id = ?1",
                [user_id],
                |row| {
                    let voice: Option<String> = row.get(5)?;
                    Ok(UserPreferences {
                        user_id: row.get(0)?,
                        preferred_tone: row.get(1)?,
                        learning_enabled: row.get(2)?,
                        context_memory_size: row.get(3)?,
                        custom_greeting: row.get(4)?,
                        voice_settings: voice.and_then(|v| serde_json::from_str(&v).ok()),
                        created_at: time_col(row, 6)?,
                        updated_at: time_col(row, 7)?,
                    })
                },
            )
            .optional()?)
    }

    pub async fn update_preferences(
        &self,
        user_id: &str,
        changes: PreferencesUpdate,
    ) -> AppResult<UserPreferences> {
        let mut prefs = self
            .preferences(user_id)
            .await?
            .ok_or(AppError::NotFound("preferences"))?;

        if let Some(tone) = changes.preferred_tone {
            prefs.preferred_tone = tone;
        }
        if let Some(enabled) = changes.learning_enabled {
            prefs.learning_enabled = enabled;
        }
        if let Some(size) = changes.context_memory_size {
            if size < 1 {
                return Err(AppError::bad_request("context_memory_size must be positive"));
            }
            prefs.context_memory_size = size;
        }
        if let Some(greeting) = changes.custom_greeting {
            prefs.custom_greeting = Some(greeting);
        }
        if let Some(voice) = changes.voice_settings {
            prefs.voice_settings = Some(voice);
        }
        prefs.updated_at = Utc::now();

        self.db.lock().await.execute(
            "UPDATE user_preferences SET preferred_tone = ?1, learning_enabled = ?2,
                context_memory_size = ?3, custom_greeting = ?4, voice_settings = ?5, updated_at = ?6
             WHERE user_id = ?7",
            params![
                prefs.preferred_tone,
                prefs.learning_enabled,
                prefs.context_memory_size,
                prefs.custom_greeting,
                prefs.voice_settings.as_ref().map(|v| v.to_string()),
                prefs.updated_at.to_rfc3339(),
                user_id
            ],
        )?;
        Ok(prefs)
    }

    pub async fn dashboard_settings(&self, user_id: Uuid) -> AppResult<DashboardSettings> {
        let body: Option<String> = self
            .db
            .lock()
            .await
            .query_row(
                "SELECT body FROM dashboard_settings WHERE user_id = ?1",
                [user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(body) => Ok(serde_json::from_str(&body).unwrap_or_else(|err| {
                tracing::warn!(%user_id, error = %err, "stored settings unreadable, using defaults");
                DashboardSettings::default()
            })),
            None => Ok(DashboardSettings::default()),
        }
    }

    pub async fn patch_dashboard_settings(&self, user_id: Uuid, patch: Value) -> AppResult<DashboardSettings> {
        let merged = self.dashboard_settings(user_id).await?.merged(patch)?;
        self.db.lock().await.execute(
            "INSERT INTO dashboard_settings (user_id, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![
                user_id.to_string(),
                serde_json::to_string(&merged)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overlays_only_given_keys() {
        let merged = DashboardSettings::default()
            .merged(json!({ "theme": "light", "sessionTimeout": 60 }))
            .unwrap();
        assert_eq!(merged.theme, "light");
        assert_eq!(merged.session_timeout, 60);
        assert_eq!(merged.font_size, "medium");
        assert!(merged.show_weather);
    }

    #[test]
    fn merge_rejects_unknown_keys_and_wrong_types() {
        let base = DashboardSettings::default();
        assert!(base.merged(json!({ "colour": "red" })).is_err());
        assert!(base.merged(json!({ "autoBackup": "yes" })).is_err());
        assert!(base.merged(json!(["theme"])).is_err());
    }

    #[tokio::test]
    async fn preferences_update_is_partial() {
        let db = crate::db::open_in_memory().unwrap();
        crate::db::seed_defaults(&db, &crate::config::Settings::default())
            .await
            .unwrap();
        let store = PreferenceStore::new(db);

        let before = store.preferences("owner").await.unwrap().unwrap();
        assert_eq!(before.voice_settings.as_ref().unwrap()["volume"], 0.8);

        let after = store
            .update_preferences(
                "owner",
                PreferencesUpdate {
                    preferred_tone: Some("friendly".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(after.preferred_tone, "friendly");
        assert_eq!(after.context_memory_size, before.context_memory_size);
        assert!(store.preferences("nobody").await.unwrap().is_none());
    }
}
