use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::hash_password;
use crate::config::Settings;
use crate::error::AppResult;
use crate::models::Role;

pub type DbConnection = Arc<Mutex<Connection>>;

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        permissions TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        last_login TEXT
    );

    CREATE TABLE IF NOT EXISTS auth_tokens (
        token TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS files (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        kind TEXT NOT NULL CHECK (kind IN ('file', 'folder')),
        size_bytes INTEGER NOT NULL DEFAULT 0,
        permissions TEXT NOT NULL,
        uploaded_by TEXT,
        mime_type TEXT,
        extension TEXT,
        storage_path TEXT,
        is_public INTEGER NOT NULL DEFAULT 0,
        public_url TEXT,
        created_at TEXT NOT NULL,
        modified_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS conversations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_message TEXT NOT NULL,
        assistant_response TEXT NOT NULL,
        user_id TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        context TEXT,
        confidence_score REAL NOT NULL DEFAULT 0.0,
        learning_tags TEXT
    );

    CREATE TABLE IF NOT EXISTS learning_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pattern TEXT NOT NULL,
        response TEXT NOT NULL,
        category TEXT NOT NULL DEFAULT 'general',
        confidence REAL NOT NULL DEFAULT 0.5,
        usage_count INTEGER NOT NULL DEFAULT 1,
        last_used TEXT NOT NULL,
        created_at TEXT NOT NULL,
        is_verified INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS user_preferences (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL UNIQUE,
        preferred_tone TEXT NOT NULL DEFAULT 'jarvis',
        learning_enabled INTEGER NOT NULL DEFAULT 1,
        context_memory_size INTEGER NOT NULL DEFAULT 50,
        custom_greeting TEXT,
        voice_settings TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS dashboard_settings (
        user_id TEXT PRIMARY KEY,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS system_state (
        component TEXT PRIMARY KEY,
        status TEXT NOT NULL DEFAULT 'active',
        last_activity TEXT NOT NULL,
        metrics TEXT,
        notes TEXT
    );
";

pub fn establish_connection(path: &str) -> Result<DbConnection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    migrate(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub fn open_in_memory() -> Result<DbConnection> {
    let conn = Connection::open_in_memory()?;
    migrate(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
}

/// Inserts the default assistant preferences and, on an empty user table,
/// the bootstrap admin account. Safe to call on every start.
pub async fn seed_defaults(conn: &DbConnection, settings: &Settings) -> AppResult<()> {
    let conn = conn.lock().await;
    let now = Utc::now().to_rfc3339();

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO user_preferences
            (user_id, preferred_tone, learning_enabled, context_memory_size,
             custom_greeting, voice_settings, created_at, updated_at)
         VALUES (?1, 'jarvis', 1, 50, ?2, ?3, ?4, ?4)",
        params![
            settings.default_user_id,
            settings.startup_line,
            r#"{"speed": 1.0, "pitch": 1.0, "volume": 0.8}"#,
            now
        ],
    )?;
    if inserted > 0 {
        tracing::info!(user_id = %settings.default_user_id, "default user preferences initialized");
    }

    let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    if users == 0 {
        let role = Role::Admin;
        let permissions = serde_json::to_string(&role.default_permissions())?;
        let password_hash = hash_password(&settings.admin_password)?;
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, role, is_active, permissions, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?7)",
            params![
                Uuid::new_v4().to_string(),
                settings.admin_username,
                settings.admin_email.trim().to_lowercase(),
                password_hash,
                role.as_str(),
                permissions,
                now
            ],
        )?;
        tracing::warn!(email = %settings.admin_email, "created bootstrap admin account; change its password");
    }

    Ok(())
}

pub async fn record_component_state(
    conn: &DbConnection,
    component: &str,
    status: &str,
    metrics: Option<&serde_json::Value>,
) -> Result<()> {
    let metrics = metrics.map(|m| m.to_string());
    conn.lock().await.execute(
        "INSERT INTO system_state (component, status, last_activity, metrics)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(component) DO UPDATE SET
            status = excluded.status,
            last_activity = excluded.last_activity,
            metrics = COALESCE(excluded.metrics, system_state.metrics)",
        params![component, status, Utc::now().to_rfc3339(), metrics],
    )?;
    Ok(())
}

pub async fn component_status(conn: &DbConnection, component: &str) -> Result<Option<String>> {
    conn.lock()
        .await
        .query_row(
            "SELECT status FROM system_state WHERE component = ?1",
            [component],
            |row| row.get(0),
        )
        .optional()
}

pub fn uuid_col(row: &Row<'_>, idx: usize) -> Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

pub fn time_col(row: &Row<'_>, idx: usize) -> Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

pub fn opt_time_col(row: &Row<'_>, idx: usize) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let conn = open_in_memory().unwrap();
        let settings = Settings::default();
        seed_defaults(&conn, &settings).await.unwrap();
        seed_defaults(&conn, &settings).await.unwrap();

        let guard = conn.lock().await;
        let users: i64 = guard
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap();
        let prefs: i64 = guard
            .query_row("SELECT COUNT(*) FROM user_preferences", [], |r| r.get(0))
            .unwrap();
        assert_eq!(users, 1);
        assert_eq!(prefs, 1);
    }

    #[tokio::test]
    async fn component_state_upserts() {
        let conn = open_in_memory().unwrap();
        record_component_state(&conn, "voice", "active", None).await.unwrap();
        record_component_state(&conn, "voice", "stopped", None).await.unwrap();
        assert_eq!(
            component_status(&conn, "voice").await.unwrap().as_deref(),
            Some("stopped")
        );
        assert_eq!(component_status(&conn, "llm").await.unwrap(), None);
    }
}
