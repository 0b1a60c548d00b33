use crate::db::{opt_time_col, time_col, uuid_col, DbConnection};
use crate::error::{AppError, AppResult};
use crate::models::{Role, User};
use crate::state::AppState;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rand::Rng;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

pub const USER_COLUMNS: &str =
    "id, username, email, password_hash, role, is_active, permissions, created_at, updated_at, last_login";

pub fn hash_password(password: &str) -> AppResult<String> {
    Ok(hash(password, DEFAULT_COST)?)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    verify(password, hash).unwrap_or(false)
}

pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

pub fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(4)?;
    let permissions: String = row.get(6)?;
    Ok(User {
        id: uuid_col(row, 0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: Role::parse(&role).unwrap_or(Role::Guest),
        is_active: row.get(5)?,
        permissions: serde_json::from_str(&permissions).unwrap_or_default(),
        created_at: time_col(row, 7)?,
        updated_at: time_col(row, 8)?,
        last_login: opt_time_col(row, 9)?,
    })
}

pub async fn create_auth_token(conn: &DbConnection, user_id: &Uuid) -> Result<String, rusqlite::Error> {
    let token = generate_token();
    let now = Utc::now();

    conn.lock().await.execute(
        "INSERT INTO auth_tokens (token, user_id, created_at) VALUES (?, ?, ?)",
        params![token, user_id.to_string(), now.to_rfc3339()],
    )?;

    Ok(token)
}

/// Resolves a token to its user, or `None` when the token is unknown.
pub async fn verify_auth_token(conn: &DbConnection, token: &str) -> Result<Option<User>, rusqlite::Error> {
    conn.lock()
        .await
        .query_row(
            &format!(
                "SELECT {} FROM users WHERE id = (SELECT user_id FROM auth_tokens WHERE token = ?)",
                USER_COLUMNS
            ),
            [token],
            user_from_row,
        )
        .optional()
}

pub async fn revoke_auth_token(conn: &DbConnection, token: &str) -> Result<bool, rusqlite::Error> {
    let removed = conn
        .lock()
        .await
        .execute("DELETE FROM auth_tokens WHERE token = ?", [token])?;
    Ok(removed > 0)
}

/// Looks up the user for `email` and checks the password. Inactive accounts
/// are rejected even with valid credentials.
pub async fn authenticate(conn: &DbConnection, email: &str, password: &str) -> AppResult<User> {
    let user = conn
        .lock()
        .await
        .query_row(
            &format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS),
            [email.trim().to_lowercase()],
            user_from_row,
        )
        .optional()?;

    let user = match user {
        Some(user) if verify_password(password, &user.password_hash) => user,
        _ => return Err(AppError::Unauthorized("invalid credentials")),
    };
    if !user.is_active {
        return Err(AppError::Forbidden("account is disabled"));
    }

    let now = Utc::now();
    conn.lock().await.execute(
        "UPDATE users SET last_login = ? WHERE id = ?",
        params![now.to_rfc3339(), user.id.to_string()],
    )?;
    Ok(User {
        last_login: Some(now),
        ..user
    })
}

/// Pulls the token out of an `Authorization` header value. Both
/// `Bearer <token>` and a bare token are accepted.
pub fn token_from_header(value: &str) -> Option<&str> {
    let value = value.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value)
        .trim();
    (!token.is_empty()).then_some(token)
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

impl AuthUser {
    pub fn require(&self, permission: &str) -> AppResult<()> {
        if self.user.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(user = %self.user.username, permission, "permission denied");
            Err(AppError::Forbidden("insufficient permissions"))
        }
    }
}

pub async fn resolve_token(conn: &DbConnection, token: &str) -> AppResult<AuthUser> {
    let user = verify_auth_token(conn, token)
        .await?
        .ok_or(AppError::Unauthorized("invalid token"))?;
    if !user.is_active {
        return Err(AppError::Forbidden("account is disabled"));
    }
    Ok(AuthUser {
        user,
        token: token.to_string(),
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(token_from_header)
            .ok_or(AppError::Unauthorized("missing token"))?;
        resolve_token(&state.db, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_32_alphanumerics() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn header_accepts_bearer_and_bare_tokens() {
        assert_eq!(token_from_header("Bearer abc123"), Some("abc123"));
        assert_eq!(token_from_header("abc123"), Some("abc123"));
        assert_eq!(token_from_header("Bearer   "), None);
        assert_eq!(token_from_header(""), None);
    }

    #[test]
    fn password_roundtrip() {
        let hashed = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hashed));
        assert!(!verify_password("hunter23", &hashed));
        assert!(!verify_password("hunter22", "not-a-hash"));
    }

    #[tokio::test]
    async fn revoked_token_no_longer_resolves() {
        let conn = crate::db::open_in_memory().unwrap();
        crate::db::seed_defaults(&conn, &crate::config::Settings::default())
            .await
            .unwrap();
        let user = authenticate(&conn, "admin@smash.cloud", "admin123").await.unwrap();
        assert!(user.last_login.is_some());

        let token = create_auth_token(&conn, &user.id).await.unwrap();
        assert!(verify_auth_token(&conn, &token).await.unwrap().is_some());
        assert!(revoke_auth_token(&conn, &token).await.unwrap());
        assert!(verify_auth_token(&conn, &token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let conn = crate::db::open_in_memory().unwrap();
        crate::db::seed_defaults(&conn, &crate::config::Settings::default())
            .await
            .unwrap();
        let err = authenticate(&conn, "admin@smash.cloud", "nope").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
