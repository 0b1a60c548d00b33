use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{hash_password, user_from_row, USER_COLUMNS};
use crate::db::DbConnection;
use crate::error::{conflict_on_unique, AppError, AppResult};
use crate::models::{Role, User};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
    pub permissions: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

fn default_role() -> Role {
    Role::User
}

#[derive(Debug, Default, Deserialize)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
    pub permissions: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

fn validate_username(raw: &str) -> AppResult<String> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(AppError::bad_request("username must not be empty"));
    }
    Ok(username.to_string())
}

fn validate_email(raw: &str) -> AppResult<String> {
    let email = raw.trim();
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(AppError::bad_request("email is not valid"));
    }
    Ok(email.to_lowercase())
}

fn validate_password(raw: &str) -> AppResult<&str> {
    if raw.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(raw)
}

#[derive(Clone)]
pub struct UserDirectory {
    db: DbConnection,
}

impl UserDirectory {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    pub async fn list(&self) -> AppResult<Vec<User>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map([], user_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<User> {
        self.db
            .lock()
            .await
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
                [id.to_string()],
                user_from_row,
            )
            .optional()?
            .ok_or(AppError::NotFound("user"))
    }

    pub async fn create(&self, input: NewUser) -> AppResult<User> {
        let username = validate_username(&input.username)?;
        let email = validate_email(&input.email)?;
        let password_hash = hash_password(validate_password(&input.password)?)?;
        let permissions = input
            .permissions
            .unwrap_or_else(|| input.role.default_permissions());

        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        self.db
            .lock()
            .await
            .execute(
                "INSERT INTO users (id, username, email, password_hash, role, is_active, permissions, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    id.to_string(),
                    username,
                    email,
                    password_hash,
                    input.role.as_str(),
                    input.is_active.unwrap_or(true),
                    serde_json::to_string(&permissions)?,
                    now
                ],
            )
            .map_err(|e| conflict_on_unique(e, "username or email"))?;

        tracing::info!(%username, role = input.role.as_str(), "user created");
        self.get(id).await
    }

    pub async fn update(&self, id: Uuid, changes: UserUpdate) -> AppResult<User> {
        let mut user = self.get(id).await?;

        if let Some(username) = changes.username {
            user.username = validate_username(&username)?;
        }
        if let Some(email) = changes.email {
            user.email = validate_email(&email)?;
        }
        if let Some(password) = changes.password {
            user.password_hash = hash_password(validate_password(&password)?)?;
        }
        match (changes.role, changes.permissions) {
            (_, Some(permissions)) => {
                if let Some(role) = changes.role {
                    user.role = role;
                }
                user.permissions = permissions;
            }
            (Some(role), None) if role != user.role => {
                user.role = role;
                user.permissions = role.default_permissions();
            }
            _ => {}
        }
        if let Some(active) = changes.is_active {
            user.is_active = active;
        }
        user.updated_at = Utc::now();

        self.db
            .lock()
            .await
            .execute(
                "UPDATE users SET username = ?1, email = ?2, password_hash = ?3, role = ?4,
                    is_active = ?5, permissions = ?6, updated_at = ?7
                 WHERE id = ?8",
                params![
                    user.username,
                    user.email,
                    user.password_hash,
                    user.role.as_str(),
                    user.is_active,
                    serde_json::to_string(&user.permissions)?,
                    user.updated_at.to_rfc3339(),
                    id.to_string()
                ],
            )
            .map_err(|e| conflict_on_unique(e, "username or email"))?;

        if !user.is_active {
            // Disabled accounts lose their sessions.
            self.db
                .lock()
                .await
                .execute("DELETE FROM auth_tokens WHERE user_id = ?", [id.to_string()])?;
        }
        Ok(user)
    }

    pub async fn delete(&self, id: Uuid, acting_user: Uuid) -> AppResult<()> {
        if id == acting_user {
            return Err(AppError::bad_request("you cannot delete your own account"));
        }
        let removed = self
            .db
            .lock()
            .await
            .execute("DELETE FROM users WHERE id = ?", [id.to_string()])?;
        if removed == 0 {
            return Err(AppError::NotFound("user"));
        }
        tracing::info!(%id, by = %acting_user, "user deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn new_user(username: &str, email: &str, role: Role) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            password: "secret123".into(),
            role,
            permissions: None,
            is_active: None,
        }
    }

    #[tokio::test]
    async fn create_assigns_role_defaults() {
        let users = UserDirectory::new(open_in_memory().unwrap());
        let guest = users
            .create(new_user("visitor", "Visitor@Smash.Cloud", Role::Guest))
            .await
            .unwrap();
        assert_eq!(guest.permissions, vec!["read"]);
        assert_eq!(guest.email, "visitor@smash.cloud");
        assert!(guest.is_active);
    }

    #[tokio::test]
    async fn duplicates_conflict() {
        let users = UserDirectory::new(open_in_memory().unwrap());
        users.create(new_user("ana", "ana@smash.cloud", Role::User)).await.unwrap();
        let err = users
            .create(new_user("ana", "other@smash.cloud", Role::User))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn role_change_resets_permissions_unless_given() {
        let users = UserDirectory::new(open_in_memory().unwrap());
        let user = users.create(new_user("bo", "bo@smash.cloud", Role::User)).await.unwrap();

        let promoted = users
            .update(
                user.id,
                UserUpdate {
                    role: Some(Role::Admin),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(promoted.permissions.contains(&"manage_users".to_string()));

        let custom = users
            .update(
                user.id,
                UserUpdate {
                    role: Some(Role::Guest),
                    permissions: Some(vec!["read".into(), "write".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(custom.role, Role::Guest);
        assert_eq!(custom.permissions, vec!["read", "write"]);
    }

    #[tokio::test]
    async fn validation_rejects_bad_input() {
        let users = UserDirectory::new(open_in_memory().unwrap());
        let mut short = new_user("cy", "cy@smash.cloud", Role::User);
        short.password = "123".into();
        assert!(matches!(users.create(short).await, Err(AppError::BadRequest(_))));
        assert!(matches!(
            users.create(new_user("cy", "not-an-email", Role::User)).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn cannot_delete_self() {
        let users = UserDirectory::new(open_in_memory().unwrap());
        let user = users.create(new_user("di", "di@smash.cloud", Role::Admin)).await.unwrap();
        assert!(matches!(
            users.delete(user.id, user.id).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            users.delete(Uuid::new_v4(), user.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
