use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Guest,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Guest => "guest",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            "guest" => Some(Role::Guest),
            _ => None,
        }
    }

    pub fn default_permissions(self) -> Vec<String> {
        let perms: &[&str] = match self {
            Role::Admin => &[
                "read",
                "write",
                "delete",
                "admin",
                "manage_users",
                "system_control",
            ],
            Role::User => &["read", "write"],
            Role::Guest => &["read"],
        };
        perms.iter().map(|p| p.to_string()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.role == Role::Admin || self.permissions.iter().any(|p| p == permission)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Folder,
}

impl FileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::File => "file",
            FileKind::Folder => "folder",
        }
    }

    pub fn default_permissions(self) -> &'static str {
        match self {
            FileKind::File => "rw-r--r--",
            FileKind::Folder => "rwxr-xr-x",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileItem {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    /// Human readable size, `-` for folders.
    pub size: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    pub permissions: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    pub is_public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(skip)]
    pub storage_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    pub total_files: u64,
    pub total_size: String,
    pub total_size_bytes: u64,
    pub files: u64,
    pub folders: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub user_message: String,
    pub assistant_response: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
}

/// A learned question/answer pair. The console calls these training examples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningData {
    pub id: i64,
    #[serde(rename = "question")]
    pub pattern: String,
    #[serde(rename = "answer")]
    pub response: String,
    pub category: String,
    pub confidence: f64,
    pub usage_count: i64,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: String,
    pub preferred_tone: String,
    pub learning_enabled: bool,
    pub context_memory_size: i64,
    pub custom_greeting: Option<String>,
    pub voice_settings: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// One turn of the in-memory conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Speaker,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_permissions_follow_hierarchy() {
        assert_eq!(Role::Guest.default_permissions(), vec!["read"]);
        assert_eq!(Role::User.default_permissions(), vec!["read", "write"]);
        let admin = Role::Admin.default_permissions();
        assert!(admin.contains(&"manage_users".to_string()));
        assert!(admin.contains(&"system_control".to_string()));
    }

    #[test]
    fn admin_passes_every_permission_check() {
        let now = Utc::now();
        let mut user = User {
            id: Uuid::new_v4(),
            username: "ops".into(),
            email: "ops@smash.cloud".into(),
            password_hash: String::new(),
            role: Role::Admin,
            is_active: true,
            permissions: vec![],
            created_at: now,
            updated_at: now,
            last_login: None,
        };
        assert!(user.has_permission("delete"));
        user.role = Role::Guest;
        assert!(!user.has_permission("delete"));
    }

    #[test]
    fn file_item_serializes_type_field() {
        let item = FileItem {
            id: Uuid::nil(),
            name: "docs".into(),
            kind: FileKind::Folder,
            size: "-".into(),
            size_bytes: 0,
            modified: Utc::now(),
            permissions: FileKind::Folder.default_permissions().into(),
            uploaded_by: None,
            mime_type: None,
            extension: None,
            is_public: false,
            public_url: None,
            storage_path: Some("secret/path".into()),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "folder");
        assert!(json.get("storage_path").is_none());
        assert!(json.get("mime_type").is_none());
    }
}
