use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::{time_col, uuid_col, DbConnection};
use crate::error::{AppError, AppResult};
use crate::models::{FileItem, FileKind, FileStats};

const COLUMNS: &str = "id, name, kind, size_bytes, permissions, uploaded_by, mime_type, extension, storage_path, is_public, public_url, modified_at";
const CHANGE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub action: ChangeAction,
    pub file_id: Uuid,
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} PB")
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileItem> {
    let kind: String = row.get(2)?;
    let kind = if kind == "folder" {
        FileKind::Folder
    } else {
        FileKind::File
    };
    let size_bytes: i64 = row.get(3)?;
    let size_bytes = size_bytes.max(0) as u64;
    Ok(FileItem {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        kind,
        size: match kind {
            FileKind::Folder => "-".to_string(),
            FileKind::File => format_bytes(size_bytes),
        },
        size_bytes,
        permissions: row.get(4)?,
        uploaded_by: row.get(5)?,
        mime_type: row.get(6)?,
        extension: row.get(7)?,
        storage_path: row.get(8)?,
        is_public: row.get(9)?,
        public_url: row.get(10)?,
        modified: time_col(row, 11)?,
    })
}

/// Trimmed display name. Rejects anything that could act as a path.
pub fn clean_name(raw: &str) -> AppResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(AppError::bad_request("name must not contain path separators"));
    }
    Ok(name.to_string())
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// The shared file list. Every mutation is announced to subscribers after it
/// commits, in commit order. Announcements go out while the connection lock
/// is still held, so two writers can never swap their notifications.
#[derive(Clone)]
pub struct FileRegistry {
    db: DbConnection,
    storage_dir: PathBuf,
    changes: broadcast::Sender<FileChange>,
}

impl FileRegistry {
    pub fn new(db: DbConnection, storage_dir: impl Into<PathBuf>) -> Self {
        Self::with_capacity(db, storage_dir, CHANGE_CAPACITY)
    }

    /// `capacity` is how many changes a slow subscriber may fall behind
    /// before it sees `RecvError::Lagged`.
    pub fn with_capacity(db: DbConnection, storage_dir: impl Into<PathBuf>, capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity);
        Self {
            db,
            storage_dir: storage_dir.into(),
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FileChange> {
        self.changes.subscribe()
    }

    fn notify(&self, action: ChangeAction, file_id: Uuid) {
        // No receivers is fine: nobody is watching.
        let _ = self.changes.send(FileChange { action, file_id });
        tracing::debug!(?action, %file_id, "file change broadcast");
    }

    pub async fn list_files(&self) -> AppResult<Vec<FileItem>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM files ORDER BY seq"))?;
        let rows = stmt.query_map([], file_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn get_file(&self, id: Uuid) -> AppResult<FileItem> {
        self.db
            .lock()
            .await
            .query_row(
                &format!("SELECT {COLUMNS} FROM files WHERE id = ?"),
                [id.to_string()],
                file_from_row,
            )
            .optional()?
            .ok_or(AppError::NotFound("file"))
    }

    async fn insert(&self, item: &FileItem) -> AppResult<()> {
        let now = item.modified.to_rfc3339();
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO files (id, name, kind, size_bytes, permissions, uploaded_by, mime_type, extension, storage_path, is_public, public_url, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, NULL, ?10, ?10)",
            params![
                item.id.to_string(),
                item.name,
                item.kind.as_str(),
                item.size_bytes as i64,
                item.permissions,
                item.uploaded_by,
                item.mime_type,
                item.extension,
                item.storage_path,
                now
            ],
        )?;
        self.notify(ChangeAction::Created, item.id);
        Ok(())
    }

    pub async fn upload(&self, name: &str, data: &[u8], uploader: &str) -> AppResult<FileItem> {
        let name = clean_name(name)?;
        let id = Uuid::new_v4();

        tokio::fs::create_dir_all(&self.storage_dir).await?;
        let path = self.storage_dir.join(id.to_string());
        tokio::fs::write(&path, data).await?;

        let item = FileItem {
            id,
            kind: FileKind::File,
            size: format_bytes(data.len() as u64),
            size_bytes: data.len() as u64,
            modified: Utc::now(),
            permissions: FileKind::File.default_permissions().to_string(),
            uploaded_by: Some(uploader.to_string()),
            mime_type: Some(mime_guess::from_path(&name).first_or_octet_stream().to_string()),
            extension: extension_of(&name),
            is_public: false,
            public_url: None,
            storage_path: Some(path.to_string_lossy().into_owned()),
            name,
        };

        if let Err(err) = self.insert(&item).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(err);
        }
        tracing::info!(file = %item.name, size = item.size_bytes, uploader, "file uploaded");
        Ok(item)
    }

    pub async fn create_folder(&self, name: &str, creator: &str) -> AppResult<FileItem> {
        let name = clean_name(name)?;
        let item = FileItem {
            id: Uuid::new_v4(),
            name,
            kind: FileKind::Folder,
            size: "-".to_string(),
            size_bytes: 0,
            modified: Utc::now(),
            permissions: FileKind::Folder.default_permissions().to_string(),
            uploaded_by: Some(creator.to_string()),
            mime_type: None,
            extension: None,
            is_public: false,
            public_url: None,
            storage_path: None,
        };
        self.insert(&item).await?;
        Ok(item)
    }

    pub async fn rename(&self, id: Uuid, new_name: &str) -> AppResult<FileItem> {
        let name = clean_name(new_name)?;
        {
            let conn = self.db.lock().await;
            let updated = conn.execute(
                "UPDATE files SET name = ?1, modified_at = ?2 WHERE id = ?3",
                params![name, Utc::now().to_rfc3339(), id.to_string()],
            )?;
            if updated == 0 {
                return Err(AppError::NotFound("file"));
            }
            self.notify(ChangeAction::Updated, id);
        }
        self.get_file(id).await
    }

    /// Removes the record and its stored bytes. `false` when the id is unknown.
    pub async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let storage_path: Option<Option<String>> = {
            let conn = self.db.lock().await;
            let path = conn
                .query_row(
                    "SELECT storage_path FROM files WHERE id = ?",
                    [id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if path.is_some() {
                conn.execute("DELETE FROM files WHERE id = ?", [id.to_string()])?;
                self.notify(ChangeAction::Deleted, id);
            }
            path
        };

        let Some(storage_path) = storage_path else {
            return Ok(false);
        };
        if let Some(path) = storage_path {
            if let Err(err) = tokio::fs::remove_file(&path).await {
                tracing::warn!(%path, error = %err, "stored bytes already gone");
            }
        }
        Ok(true)
    }

    pub async fn make_public(&self, id: Uuid) -> AppResult<FileItem> {
        let public_url = format!("/public/{}", id);
        {
            let conn = self.db.lock().await;
            let updated = conn.execute(
                "UPDATE files SET is_public = 1, public_url = ?1, modified_at = ?2 WHERE id = ?3 AND kind = 'file'",
                params![public_url, Utc::now().to_rfc3339(), id.to_string()],
            )?;
            if updated == 0 {
                return Err(AppError::NotFound("file"));
            }
            self.notify(ChangeAction::Updated, id);
        }
        self.get_file(id).await
    }

    pub async fn public_file(&self, id: Uuid) -> AppResult<FileItem> {
        let file = self.get_file(id).await?;
        if !file.is_public || file.storage_path.is_none() {
            return Err(AppError::NotFound("file"));
        }
        Ok(file)
    }

    pub async fn stats(&self) -> AppResult<FileStats> {
        let (files, folders, total): (i64, i64, i64) = self.db.lock().await.query_row(
            "SELECT
                COALESCE(SUM(kind = 'file'), 0),
                COALESCE(SUM(kind = 'folder'), 0),
                COALESCE(SUM(size_bytes), 0)
             FROM files",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let total_size_bytes = total.max(0) as u64;
        Ok(FileStats {
            total_files: (files + folders) as u64,
            total_size: format_bytes(total_size_bytes),
            total_size_bytes,
            files: files as u64,
            folders: folders as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn registry(dir: &Path) -> FileRegistry {
        FileRegistry::new(open_in_memory().unwrap(), dir)
    }

    #[test]
    fn formats_sizes_like_the_dashboard() {
        assert_eq!(format_bytes(0), "0.0 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GB");
    }

    #[test]
    fn rejects_path_like_names() {
        assert!(clean_name("  ").is_err());
        assert!(clean_name("../etc/passwd").is_err());
        assert!(clean_name("a\\b").is_err());
        assert_eq!(clean_name(" report.pdf ").unwrap(), "report.pdf");
    }

    #[tokio::test]
    async fn upload_stores_bytes_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let files = registry(dir.path());
        let item = files
            .upload("Notes.TXT", b"hello smash", "admin@smash.cloud")
            .await
            .unwrap();

        assert_eq!(item.extension.as_deref(), Some("txt"));
        assert_eq!(item.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(item.permissions, "rw-r--r--");
        let stored = std::fs::read(dir.path().join(item.id.to_string())).unwrap();
        assert_eq!(stored, b"hello smash");
    }

    #[tokio::test]
    async fn subscribers_see_changes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let files = registry(dir.path());
        let mut rx = files.subscribe();

        let folder = files.create_folder("Projects", "ops").await.unwrap();
        files.rename(folder.id, "Archive").await.unwrap();
        assert!(files.delete(folder.id).await.unwrap());

        let seen: Vec<ChangeAction> = (0..3).map(|_| rx.try_recv().unwrap().action).collect();
        assert_eq!(
            seen,
            vec![ChangeAction::Created, ChangeAction::Updated, ChangeAction::Deleted]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_notify_in_commit_order() {
        let dir = tempfile::tempdir().unwrap();
        let files = registry(dir.path());
        let mut rx = files.subscribe();

        let writers: Vec<_> = (0..32)
            .map(|i| {
                let files = files.clone();
                tokio::spawn(async move { files.create_folder(&format!("dir-{i}"), "ops").await.unwrap() })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let announced: Vec<Uuid> = (0..32).map(|_| rx.try_recv().unwrap().file_id).collect();
        let committed: Vec<Uuid> = files.list_files().await.unwrap().into_iter().map(|f| f.id).collect();
        assert_eq!(announced, committed);
    }

    #[tokio::test]
    async fn unknown_ids_do_not_notify() {
        let dir = tempfile::tempdir().unwrap();
        let files = registry(dir.path());
        let mut rx = files.subscribe();

        assert!(!files.delete(Uuid::new_v4()).await.unwrap());
        assert!(matches!(
            files.rename(Uuid::new_v4(), "x").await.unwrap_err(),
            AppError::NotFound(_)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stats_count_files_and_folders() {
        let dir = tempfile::tempdir().unwrap();
        let files = registry(dir.path());
        files.create_folder("Music", "ops").await.unwrap();
        files.upload("a.bin", &[0u8; 2048], "ops").await.unwrap();
        files.upload("b.bin", &[0u8; 1024], "ops").await.unwrap();

        let stats = files.stats().await.unwrap();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.folders, 1);
        assert_eq!(stats.total_size_bytes, 3072);
        assert_eq!(stats.total_size, "3.0 KB");

        let names: Vec<String> = files
            .list_files()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["Music", "a.bin", "b.bin"]);
    }

    #[tokio::test]
    async fn folders_cannot_be_made_public() {
        let dir = tempfile::tempdir().unwrap();
        let files = registry(dir.path());
        let folder = files.create_folder("Shared", "ops").await.unwrap();
        assert!(files.make_public(folder.id).await.is_err());

        let file = files.upload("pic.png", b"png", "ops").await.unwrap();
        let public = files.make_public(file.id).await.unwrap();
        assert_eq!(public.public_url, Some(format!("/public/{}", file.id)));
        assert!(files.public_file(file.id).await.is_ok());
    }
}
