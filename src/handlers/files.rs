use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Multipart, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::auth::{resolve_token, AuthUser};
use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::files::{clean_name, FileChange, FileRegistry};
use crate::models::{FileItem, FileStats};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct NewFolder {
    name: String,
}

#[derive(Deserialize)]
pub struct RenameFile {
    name: String,
}

pub async fn get_files(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<FileItem>>> {
    auth.require("read")?;
    Ok(Json(state.files.list_files().await?))
}

pub async fn get_file_stats(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<FileStats>> {
    auth.require("read")?;
    Ok(Json(state.files.stats().await?))
}

pub async fn get_file(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(file_id): AppPath<Uuid>,
) -> AppResult<Json<FileItem>> {
    auth.require("read")?;
    Ok(Json(state.files.get_file(file_id).await?))
}

pub async fn upload_file(
    State(state): State<AppState>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    auth.require("write")?;

    // Read and check every part first so a bad part stores nothing.
    let mut parts = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.body_text()))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        clean_name(&filename)?;
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;
        parts.push((filename, data));
    }
    if parts.is_empty() {
        return Err(AppError::bad_request("no file uploaded"));
    }

    let mut uploaded = Vec::with_capacity(parts.len());
    for (filename, data) in parts {
        uploaded.push(state.files.upload(&filename, &data, &auth.user.email).await?);
    }
    Ok((StatusCode::CREATED, Json(uploaded)))
}

pub async fn create_folder(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(folder): AppJson<NewFolder>,
) -> AppResult<impl IntoResponse> {
    auth.require("write")?;
    let item = state.files.create_folder(&folder.name, &auth.user.email).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn rename_file(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(file_id): AppPath<Uuid>,
    AppJson(rename): AppJson<RenameFile>,
) -> AppResult<Json<FileItem>> {
    auth.require("write")?;
    Ok(Json(state.files.rename(file_id, &rename.name).await?))
}

pub async fn delete_file(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(file_id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    auth.require("delete")?;
    if state.files.delete(file_id).await? {
        tracing::info!(%file_id, by = %auth.user.username, "file deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("file"))
    }
}

pub async fn make_file_public(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(file_id): AppPath<Uuid>,
) -> AppResult<Json<FileItem>> {
    auth.require("write")?;
    Ok(Json(state.files.make_public(file_id).await?))
}

async fn stream_file(file: &FileItem, cache_control: &'static str, attachment: bool) -> AppResult<Response> {
    let path = file.storage_path.as_deref().ok_or(AppError::NotFound("file"))?;
    let handle = tokio::fs::File::open(path)
        .await
        .map_err(|_| AppError::NotFound("file"))?;
    let body = Body::from_stream(ReaderStream::new(handle));

    let mime_type = file
        .mime_type
        .clone()
        .unwrap_or_else(|| mime_guess::from_path(&file.name).first_or_octet_stream().to_string());

    let mut response = (
        [
            (header::CONTENT_TYPE, mime_type),
            (header::CACHE_CONTROL, cache_control.to_string()),
        ],
        body,
    )
        .into_response();
    if attachment {
        let disposition = format!("attachment; filename=\"{}\"", file.name.replace('"', ""));
        if let Ok(value) = disposition.parse() {
            response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
        }
    }
    Ok(response)
}

pub async fn download_file(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(file_id): AppPath<Uuid>,
) -> AppResult<Response> {
    auth.require("read")?;
    let file = state.files.get_file(file_id).await?;
    stream_file(&file, "private, no-cache", true).await
}

pub async fn serve_public_file(
    State(state): State<AppState>,
    AppPath(file_id): AppPath<Uuid>,
) -> AppResult<Response> {
    let file = state.files.public_file(file_id).await?;
    stream_file(&file, "public, max-age=31536000", false).await
}

#[derive(Deserialize)]
pub struct SocketAuth {
    token: String,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum FileFeed<'a> {
    Snapshot {
        files: Vec<FileItem>,
        stats: FileStats,
    },
    Change {
        #[serde(flatten)]
        change: &'a FileChange,
        files: Vec<FileItem>,
        stats: FileStats,
    },
}

/// Live file list. Browsers cannot set headers on a WebSocket handshake, so
/// the token travels in the query string.
pub async fn file_events(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<SocketAuth>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let auth = resolve_token(&state.db, &query.token).await?;
    auth.require("read")?;
    let user = auth.user.username;
    Ok(ws.on_upgrade(move |socket| watch_files(socket, state.files, user)))
}

async fn feed_message(files: &FileRegistry, change: Option<&FileChange>) -> AppResult<Message> {
    let listing = files.list_files().await?;
    let stats = files.stats().await?;
    let frame = match change {
        Some(change) => FileFeed::Change {
            change,
            files: listing,
            stats,
        },
        None => FileFeed::Snapshot { files: listing, stats },
    };
    Ok(Message::Text(serde_json::to_string(&frame)?))
}

async fn watch_files(mut socket: WebSocket, files: FileRegistry, user: String) {
    tracing::info!(%user, "file feed connected");
    if let Err(err) = run_feed(&mut socket, &files, &user).await {
        tracing::error!(%user, error = %err, "file feed query failed");
        let frame = json!({ "type": "error", "message": "file listing unavailable" });
        let _ = socket.send(Message::Text(frame.to_string())).await;
    }
    tracing::info!(%user, "file feed disconnected");
}

/// The frame to send for one broadcast result, `None` once the registry is
/// gone. A lagged subscriber gets a fresh snapshot instead of the changes it
/// missed.
async fn frame_for(
    files: &FileRegistry,
    received: Result<FileChange, RecvError>,
    user: &str,
) -> AppResult<Option<Message>> {
    match received {
        Ok(change) => feed_message(files, Some(&change)).await.map(Some),
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(%user, skipped, "file feed lagged, resending snapshot");
            feed_message(files, None).await.map(Some)
        }
        Err(RecvError::Closed) => Ok(None),
    }
}

/// Returns `Ok` once the client goes away.
async fn run_feed(socket: &mut WebSocket, files: &FileRegistry, user: &str) -> AppResult<()> {
    // Subscribe before the snapshot so nothing committed in between is lost.
    let mut changes = files.subscribe();
    let mut outgoing = feed_message(files, None).await?;
    loop {
        if socket.send(outgoing).await.is_err() {
            return Ok(());
        }
        outgoing = loop {
            tokio::select! {
                received = changes.recv() => match frame_for(files, received, user).await? {
                    Some(message) => break message,
                    None => return Ok(()),
                },
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Ok(()),
                    Some(Ok(_)) => {}
                },
            }
        };
    }
}
