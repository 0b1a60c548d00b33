use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Multipart, State,
    },
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppPath};
use crate::state::AppState;
use crate::voice::VoiceProcessor;

/// Collects the bytes of the first uploaded file in the form.
pub(crate) async fn read_upload(multipart: &mut Multipart) -> AppResult<Option<(String, String, Vec<u8>)>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.body_text()))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let mime = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "audio/wav".to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;
        return Ok(Some((filename, mime, data.to_vec())));
    }
    Ok(None)
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum ListenOutcome {
    Heard {
        success: bool,
        transcript: String,
        response: String,
        audio_url: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Ignored {
        success: bool,
        message: &'static str,
    },
}

pub async fn listen(State(state): State<AppState>, mut multipart: Multipart) -> AppResult<Json<ListenOutcome>> {
    let (_, _, audio) = read_upload(&mut multipart)
        .await?
        .ok_or_else(|| AppError::bad_request("no audio uploaded"))?;

    let outcome = match state.voice.process_audio(audio).await {
        Some(reply) => ListenOutcome::Heard {
            success: true,
            transcript: reply.transcript,
            response: reply.text,
            audio_url: reply.audio_url,
            timestamp: reply.timestamp,
        },
        None => ListenOutcome::Ignored {
            success: false,
            message: "No voice activation detected or processing failed",
        },
    };
    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct SpeakRequest {
    text: String,
}

pub async fn speak(State(state): State<AppState>, AppJson(input): AppJson<SpeakRequest>) -> AppResult<Json<Value>> {
    let text = input.text.trim();
    if text.is_empty() {
        return Err(AppError::bad_request("text is required"));
    }
    let audio_url = state
        .voice
        .text_to_speech(text)
        .await
        .ok_or_else(|| AppError::Upstream("failed to generate speech".into()))?;
    Ok(Json(json!({ "success": true, "audio_url": audio_url, "text": text })))
}

pub async fn audio_file(State(state): State<AppState>, AppPath(filename): AppPath<String>) -> AppResult<Response> {
    let path = state
        .voice
        .audio_path(&filename)
        .ok_or(AppError::NotFound("audio file"))?;
    let handle = tokio::fs::File::open(&path)
        .await
        .map_err(|_| AppError::NotFound("audio file"))?;
    let mime_type = mime_guess::from_path(&path).first_or_octet_stream().to_string();
    Ok((
        [(header::CONTENT_TYPE, mime_type)],
        Body::from_stream(ReaderStream::new(handle)),
    )
        .into_response())
}

pub async fn activate(State(state): State<AppState>) -> Json<Value> {
    state.voice.start_listening();
    Json(json!({ "success": true, "message": "Voice listening activated", "listening": true }))
}

pub async fn deactivate(State(state): State<AppState>) -> Json<Value> {
    state.voice.stop_listening();
    Json(json!({ "success": true, "message": "Voice listening deactivated", "listening": false }))
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "listening": state.voice.is_listening(),
        "speaking": state.voice.is_speaking(),
        "voice_mode": state.settings.voice_mode,
        "voice_id": state.settings.voice_id,
    }))
}

pub async fn voice_socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| voice_session(socket, state.voice))
}

async fn voice_session(mut socket: WebSocket, voice: Arc<VoiceProcessor>) {
    tracing::info!("voice socket connected");
    while let Some(Ok(message)) = socket.recv().await {
        let audio = match message {
            Message::Binary(audio) => audio,
            Message::Close(_) => break,
            _ => continue,
        };
        let Some(reply) = voice.process_audio(audio).await else {
            continue;
        };
        let frame = json!({
            "type": "response",
            "text": reply.text,
            "audio_url": reply.audio_url,
            "timestamp": reply.timestamp,
        });
        if socket.send(Message::Text(frame.to_string())).await.is_err() {
            break;
        }
    }
    tracing::info!("voice socket disconnected");
}
