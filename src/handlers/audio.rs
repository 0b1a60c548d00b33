use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::extract::AppJson;
use crate::handlers::voice::read_upload;
use crate::state::AppState;
use crate::voice::TTS_PREFIX;

#[derive(Serialize)]
pub struct TranscribeResponse {
    success: bool,
    text: String,
    confidence: f64,
}

pub async fn transcribe(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<TranscribeResponse>> {
    let (filename, mime, audio) = read_upload(&mut multipart)
        .await?
        .ok_or_else(|| AppError::bad_request("no audio uploaded"))?;
    let transcription = state.voice.transcribe(audio, &filename, &mime).await?;
    Ok(Json(TranscribeResponse {
        success: true,
        text: transcription.text,
        confidence: transcription.confidence,
    }))
}

#[derive(Deserialize)]
pub struct SynthesizeRequest {
    text: String,
    voice_id: Option<String>,
}

#[derive(Serialize)]
pub struct SynthesizeResponse {
    success: bool,
    audio_url: String,
    text: String,
}

pub async fn synthesize(
    State(state): State<AppState>,
    AppJson(input): AppJson<SynthesizeRequest>,
) -> AppResult<Json<SynthesizeResponse>> {
    let text = input.text.trim();
    if text.is_empty() {
        return Err(AppError::bad_request("text is required"));
    }
    let engine = state.voice.engine_for_voice(input.voice_id.as_deref());
    let audio_url = state.voice.synthesize(text, &engine, TTS_PREFIX).await?;
    Ok(Json(SynthesizeResponse {
        success: true,
        audio_url,
        text: text.to_string(),
    }))
}
