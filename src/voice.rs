//! Speech in, speech out. Transcription goes to a Whisper service, synthesis
//! to ElevenLabs when a key is configured and Piper otherwise. Synthesised
//! audio lands in the static directory and is served from `/static`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use reqwest::{multipart, Client};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{AppError, AppResult};
use crate::llm::Assistant;

const ACTIVATION_PHRASES: [&str; 7] = [
    "hey smash",
    "okay smash",
    "listen smash",
    "smash",
    "jarvis",
    "hey jarvis",
    "okay jarvis",
];

/// File name prefix for spoken assistant replies.
pub const REPLY_PREFIX: &str = "jarvis";
/// File name prefix for `/api/audio/synthesize` output.
pub const TTS_PREFIX: &str = "tts";

pub fn is_voice_activated(text: &str) -> bool {
    let lower = text.to_lowercase();
    ACTIVATION_PHRASES.iter().any(|p| lower.contains(p))
}

/// Accepts plain file names only.
pub fn safe_audio_name(name: &str) -> Option<&str> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    valid.then_some(name)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceReply {
    pub transcript: String,
    pub text: String,
    pub audio_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub confidence: f64,
}

#[derive(Deserialize)]
struct WhisperResponse {
    #[serde(default)]
    text: String,
    confidence: Option<f64>,
}

/// Which synthesis backend to use for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEngine {
    ElevenLabs { voice_id: String },
    Piper,
}

/// Counts one in-flight synthesis for as long as it lives.
struct Speaking<'a>(&'a AtomicUsize);

impl<'a> Speaking<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Speaking(count)
    }
}

impl Drop for Speaking<'_> {
    fn drop(&mut self) {
        // Saturating: `cleanup` may already have zeroed the count.
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

pub struct VoiceProcessor {
    settings: Arc<Settings>,
    client: Client,
    assistant: Arc<Assistant>,
    listening: AtomicBool,
    speaking: AtomicUsize,
}

impl VoiceProcessor {
    pub fn new(settings: Arc<Settings>, client: Client, assistant: Arc<Assistant>) -> Self {
        Self {
            settings,
            client,
            assistant,
            listening: AtomicBool::new(false),
            speaking: AtomicUsize::new(0),
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst) > 0
    }

    pub fn start_listening(&self) {
        self.listening.store(true, Ordering::SeqCst);
        tracing::info!("voice listening activated");
    }

    pub fn stop_listening(&self) {
        self.listening.store(false, Ordering::SeqCst);
        tracing::info!("voice listening deactivated");
    }

    pub fn cleanup(&self) {
        self.listening.store(false, Ordering::SeqCst);
        self.speaking.store(0, Ordering::SeqCst);
        tracing::info!("voice processor cleaned up");
    }

    /// The default engine: ElevenLabs when keyed, Piper otherwise.
    pub fn default_engine(&self) -> SpeechEngine {
        match &self.settings.elevenlabs_api_key {
            Some(_) => SpeechEngine::ElevenLabs {
                voice_id: self.settings.elevenlabs_voice_id.clone(),
            },
            None => SpeechEngine::Piper,
        }
    }

    /// ElevenLabs only when both a key and an explicit voice are present.
    pub fn engine_for_voice(&self, voice_id: Option<&str>) -> SpeechEngine {
        match (&self.settings.elevenlabs_api_key, voice_id) {
            (Some(_), Some(voice_id)) if !voice_id.trim().is_empty() => SpeechEngine::ElevenLabs {
                voice_id: voice_id.trim().to_string(),
            },
            _ => SpeechEngine::Piper,
        }
    }

    pub async fn transcribe(&self, audio: Vec<u8>, filename: &str, mime: &str) -> AppResult<Transcription> {
        let part = multipart::Part::bytes(audio)
            .file_name(filename.to_string())
            .mime_str(mime)?;
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(format!("{}/transcribe", self.settings.whisper_host.trim_end_matches('/')))
            .timeout(self.settings.upstream_timeout)
            .multipart(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!(
                "transcription failed with status {}",
                resp.status()
            )));
        }
        let body: WhisperResponse = resp.json().await?;
        Ok(Transcription {
            text: body.text.trim().to_string(),
            confidence: body.confidence.unwrap_or(0.8),
        })
    }

    /// Transcript of a WAV payload, empty when transcription fails.
    pub async fn speech_to_text(&self, audio: Vec<u8>) -> String {
        match self.transcribe(audio, "audio.wav", "audio/wav").await {
            Ok(t) => t.text,
            Err(err) => {
                tracing::warn!(error = %err, "speech to text failed");
                String::new()
            }
        }
    }

    /// Synthesises `text` and returns its `/static` URL. A failed ElevenLabs
    /// call is retried once with Piper.
    pub async fn synthesize(&self, text: &str, engine: &SpeechEngine, prefix: &str) -> AppResult<String> {
        let _speaking = Speaking::enter(&self.speaking);
        match engine {
            SpeechEngine::ElevenLabs { .. } => match self.render(text, engine, prefix).await {
                Ok(url) => Ok(url),
                Err(err) => {
                    tracing::warn!(error = %err, "ElevenLabs synthesis failed, falling back to Piper");
                    self.render(text, &SpeechEngine::Piper, prefix).await
                }
            },
            SpeechEngine::Piper => self.render(text, engine, prefix).await,
        }
    }

    async fn render(&self, text: &str, engine: &SpeechEngine, prefix: &str) -> AppResult<String> {
        let (req, extension) = match engine {
            SpeechEngine::ElevenLabs { voice_id } => {
                let api_key = self
                    .settings
                    .elevenlabs_api_key
                    .as_deref()
                    .ok_or(AppError::Unavailable("ElevenLabs is not configured"))?;
                let req = self
                    .client
                    .post(format!(
                        "{}/v1/text-to-speech/{}",
                        self.settings.elevenlabs_base_url.trim_end_matches('/'),
                        voice_id
                    ))
                    .header("xi-api-key", api_key)
                    .json(&json!({
                        "text": text,
                        "voice_settings": {
                            "stability": 0.75,
                            "similarity_boost": 0.8,
                            "style": 0.0,
                            "use_speaker_boost": true
                        }
                    }));
                (req, "mp3")
            }
            SpeechEngine::Piper => {
                let req = self
                    .client
                    .post(format!("{}/synthesize", self.settings.piper_host.trim_end_matches('/')))
                    .json(&json!({ "text": text, "voice": self.settings.voice_id }));
                (req, "wav")
            }
        };

        let resp = req.timeout(self.settings.upstream_timeout).send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!(
                "speech synthesis failed with status {}",
                resp.status()
            )));
        }
        let audio = resp.bytes().await?;

        let filename = format!("{}_{}.{}", prefix, Uuid::new_v4(), extension);
        write_audio(&self.settings.static_dir, &filename, &audio).await?;
        Ok(format!("/static/{}", filename))
    }

    /// Speech for `text` with the default engine, `None` on failure.
    pub async fn text_to_speech(&self, text: &str) -> Option<String> {
        let engine = self.default_engine();
        match self.synthesize(text, &engine, REPLY_PREFIX).await {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::warn!(error = %err, "text to speech failed");
                None
            }
        }
    }

    /// Transcribe, check for the wake phrase, answer, and speak the answer.
    /// `None` means there was nothing to respond to.
    pub async fn process_audio(&self, audio: Vec<u8>) -> Option<VoiceReply> {
        let transcript = self.speech_to_text(audio).await;
        if transcript.trim().chars().count() < 2 {
            return None;
        }
        if !is_voice_activated(&transcript) {
            tracing::debug!(%transcript, "no activation phrase");
            return None;
        }
        tracing::info!(%transcript, "heard");

        let reply = match self
            .assistant
            .process_message(&transcript, None, &self.settings.default_user_id)
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(error = %err, "assistant failed on voice input");
                return None;
            }
        };
        tracing::info!(response = %reply.response, "responding");

        let audio_url = self.text_to_speech(&reply.response).await;
        Some(VoiceReply {
            transcript,
            text: reply.response,
            audio_url,
            timestamp: Utc::now(),
            confidence: reply.confidence,
        })
    }

    pub fn audio_path(&self, filename: &str) -> Option<PathBuf> {
        safe_audio_name(filename).map(|name| self.settings.static_dir.join(name))
    }

    /// Drops synthesised clips older than the configured retention.
    pub async fn prune_audio(&self) -> io::Result<usize> {
        prune_audio(&self.settings.static_dir, self.settings.audio_retention).await
    }
}

/// Deletes `jarvis_*` and `tts_*` files in `dir` at least `max_age` old and
/// returns how many were removed. Other files are left alone.
pub async fn prune_audio(dir: &Path, max_age: Duration) -> io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };
    let now = SystemTime::now();
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let generated = [REPLY_PREFIX, TTS_PREFIX]
            .iter()
            .any(|prefix| name.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('_')));
        if !generated {
            continue;
        }
        let modified = entry.metadata().await?.modified()?;
        if now.duration_since(modified).unwrap_or_default() >= max_age {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(removed, dir = %dir.display(), "pruned old audio");
    }
    Ok(removed)
}

async fn write_audio(dir: &Path, filename: &str, audio: &[u8]) -> AppResult<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(filename), audio).await?;
    Ok(())
}

/// Logs the startup line and tries to pre-render it as audio.
pub async fn startup_greeting(voice: &VoiceProcessor, settings: &Settings) {
    tracing::info!(assistant = %settings.assistant_name, "cloud is initializing");
    tracing::info!(greeting = %settings.startup_line, "startup greeting");
    match voice.text_to_speech(&settings.startup_line).await {
        Some(url) => tracing::info!(%url, "greeting audio ready"),
        None => tracing::warn!("could not generate greeting audio"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn processor(settings: Settings) -> VoiceProcessor {
        let settings = Arc::new(settings);
        let client = Client::new();
        let assistant = Arc::new(Assistant::new(settings.clone(), open_in_memory().unwrap(), client.clone()));
        VoiceProcessor::new(settings, client, assistant)
    }

    #[test]
    fn activation_is_case_insensitive() {
        assert!(is_voice_activated("Hey SMASH, lights on"));
        assert!(is_voice_activated("ok JARVIS"));
        assert!(!is_voice_activated("turn the lights on"));
    }

    #[test]
    fn audio_names_cannot_escape() {
        assert_eq!(safe_audio_name("jarvis_1.wav"), Some("jarvis_1.wav"));
        assert_eq!(safe_audio_name("../smash_ai.db"), None);
        assert_eq!(safe_audio_name("a/b.wav"), None);
        assert_eq!(safe_audio_name(".env"), None);
        assert_eq!(safe_audio_name(""), None);
    }

    #[test]
    fn engine_selection_follows_keys() {
        let piper_only = processor(Settings::default());
        assert_eq!(piper_only.default_engine(), SpeechEngine::Piper);
        assert_eq!(piper_only.engine_for_voice(Some("abc")), SpeechEngine::Piper);

        let keyed = processor(Settings {
            elevenlabs_api_key: Some("key".into()),
            ..Settings::default()
        });
        assert!(matches!(keyed.default_engine(), SpeechEngine::ElevenLabs { .. }));
        assert_eq!(keyed.engine_for_voice(None), SpeechEngine::Piper);
        assert_eq!(
            keyed.engine_for_voice(Some("v1")),
            SpeechEngine::ElevenLabs { voice_id: "v1".into() }
        );
    }

    #[test]
    fn speaking_lasts_until_the_last_synthesis_ends() {
        let voice = processor(Settings::default());
        let first = Speaking::enter(&voice.speaking);
        let second = Speaking::enter(&voice.speaking);
        drop(first);
        assert!(voice.is_speaking());
        drop(second);
        assert!(!voice.is_speaking());

        let late = Speaking::enter(&voice.speaking);
        voice.cleanup();
        drop(late);
        assert!(!voice.is_speaking());
    }

    #[tokio::test]
    async fn prune_removes_only_generated_audio() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["jarvis_1.wav", "tts_2.mp3", "app.css", "tts.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        assert_eq!(prune_audio(dir.path(), Duration::from_secs(3_600)).await.unwrap(), 0);
        assert_eq!(prune_audio(dir.path(), Duration::ZERO).await.unwrap(), 2);

        let mut left: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(left, vec!["app.css", "tts.txt"]);
        assert_eq!(prune_audio(&dir.path().join("missing"), Duration::ZERO).await.unwrap(), 0);
    }

    #[test]
    fn listening_flag_toggles() {
        let voice = processor(Settings::default());
        assert!(!voice.is_listening());
        voice.start_listening();
        assert!(voice.is_listening());
        voice.cleanup();
        assert!(!voice.is_listening());
        assert!(!voice.is_speaking());
    }
}
