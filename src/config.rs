use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub static_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub storage_quota_bytes: u64,
    pub max_upload_bytes: usize,
    pub audio_retention: Duration,

    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub ollama_host: String,
    pub ollama_model: String,
    pub whisper_host: String,
    pub piper_host: String,
    pub elevenlabs_api_key: Option<String>,
    pub elevenlabs_base_url: String,
    pub elevenlabs_voice_id: String,

    pub assistant_name: String,
    pub voice_mode: String,
    pub voice_id: String,
    pub startup_line: String,
    pub personality: String,
    pub address_user_as: String,
    pub learning_enabled: bool,
    pub context_memory_size: usize,
    pub default_user_id: String,

    pub admin_username: String,
    pub admin_email: String,
    pub admin_password: String,

    pub upstream_timeout: Duration,
    pub health_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            database_path: "smash_ai.db".to_string(),
            static_dir: PathBuf::from("static"),
            storage_dir: PathBuf::from("files"),
            storage_quota_bytes: 100 * 1024 * 1024 * 1024,
            max_upload_bytes: 1024 * 1024 * 1024,
            audio_retention: Duration::from_secs(24 * 3_600),

            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-3.5-turbo".to_string(),
            ollama_host: "http://localhost:11434".to_string(),
            ollama_model: "llama3".to_string(),
            whisper_host: "http://localhost:9000".to_string(),
            piper_host: "http://localhost:5002".to_string(),
            elevenlabs_api_key: None,
            elevenlabs_base_url: "https://api.elevenlabs.io".to_string(),
            elevenlabs_voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),

            assistant_name: "SMASH".to_string(),
            voice_mode: "jarvis".to_string(),
            voice_id: "en_GB-sarah-high".to_string(),
            startup_line: "System online. SMASH Cloud is now active.".to_string(),
            personality: "calm, articulate, futuristic".to_string(),
            address_user_as: "SIR".to_string(),
            learning_enabled: true,
            context_memory_size: 50,
            default_user_id: "owner".to_string(),

            admin_username: "admin".to_string(),
            admin_email: "admin@smash.cloud".to_string(),
            admin_password: "admin123".to_string(),

            upstream_timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
        }
    }
}

impl Settings {
    /// Loads settings from environment variables. Missing, blank or unparsable
    /// values fall back to their defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            host: string_var("SMASH_HOST", d.host),
            port: parsed_var("SMASH_PORT", d.port),
            database_path: string_var("DATABASE_PATH", d.database_path),
            static_dir: optional_var("STATIC_DIR").map(PathBuf::from).unwrap_or(d.static_dir),
            storage_dir: optional_var("STORAGE_DIR").map(PathBuf::from).unwrap_or(d.storage_dir),
            storage_quota_bytes: parsed_var("STORAGE_QUOTA_BYTES", d.storage_quota_bytes),
            max_upload_bytes: parsed_var("MAX_UPLOAD_BYTES", d.max_upload_bytes),
            audio_retention: Duration::from_secs(
                parsed_var("AUDIO_RETENTION_HOURS", d.audio_retention.as_secs() / 3_600) * 3_600,
            ),

            openai_api_key: optional_var("OPENAI_API_KEY"),
            openai_base_url: string_var("OPENAI_BASE_URL", d.openai_base_url),
            openai_model: string_var("OPENAI_MODEL", d.openai_model),
            ollama_host: string_var("OLLAMA_HOST", d.ollama_host),
            ollama_model: string_var("OLLAMA_MODEL", d.ollama_model),
            whisper_host: string_var("WHISPER_HOST", d.whisper_host),
            piper_host: string_var("PIPER_HOST", d.piper_host),
            elevenlabs_api_key: optional_var("ELEVENLABS_API_KEY"),
            elevenlabs_base_url: string_var("ELEVENLABS_BASE_URL", d.elevenlabs_base_url),
            elevenlabs_voice_id: string_var("ELEVENLABS_VOICE_ID", d.elevenlabs_voice_id),

            assistant_name: string_var("ASSISTANT_NAME", d.assistant_name),
            voice_mode: string_var("VOICE_MODE", d.voice_mode),
            voice_id: string_var("VOICE_ID", d.voice_id),
            startup_line: string_var("JARVIS_STARTUP_LINE", d.startup_line),
            personality: string_var("JARVIS_PERSONALITY", d.personality),
            address_user_as: string_var("ADDRESS_USER_AS", d.address_user_as),
            learning_enabled: parsed_var("LEARNING_ENABLED", d.learning_enabled),
            context_memory_size: parsed_var("CONTEXT_MEMORY_SIZE", d.context_memory_size),
            default_user_id: string_var("DEFAULT_USER_ID", d.default_user_id),

            admin_username: string_var("ADMIN_USERNAME", d.admin_username),
            admin_email: string_var("ADMIN_EMAIL", d.admin_email),
            admin_password: string_var("ADMIN_PASSWORD", d.admin_password),

            upstream_timeout: Duration::from_secs(parsed_var(
                "UPSTREAM_TIMEOUT_SECS",
                d.upstream_timeout.as_secs(),
            )),
            health_timeout: Duration::from_secs(parsed_var(
                "HEALTH_TIMEOUT_SECS",
                d.health_timeout.as_secs(),
            )),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn string_var(key: &str, default: String) -> String {
    optional_var(key).unwrap_or(default)
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_layout() {
        let s = Settings::default();
        assert_eq!(s.bind_addr(), "0.0.0.0:8000");
        assert_eq!(s.context_memory_size, 50);
        assert!(s.learning_enabled);
        assert!(s.openai_api_key.is_none());
    }

    #[test]
    fn parsed_var_falls_back_on_garbage() {
        env::set_var("SMASH_TEST_PARSED_PORT", "not-a-port");
        assert_eq!(parsed_var("SMASH_TEST_PARSED_PORT", 8000u16), 8000);
        env::set_var("SMASH_TEST_PARSED_PORT", " 9100 ");
        assert_eq!(parsed_var("SMASH_TEST_PARSED_PORT", 8000u16), 9100);
    }

    #[test]
    fn blank_optional_is_none() {
        env::set_var("SMASH_TEST_BLANK_KEY", "   ");
        assert!(optional_var("SMASH_TEST_BLANK_KEY").is_none());
    }

    #[test]
    fn blank_string_keeps_default() {
        env::set_var("SMASH_TEST_BLANK_HOST", "");
        assert_eq!(string_var("SMASH_TEST_BLANK_HOST", "0.0.0.0".into()), "0.0.0.0");
        env::set_var("SMASH_TEST_BLANK_HOST", "127.0.0.1");
        assert_eq!(string_var("SMASH_TEST_BLANK_HOST", "0.0.0.0".into()), "127.0.0.1");
    }
}
