//! The assistant's reasoning: learned answers first, canned intents second,
//! then an upstream model (OpenAI, then Ollama), then a polite fallback.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Client;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::db::{time_col, DbConnection};
use crate::error::{AppError, AppResult};
use crate::learning::LearningStore;
use crate::models::{ChatTurn, Conversation, Speaker};

const GENERATED_CONFIDENCE: f64 = 0.8;
const LEARNED_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Learned,
    Generated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantReply {
    pub response: String,
    pub confidence: f64,
    pub source: ReplySource,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationStats {
    pub total_conversations: i64,
    pub average_confidence: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
}

/// Upstream completion backends, tried in order.
#[derive(Debug, Clone)]
pub enum Provider {
    OpenAi {
        api_key: String,
        base_url: String,
        model: String,
    },
    Ollama {
        host: String,
        model: String,
    },
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    text: String,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}

impl Provider {
    pub fn chain(settings: &Settings) -> Vec<Provider> {
        let mut providers = Vec::new();
        if let Some(api_key) = &settings.openai_api_key {
            providers.push(Provider::OpenAi {
                api_key: api_key.clone(),
                base_url: settings.openai_base_url.trim_end_matches('/').to_string(),
                model: settings.openai_model.clone(),
            });
        }
        providers.push(Provider::Ollama {
            host: settings.ollama_host.trim_end_matches('/').to_string(),
            model: settings.ollama_model.clone(),
        });
        providers
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi { .. } => "openai",
            Provider::Ollama { .. } => "ollama",
        }
    }

    /// Returns the trimmed completion, `None` when the backend answered
    /// with nothing usable.
    pub async fn complete(&self, client: &Client, prompt: &str) -> Result<Option<String>, LlmError> {
        let resp = match self {
            Provider::OpenAi {
                api_key,
                base_url,
                model,
            } => {
                client
                    .post(format!("{}/completions", base_url))
                    .bearer_auth(api_key)
                    .json(&OpenAiRequest {
                        model,
                        prompt,
                        max_tokens: 150,
                        temperature: 0.7,
                    })
                    .send()
                    .await?
            }
            Provider::Ollama { host, model } => {
                client
                    .post(format!("{}/api/generate", host))
                    .json(&OllamaRequest {
                        model,
                        prompt,
                        stream: false,
                        options: OllamaOptions {
                            temperature: 0.7,
                            top_p: 0.9,
                        },
                    })
                    .send()
                    .await?
            }
        };

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        let text = match self {
            Provider::OpenAi { .. } => resp
                .json::<OpenAiResponse>()
                .await?
                .choices
                .into_iter()
                .next()
                .map(|c| c.text),
            Provider::Ollama { .. } => Some(resp.json::<OllamaResponse>().await?.response),
        };
        Ok(text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()))
    }
}

/// Keyword groups checked in order; the first group with a hit answers.
fn intent_reply(message: &str, address: &str) -> Option<String> {
    let lower = message.to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    let reply = if any(&["hey smash", "okay smash", "listen smash"]) {
        format!("Yes, {address}. I'm listening and ready to assist you with your SMASH Cloud needs.")
    } else if any(&["status", "monitor", "system", "performance"]) {
        format!("Systems are running optimally, {address}. All key metrics are within normal parameters. Would you like me to provide detailed status on any specific component?")
    } else if any(&["file", "upload", "download", "storage"]) {
        format!("File management systems are active, {address}. I can help you organize, transfer, or manage your cloud storage. What specific file operations do you require?")
    } else if any(&["user", "admin", "permission", "access"]) {
        format!("User administration protocols are ready, {address}. I can assist with user management, permissions, and access control for your SMASH Cloud system.")
    } else if any(&["learn", "remember", "train", "teach"]) {
        format!("I'm continuously learning from our interactions, {address}. This conversation will help improve my responses. What would you like me to remember?")
    } else if any(&["help", "what can you do", "capabilities"]) {
        format!("I can assist you with system monitoring, file management, user administration, voice commands, and general cloud operations, {address}. What specific task would you like me to handle?")
    } else if any(&["weather", "time", "date"]) {
        format!("Current environmental data is available through the monitoring systems, {address}. Would you like me to access real-time weather information or system timestamps?")
    } else if any(&["hello", "hi", "good morning", "good afternoon", "good evening"]) {
        format!("Good day, {address}. SMASH Cloud is operational and ready to assist you. How may I be of service?")
    } else {
        return None;
    };
    Some(reply)
}

pub struct Assistant {
    settings: Arc<Settings>,
    db: DbConnection,
    learning: LearningStore,
    client: Client,
    providers: Vec<Provider>,
    system_prompt: String,
    history: Mutex<VecDeque<ChatTurn>>,
}

impl Assistant {
    pub fn new(settings: Arc<Settings>, db: DbConnection, client: Client) -> Self {
        let providers = Provider::chain(&settings);
        let system_prompt = build_system_prompt(&settings);
        Self {
            learning: LearningStore::new(db.clone()),
            settings,
            db,
            client,
            providers,
            system_prompt,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn learning(&self) -> &LearningStore {
        &self.learning
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub async fn process_message(
        &self,
        message: &str,
        context: Option<&serde_json::Value>,
        user_id: &str,
    ) -> AppResult<AssistantReply> {
        if let Some(learned) = self.learning.find_match(message).await? {
            return Ok(AssistantReply {
                response: learned.response,
                confidence: learned.confidence,
                source: ReplySource::Learned,
                timestamp: Utc::now(),
                conversation_id: None,
            });
        }

        self.push_turn(Speaker::User, message).await;
        let response = self.generate(message).await;
        self.push_turn(Speaker::Assistant, &response).await;

        let conversation_id = self
            .save_conversation(message, &response, context, user_id)
            .await?;

        Ok(AssistantReply {
            response,
            confidence: GENERATED_CONFIDENCE,
            source: ReplySource::Generated,
            timestamp: Utc::now(),
            conversation_id: Some(conversation_id),
        })
    }

    async fn push_turn(&self, role: Speaker, content: &str) {
        let mut history = self.history.lock().await;
        history.push_back(ChatTurn {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
        while history.len() > self.settings.context_memory_size {
            history.pop_front();
        }
    }

    async fn generate(&self, message: &str) -> String {
        let address = &self.settings.address_user_as;
        if let Some(reply) = intent_reply(message, address) {
            return reply;
        }

        let prompt = self.build_prompt(message).await;
        for provider in &self.providers {
            match provider.complete(&self.client, &prompt).await {
                Ok(Some(text)) => return text,
                Ok(None) => tracing::warn!(provider = provider.name(), "empty completion"),
                Err(err) => tracing::warn!(provider = provider.name(), error = %err, "completion failed"),
            }
        }

        format!("I understand your query, {address}. Based on the current context, I'm processing your request through the available systems. Could you provide more specific details so I can assist you more effectively?")
    }

    async fn build_prompt(&self, message: &str) -> String {
        let history = self.history.lock().await;
        let mut prompt = self.system_prompt.clone();
        // The current user turn is already in history.
        if history.len() > 2 {
            let recent: Vec<String> = history
                .iter()
                .rev()
                .skip(1)
                .take(2)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .map(|turn| {
                    let who = match turn.role {
                        Speaker::User => "User",
                        Speaker::Assistant => "SMASH",
                    };
                    format!("{who}: {}", turn.content)
                })
                .collect();
            prompt.push_str("\n\nRecent conversation:\n");
            prompt.push_str(&recent.join("\n"));
        }
        prompt.push_str(&format!("\n\nUser: {message}\nSMASH:"));
        prompt
    }

    async fn save_conversation(
        &self,
        message: &str,
        response: &str,
        context: Option<&serde_json::Value>,
        user_id: &str,
    ) -> AppResult<i64> {
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO conversations (user_message, assistant_response, user_id, timestamp, context, confidence_score)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message,
                response,
                user_id,
                Utc::now().to_rfc3339(),
                context.map(|c| c.to_string()),
                GENERATED_CONFIDENCE
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn learn(&self, question: &str, answer: &str, category: &str) -> AppResult<i64> {
        if !self.settings.learning_enabled {
            return Err(AppError::Forbidden("learning is disabled"));
        }
        let question = question.trim();
        let answer = answer.trim();
        if question.is_empty() || answer.is_empty() {
            return Err(AppError::bad_request("question and answer are required"));
        }
        let id = self
            .learning
            .save(question, answer, category, LEARNED_CONFIDENCE)
            .await?;
        tracing::info!(id, pattern = %question.chars().take(50).collect::<String>(), "learned new pattern");
        Ok(id)
    }

    /// Most recent conversations first.
    pub async fn recent_conversations(&self, limit: usize) -> AppResult<Vec<Conversation>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_message, assistant_response, user_id, timestamp, confidence_score
             FROM conversations ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(Conversation {
                id: row.get(0)?,
                user_message: row.get(1)?,
                assistant_response: row.get(2)?,
                user_id: row.get(3)?,
                timestamp: time_col(row, 4)?,
                confidence: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn conversation_stats(&self) -> AppResult<ConversationStats> {
        let conn = self.db.lock().await;
        let (total, average, last): (i64, Option<f64>, Option<String>) = conn.query_row(
            "SELECT COUNT(*), AVG(confidence_score), MAX(timestamp) FROM conversations",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let last_activity = last
            .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
            .map(|ts| ts.with_timezone(&Utc));
        Ok(ConversationStats {
            total_conversations: total,
            average_confidence: (average.unwrap_or(0.0) * 100.0).round() / 100.0,
            last_activity,
        })
    }

    pub async fn history(&self, limit: usize) -> Vec<ChatTurn> {
        let history = self.history.lock().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    /// Deletes stored conversations and the in-memory history. Learned
    /// patterns survive.
    pub async fn reset(&self) -> AppResult<usize> {
        let removed = self.db.lock().await.execute("DELETE FROM conversations", [])?;
        self.clear_history().await;
        tracing::warn!(removed, "conversation history reset");
        Ok(removed)
    }
}

fn build_system_prompt(settings: &Settings) -> String {
    format!(
        "You are {name}, an advanced AI assistant built for SMASH Cloud. You embody the {personality} personality style of Jarvis.

Key characteristics:
- Always address the user as \"{address}\"
- Speak in a calm, articulate, and futuristic manner
- Be helpful, intelligent, and efficient
- Use precise language and avoid unnecessary words
- Show confidence in your capabilities
- Adapt and learn from conversations
- Focus on cloud management, system administration, and user assistance

You have access to:
- Real-time system monitoring data
- File management capabilities
- User administration tools
- Analytics and reporting
- Voice interaction capabilities

Respond naturally while maintaining your persona. Be concise but thorough in your assistance.",
        name = settings.assistant_name,
        personality = settings.personality,
        address = settings.address_user_as,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn assistant(settings: Settings) -> Assistant {
        Assistant::new(Arc::new(settings), open_in_memory().unwrap(), Client::new())
    }

    #[test]
    fn intents_are_checked_in_order() {
        // "hey smash" wins over "status" even though both appear.
        let reply = intent_reply("Hey SMASH, what's the status?", "SIR").unwrap();
        assert!(reply.starts_with("Yes, SIR."));

        let reply = intent_reply("upload my photos", "Captain").unwrap();
        assert!(reply.starts_with("File management systems are active, Captain."));

        assert!(intent_reply("quantum chromodynamics", "SIR").is_none());
    }

    #[test]
    fn greeting_matches_substrings() {
        // "hi" inside "this" counts, matching the keyword scan.
        assert!(intent_reply("this", "SIR").unwrap().starts_with("Good day"));
    }

    #[test]
    fn system_prompt_carries_persona() {
        let prompt = build_system_prompt(&Settings {
            address_user_as: "Commander".into(),
            ..Settings::default()
        });
        assert!(prompt.contains("\"Commander\""));
        assert!(prompt.starts_with("You are SMASH"));
    }

    #[tokio::test]
    async fn generated_replies_are_recorded() {
        let smash = assistant(Settings::default());
        let reply = smash
            .process_message("system status please", None, "owner")
            .await
            .unwrap();
        assert_eq!(reply.source, ReplySource::Generated);
        assert_eq!(reply.confidence, GENERATED_CONFIDENCE);

        let stored = smash.recent_conversations(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(Some(stored[0].id), reply.conversation_id);
        assert_eq!(smash.history(10).await.len(), 2);
    }

    #[tokio::test]
    async fn conversation_stats_summarise_history() {
        let smash = assistant(Settings::default());
        let empty = smash.conversation_stats().await.unwrap();
        assert_eq!(empty.total_conversations, 0);
        assert_eq!(empty.average_confidence, 0.0);
        assert!(empty.last_activity.is_none());

        smash.process_message("list my files", None, "owner").await.unwrap();
        smash.process_message("help me", None, "owner").await.unwrap();
        let stats = smash.conversation_stats().await.unwrap();
        assert_eq!(stats.total_conversations, 2);
        assert_eq!(stats.average_confidence, 0.8);
        assert!(stats.last_activity.is_some());
    }

    #[tokio::test]
    async fn learned_replies_skip_history() {
        let smash = assistant(Settings::default());
        smash
            .learn("what is the wifi password", "It is on the fridge, SIR.", "home")
            .await
            .unwrap();
        let reply = smash
            .process_message("What is the wifi password", None, "owner")
            .await
            .unwrap();
        assert_eq!(reply.source, ReplySource::Learned);
        assert_eq!(reply.response, "It is on the fridge, SIR.");
        assert!(reply.conversation_id.is_none());
        assert!(smash.history(10).await.is_empty());
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let smash = assistant(Settings {
            context_memory_size: 3,
            ..Settings::default()
        });
        for _ in 0..4 {
            smash.process_message("hello", None, "owner").await.unwrap();
        }
        let history = smash.history(100).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history.last().unwrap().role, Speaker::Assistant);
    }

    #[tokio::test]
    async fn learning_can_be_disabled() {
        let smash = assistant(Settings {
            learning_enabled: false,
            ..Settings::default()
        });
        let err = smash.learn("q", "a", "general").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn reset_keeps_learned_patterns() {
        let smash = assistant(Settings::default());
        smash.learn("ping", "pong", "general").await.unwrap();
        smash.process_message("monitor the system", None, "owner").await.unwrap();

        assert_eq!(smash.reset().await.unwrap(), 1);
        assert!(smash.recent_conversations(10).await.unwrap().is_empty());
        assert!(smash.history(10).await.is_empty());
        assert_eq!(smash.learning().count().await.unwrap(), 1);
    }
}
