use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub synthesis: SynthesisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Model used for streamed answers.
    pub chat_model: String,
    /// Model used for one-shot completions (`/completion`, `/search`).
    pub completion_model: String,
    pub embedding_model: String,
    pub request_timeout_secs: u64,
    pub stream_idle_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            chat_model: "gpt-4o".to_string(),
            completion_model: "gpt-4-turbo".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            request_timeout_secs: 60,
            stream_idle_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub candidate_pool_size: usize,
    pub vector_pool_size: usize,
    pub search_limit: usize,
    /// Chunks retrieved server-side when a streaming request omits context.
    pub stream_context_limit: usize,
    pub upstream_timeout_secs: u64,
    pub timeout_retries: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_pool_size: 200,
            vector_pool_size: 50,
            search_limit: 5,
            stream_context_limit: 3,
            upstream_timeout_secs: 15,
            timeout_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_history_turns: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 2000,
            max_history_turns: 10,
        }
    }
}

impl AppConfig {
    /// Environment variables win over file values.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = lookup("AWAKENED_LLM_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.llm.base_url = url;
        }
        if let Some(host) = lookup("AWAKENED_HOST").filter(|v| !v.trim().is_empty()) {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
            self.server.port = port;
        }
    }
}
