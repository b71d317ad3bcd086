//! Startup configuration resolved once from the environment.
//!
//! - `TABLETALK_HTTP_PORT` — listen port (default 8000).
//! - `TABLETALK_DB_PATH` — sqlite file path; unset means a transient
//!   in-memory store that dies with the process.
//! - `OPENAI_API_KEY` — collaborator credential; unset means query
//!   generation is unavailable (uploads still work).
//! - `TABLETALK_LLM_BASE_URL` — OpenAI-compatible endpoint root
//!   (default OpenRouter).
//! - `TABLETALK_LLM_MODEL` — model identifier (default `openrouter/auto`).

use std::path::PathBuf;

pub const DEFAULT_HTTP_PORT: u16 = 8000;
pub const DEFAULT_LLM_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_LLM_MODEL: &str = "openrouter/auto";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    /// Persistent store path; `None` selects the in-memory backing.
    pub db_path: Option<PathBuf>,
    /// `None` when no API key is configured.
    pub llm: Option<LlmConfig>,
}

impl Config {
    pub fn from_env() -> Self {
        let http_port = std::env::var("TABLETALK_HTTP_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(DEFAULT_HTTP_PORT);
        let db_path = std::env::var("TABLETALK_DB_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        let llm = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(|api_key| LlmConfig {
                api_key,
                base_url: std::env::var("TABLETALK_LLM_BASE_URL")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
                model: std::env::var("TABLETALK_LLM_MODEL")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            });
        Config { http_port, db_path, llm }
    }
}
