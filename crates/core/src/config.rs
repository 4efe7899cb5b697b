//! Environment-sourced configuration. Config files and CLI-flag merging are
//! deliberately out of scope here; this module only covers the enumerated
//! `CARTO_*` environment variables.

use std::env;

const DEFAULT_STORAGE_URL: &str = "http://localhost:8900";
const DEFAULT_MAX_CONCURRENT_LLM: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    Anthropic,
    OpenAi,
    Ollama,
}

impl LlmProviderKind {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "openai" => LlmProviderKind::OpenAi,
            "ollama" => LlmProviderKind::Ollama,
            _ => LlmProviderKind::Anthropic,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProviderKind::Anthropic => "https://api.anthropic.com",
            LlmProviderKind::OpenAi => "https://api.openai.com",
            LlmProviderKind::Ollama => "http://localhost:11434",
        }
    }

    pub fn default_fast_model(&self) -> &'static str {
        match self {
            LlmProviderKind::Anthropic => "claude-haiku",
            LlmProviderKind::OpenAi => "gpt-4o-mini",
            LlmProviderKind::Ollama => "llama3",
        }
    }

    pub fn default_deep_model(&self) -> &'static str {
        match self {
            LlmProviderKind::Anthropic => "claude-sonnet",
            LlmProviderKind::OpenAi => "gpt-4o",
            LlmProviderKind::Ollama => "llama3:70b",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_url: String,
    pub storage_api_key: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_provider: LlmProviderKind,
    pub llm_base_url: String,
    pub fast_model: String,
    pub deep_model: String,
    pub max_concurrent_llm: usize,
}

impl Config {
    /// Reads the `CARTO_*` environment variables, falling back to the
    /// documented defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let provider = env::var("CARTO_LLM_PROVIDER")
            .map(|v| LlmProviderKind::parse(&v))
            .unwrap_or(LlmProviderKind::Anthropic);

        let llm_base_url = env::var("CARTO_LLM_BASE_URL")
            .unwrap_or_else(|_| provider.default_base_url().to_string());

        let fast_model = env::var("CARTO_FAST_MODEL")
            .unwrap_or_else(|_| provider.default_fast_model().to_string());

        let deep_model = env::var("CARTO_DEEP_MODEL")
            .unwrap_or_else(|_| provider.default_deep_model().to_string());

        let max_concurrent_llm = env::var("CARTO_MAX_CONCURRENT_LLM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONCURRENT_LLM);

        Config {
            storage_url: env::var("CARTO_STORAGE_URL")
                .unwrap_or_else(|_| DEFAULT_STORAGE_URL.to_string()),
            storage_api_key: env::var("CARTO_STORAGE_API_KEY").ok(),
            llm_api_key: env::var("CARTO_LLM_API_KEY").ok(),
            llm_provider: provider,
            llm_base_url,
            fast_model,
            deep_model,
            max_concurrent_llm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parse_falls_back_to_anthropic() {
        assert_eq!(LlmProviderKind::parse("nonsense"), LlmProviderKind::Anthropic);
        assert_eq!(LlmProviderKind::parse("OpenAI"), LlmProviderKind::OpenAi);
        assert_eq!(LlmProviderKind::parse("ollama"), LlmProviderKind::Ollama);
    }
}
