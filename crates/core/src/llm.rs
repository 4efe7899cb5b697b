//! LLM provider contract and a thin client that throttles global in-flight
//! completions to `Config::max_concurrent_llm`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::{Config, LlmProviderKind};
use crate::types::ModelTier;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A pluggable completion backend. Implementations differ only in request
/// shape and response parsing; model selection and concurrency throttling
/// live in [`LlmClient`], not here.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Issue one completion and return its parsed JSON payload.
    async fn complete(
        &self,
        prompt: &str,
        tier: ModelTier,
        system: &str,
        max_tokens: u32,
    ) -> Result<Value, String>;
}

struct AnthropicProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    fast_model: String,
    deep_model: String,
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(
        &self,
        prompt: &str,
        tier: ModelTier,
        system: &str,
        max_tokens: u32,
    ) -> Result<Value, String> {
        let model = match tier {
            ModelTier::Fast => &self.fast_model,
            ModelTier::Deep => &self.deep_model,
        };
        let body = serde_json::json!({
            "model": model,
            "max_tokens": max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut req = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| format!("anthropic request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("anthropic returned status {}", resp.status()));
        }
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| format!("anthropic response decode failed: {e}"))?;

        let text = payload
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| "anthropic response missing content[0].text".to_string())?;

        serde_json::from_str(text).map_err(|e| format!("completion was not valid JSON: {e}"))
    }
}

struct OpenAiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    fast_model: String,
    deep_model: String,
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        prompt: &str,
        tier: ModelTier,
        system: &str,
        max_tokens: u32,
    ) -> Result<Value, String> {
        let model = match tier {
            ModelTier::Fast => &self.fast_model,
            ModelTier::Deep => &self.deep_model,
        };
        let body = serde_json::json!({
            "model": model,
            "max_tokens": max_tokens,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });

        let mut req = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| format!("openai request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("openai returned status {}", resp.status()));
        }
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| format!("openai response decode failed: {e}"))?;

        let text = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| "openai response missing choices[0].message.content".to_string())?;

        serde_json::from_str(text).map_err(|e| format!("completion was not valid JSON: {e}"))
    }
}

struct OllamaProvider {
    http: reqwest::Client,
    base_url: String,
    fast_model: String,
    deep_model: String,
}

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn complete(
        &self,
        prompt: &str,
        tier: ModelTier,
        system: &str,
        _max_tokens: u32,
    ) -> Result<Value, String> {
        let model = match tier {
            ModelTier::Fast => &self.fast_model,
            ModelTier::Deep => &self.deep_model,
        };
        let body = serde_json::json!({
            "model": model,
            "format": "json",
            "stream": false,
            "system": system,
            "prompt": prompt,
        });

        let resp = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("ollama request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("ollama returned status {}", resp.status()));
        }
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| format!("ollama response decode failed: {e}"))?;

        let text = payload
            .get("response")
            .and_then(|t| t.as_str())
            .ok_or_else(|| "ollama response missing \"response\" field".to_string())?;

        serde_json::from_str(text).map_err(|e| format!("completion was not valid JSON: {e}"))
    }
}

fn build_provider(config: &Config) -> Box<dyn LlmProvider> {
    let http = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("reqwest client builds with static config");

    match config.llm_provider {
        LlmProviderKind::Anthropic => Box::new(AnthropicProvider {
            http,
            base_url: config.llm_base_url.clone(),
            api_key: config.llm_api_key.clone(),
            fast_model: config.fast_model.clone(),
            deep_model: config.deep_model.clone(),
        }),
        LlmProviderKind::OpenAi => Box::new(OpenAiProvider {
            http,
            base_url: config.llm_base_url.clone(),
            api_key: config.llm_api_key.clone(),
            fast_model: config.fast_model.clone(),
            deep_model: config.deep_model.clone(),
        }),
        LlmProviderKind::Ollama => Box::new(OllamaProvider {
            http,
            base_url: config.llm_base_url.clone(),
            fast_model: config.fast_model.clone(),
            deep_model: config.deep_model.clone(),
        }),
    }
}

/// Owns model selection and global concurrency throttling across the whole
/// process — every `complete` call acquires a permit from a shared
/// semaphore sized to `CARTO_MAX_CONCURRENT_LLM` before touching the
/// provider, bounding in-flight completions regardless of how many pipeline
/// workers call it.
pub struct LlmClient {
    provider: Box<dyn LlmProvider>,
    concurrency: Arc<Semaphore>,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        LlmClient {
            provider: build_provider(config),
            concurrency: Arc::new(Semaphore::new(config.max_concurrent_llm.max(1))),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_provider(provider: Box<dyn LlmProvider>, max_concurrent: usize) -> Self {
        LlmClient {
            provider,
            concurrency: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub async fn complete(
        &self,
        prompt: &str,
        tier: ModelTier,
        system: &str,
        max_tokens: u32,
    ) -> Result<Value, String> {
        let _permit = self
            .concurrency
            .acquire()
            .await
            .map_err(|e| format!("llm concurrency semaphore closed: {e}"))?;
        debug!(provider = self.provider.name(), ?tier, "dispatching llm completion");
        self.provider.complete(prompt, tier, system, max_tokens).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        max_observed: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl LlmProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn complete(
            &self,
            _prompt: &str,
            _tier: ModelTier,
            _system: &str,
            _max_tokens: u32,
        ) -> Result<Value, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(serde_json::json!({"ok": true}))
        }
    }

    #[tokio::test]
    async fn throttles_to_configured_concurrency() {
        let calls = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));

        let client = LlmClient::with_provider(
            Box::new(CountingProvider {
                calls: calls.clone(),
                in_flight: in_flight.clone(),
                max_observed: max_observed.clone(),
            }),
            2,
        );
        let client = Arc::new(client);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client.complete("p", ModelTier::Fast, "s", 100).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }
}
