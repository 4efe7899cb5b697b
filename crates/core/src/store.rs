//! Layered Store (C8): an HTTP client over the remote memory/vector service
//! contract, plus the source-tag grammar and content-truncation rule.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Layer, Tier, SYSTEM_MODULE};

const CONTENT_CEILING: usize = 49_000;
const STORAGE_TIMEOUT: Duration = Duration::from_secs(30);
const BATCH_LIMIT: usize = 500;

/// Truncates `content` to at most `ceiling` bytes, preferring to cut at the
/// last newline at or before the ceiling so records don't end mid-line.
pub fn truncate(content: &str, ceiling: usize) -> String {
    if content.len() <= ceiling {
        return content.to_string();
    }
    let mut boundary = ceiling;
    while !content.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let window = &content[..boundary];
    match window.rfind('\n') {
        Some(idx) => content[..idx].to_string(),
        None => window.to_string(),
    }
}

fn source_tag(project: &str, module: &str, layer: Layer) -> String {
    format!("carto/{project}/{module}/layer:{}", layer.as_str())
}

#[derive(Debug, Clone, Serialize)]
struct AddMemoryRequest<'a> {
    text: &'a str,
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
    deduplicate: bool,
}

#[derive(Debug, Deserialize)]
struct AddMemoryResponse {
    #[allow(dead_code)]
    id: String,
}

#[derive(Debug, Clone, Serialize)]
struct MemoryEntry<'a> {
    text: &'a str,
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
    deduplicate: bool,
}

#[derive(Debug, Serialize)]
struct AddBatchRequest<'a> {
    memories: Vec<MemoryEntry<'a>>,
}

#[derive(Debug, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    pub score: f64,
    pub source: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    memories: Vec<SearchResult>,
}

pub struct LayeredStore {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    project: String,
}

impl LayeredStore {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, project: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(STORAGE_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");
        LayeredStore {
            http,
            base_url: base_url.into(),
            api_key,
            project: project.into(),
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    /// Preflight health check. Any non-2xx response or transport error is
    /// treated as unreachable.
    pub async fn health(&self) -> bool {
        let req = self.authed(self.http.get(format!("{}/health", self.base_url)));
        matches!(req.send().await, Ok(resp) if resp.status().is_success())
    }

    /// Writes one record tagged `carto/<project>/<module>/layer:<layer>`,
    /// truncating `content` per the ceiling rule first.
    pub async fn store_layer(&self, module: &str, layer: Layer, content: &str) -> Result<(), String> {
        let truncated = truncate(content, CONTENT_CEILING);
        let tag = source_tag(&self.project, module, layer);
        let body = AddMemoryRequest {
            text: &truncated,
            source: &tag,
            metadata: None,
            deduplicate: false,
        };
        let resp = self
            .authed(self.http.post(format!("{}/memory/add", self.base_url)))
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("store_layer request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("store_layer returned status {}", resp.status()));
        }
        let _: AddMemoryResponse = resp
            .json()
            .await
            .map_err(|e| format!("store_layer response decode failed: {e}"))?;
        Ok(())
    }

    /// Writes many records under the same tag, each truncated identically,
    /// split into client-side batches of at most 500.
    pub async fn store_batch(&self, module: &str, layer: Layer, entries: &[String]) -> Result<(), String> {
        let tag = source_tag(&self.project, module, layer);
        let truncated: Vec<String> = entries.iter().map(|e| truncate(e, CONTENT_CEILING)).collect();

        for chunk in truncated.chunks(BATCH_LIMIT) {
            let memories: Vec<MemoryEntry> = chunk
                .iter()
                .map(|text| MemoryEntry {
                    text,
                    source: &tag,
                    metadata: None,
                    deduplicate: false,
                })
                .collect();
            let body = AddBatchRequest { memories };
            let resp = self
                .authed(self.http.post(format!("{}/memory/add-batch", self.base_url)))
                .json(&body)
                .send()
                .await
                .map_err(|e| format!("store_batch request failed: {e}"))?;
            if !resp.status().is_success() {
                return Err(format!("store_batch returned status {}", resp.status()));
            }
        }
        Ok(())
    }

    /// Returns every record stored for the module/layer tag.
    pub async fn retrieve_layer(&self, module: &str, layer: Layer) -> Result<Vec<SearchResult>, String> {
        let tag = source_tag(&self.project, module, layer);
        let resp = self
            .authed(
                self.http
                    .get(format!("{}/memories", self.base_url))
                    .query(&[("source", tag.as_str()), ("limit", "1000")]),
            )
            .send()
            .await
            .map_err(|e| format!("retrieve_layer request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("retrieve_layer returned status {}", resp.status()));
        }
        let parsed: ListResponse = resp
            .json()
            .await
            .map_err(|e| format!("retrieve_layer response decode failed: {e}"))?;
        Ok(parsed.memories)
    }

    /// Retrieves every layer in the given tier's layer set, keyed by layer name.
    pub async fn retrieve_by_tier(&self, module: &str, tier: Tier) -> HashMap<String, Vec<SearchResult>> {
        let mut result = HashMap::new();
        for layer in tier.layers() {
            let records = self.retrieve_layer(module, *layer).await.unwrap_or_default();
            result.insert(layer.as_str().to_string(), records);
        }
        result
    }

    /// Semantic search against the store, optionally restricted to a source prefix.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        source_prefix: Option<&str>,
    ) -> Result<Vec<SearchResult>, String> {
        let body = serde_json::json!({
            "query": query,
            "k": k,
            "hybrid": true,
            "source": source_prefix,
        });
        let resp = self
            .authed(self.http.post(format!("{}/search", self.base_url)))
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("search request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("search returned status {}", resp.status()));
        }
        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| format!("search response decode failed: {e}"))?;
        Ok(parsed.results)
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), String> {
        let resp = self
            .authed(self.http.delete(format!("{}/memory/{}", self.base_url, id)))
            .send()
            .await
            .map_err(|e| format!("delete request failed: {e}"))?;
        // A missing record is not a failure to delete it.
        if resp.status().is_success() || resp.status().as_u16() == 404 {
            Ok(())
        } else {
            Err(format!("delete returned status {}", resp.status()))
        }
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<(), String> {
        let resp = self
            .authed(
                self.http
                    .get(format!("{}/memories", self.base_url))
                    .query(&[("source", prefix), ("limit", "10000")]),
            )
            .send()
            .await
            .map_err(|e| format!("list-by-source request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("list-by-source returned status {}", resp.status()));
        }
        let parsed: ListResponse = resp
            .json()
            .await
            .map_err(|e| format!("list-by-source response decode failed: {e}"))?;
        for record in parsed.memories {
            self.delete_by_id(&record.id).await?;
        }
        Ok(())
    }

    /// Issues delete-by-source for every layer tag of a module.
    pub async fn clear_module(&self, module: &str) -> Result<(), String> {
        for layer in [
            Layer::Atoms,
            Layer::History,
            Layer::Signals,
            Layer::Wiring,
            Layer::Zones,
            Layer::Blueprint,
            Layer::Patterns,
        ] {
            let tag = source_tag(&self.project, module, layer);
            self.delete_by_prefix(&tag).await?;
        }
        Ok(())
    }

    /// Issues delete-by-source on the project-wide prefix.
    pub async fn clear_project(&self) -> Result<(), String> {
        self.delete_by_prefix(&format!("carto/{}/", self.project)).await
    }
}

/// Module name used for system-wide layers (blueprint, patterns).
pub fn system_module() -> &'static str {
    SYSTEM_MODULE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_is_not_truncated() {
        assert_eq!(truncate("hello", CONTENT_CEILING), "hello");
    }

    #[test]
    fn truncates_at_last_newline_within_ceiling() {
        let line = "a".repeat(100);
        let content: String = std::iter::repeat(format!("{line}\n")).take(600).collect();
        assert_eq!(content.len(), 600 * 101);

        let result = truncate(&content, CONTENT_CEILING);
        assert!(result.len() <= CONTENT_CEILING);
        assert!(content.as_bytes()[result.len()] == b'\n' || result.len() == content.len());
    }

    #[test]
    fn hard_truncates_when_no_newline_present() {
        let content = "x".repeat(CONTENT_CEILING + 500);
        let result = truncate(&content, CONTENT_CEILING);
        assert_eq!(result.len(), CONTENT_CEILING);
    }

    #[test]
    fn source_tag_uses_expected_grammar() {
        assert_eq!(
            source_tag("demo", "pkg", Layer::Atoms),
            "carto/demo/pkg/layer:atoms"
        );
        assert_eq!(
            source_tag("demo", SYSTEM_MODULE, Layer::Blueprint),
            "carto/demo/_system/layer:blueprint"
        );
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips_content_verbatim() {
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let text = "fn clarified() -> bool {\n    true\n}\n";
        let tag = source_tag("demo", "pkg", Layer::Atoms);

        Mock::given(method("POST"))
            .and(path("/memory/add"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "m1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/memories"))
            .and(query_param("source", tag.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "memories": [{
                    "id": "m1",
                    "text": text,
                    "score": 1.0,
                    "source": tag,
                    "metadata": null,
                }]
            })))
            .mount(&server)
            .await;

        let store = LayeredStore::new(server.uri(), None, "demo");
        store.store_layer("pkg", Layer::Atoms, text).await.unwrap();
        let retrieved = store.retrieve_layer("pkg", Layer::Atoms).await.unwrap();

        assert_eq!(retrieved.len(), 1);
        assert_eq!(retrieved[0].text, text);
    }
}
