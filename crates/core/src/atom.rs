//! Atom Analyzer (C3): one fast-tier LLM call per chunk, producing a
//! clarified-code-plus-summary `Atom`. Failures are skippable — logged and
//! dropped from the batch, never propagated.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::{BatchOutcome, IndexError};
use crate::llm::LlmClient;
use crate::types::{Atom, AtomCompletion, Chunk, ModelTier};

const ATOM_SYSTEM_PROMPT: &str = "You clarify and summarize a single source code unit. \
Respond with strict JSON: {\"clarified_code\": string, \"summary\": string, \
\"imports\": string[], \"exports\": string[]}. clarified_code keeps identical \
structure and behavior, renaming only unclear identifiers and adding brief \
comments. summary is 1-3 sentences.";

const ATOM_MAX_TOKENS: u32 = 2048;

fn build_prompt(chunk: &Chunk) -> String {
    format!(
        "language: {}\nkind: {}\nname: {}\npath: {}\n\ncode:\n{}",
        chunk.language, chunk.kind.as_str(), chunk.name, chunk.file_path, chunk.code
    )
}

async fn analyze_chunk(client: &LlmClient, chunk: &Chunk) -> Result<Atom, String> {
    let prompt = build_prompt(chunk);
    let payload = client
        .complete(&prompt, ModelTier::Fast, ATOM_SYSTEM_PROMPT, ATOM_MAX_TOKENS)
        .await?;
    let completion: AtomCompletion =
        serde_json::from_value(payload).map_err(|e| format!("malformed atom completion: {e}"))?;

    Ok(Atom {
        name: chunk.name.clone(),
        kind: chunk.kind,
        language: chunk.language.clone(),
        file_path: chunk.file_path.clone(),
        start_line: chunk.start_line,
        end_line: chunk.end_line,
        summary: completion.summary,
        clarified_code: completion.clarified_code,
        imports: completion.imports,
        exports: completion.exports,
    })
}

/// Analyzes every chunk with up to `max_workers` concurrent LLM calls.
/// Returns the successfully analyzed atoms (order not guaranteed to match
/// input) plus a batch outcome and the individual skip reasons.
pub async fn analyze_batch(
    client: Arc<LlmClient>,
    chunks: Vec<Chunk>,
    max_workers: usize,
) -> (Vec<Atom>, BatchOutcome, Vec<IndexError>) {
    let attempted = chunks.len();
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));

    let mut handles = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let client = client.clone();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed during a batch");
            let result = analyze_chunk(&client, &chunk).await;
            (chunk, result)
        }));
    }

    let mut atoms = Vec::new();
    let mut errors = Vec::new();
    for handle in handles {
        let (chunk, result) = handle.await.expect("atom analyzer task panicked");
        match result {
            Ok(atom) => atoms.push(atom),
            Err(message) => {
                warn!(file = %chunk.file_path, name = %chunk.name, error = %message, "skipping chunk after atom analysis failure");
                errors.push(IndexError::new(
                    "atoms",
                    format!("{}:{}", chunk.file_path, chunk.name),
                    message,
                ));
            }
        }
    }

    let outcome = BatchOutcome {
        attempted,
        skipped: errors.len(),
    };
    (atoms, outcome, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::ChunkKind;

    fn sample_chunk(name: &str) -> Chunk {
        Chunk {
            name: name.to_string(),
            kind: ChunkKind::Function,
            language: "rust".to_string(),
            file_path: "src/lib.rs".to_string(),
            start_line: 1,
            end_line: 3,
            code: "fn x() {}".to_string(),
        }
    }

    #[test]
    fn prompt_includes_positional_metadata() {
        let chunk = sample_chunk("helper");
        let prompt = build_prompt(&chunk);
        assert!(prompt.contains("helper"));
        assert!(prompt.contains("src/lib.rs"));
        assert!(prompt.contains("rust"));
    }

    #[tokio::test]
    async fn empty_batch_yields_empty_outcome() {
        let client = Arc::new(LlmClient::new(&Config::from_env()));
        let (atoms, outcome, errors) = analyze_batch(client, Vec::new(), 4).await;
        assert!(atoms.is_empty());
        assert!(errors.is_empty());
        assert_eq!(outcome.attempted, 0);
        assert!(!outcome.is_partial());
    }
}
