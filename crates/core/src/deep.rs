//! Deep Analyzer (C6): one deep-tier LLM call per module producing wiring,
//! zones, and intent, followed by a single system-wide synthesis call.

use std::sync::Arc;

use tracing::warn;

use crate::error::{BatchOutcome, IndexError};
use crate::llm::LlmClient;
use crate::types::{
    Atom, FileHistory, ModelTier, ModuleAnalysis, ModuleAnalysisCompletion, Signal,
    SystemSynthesis, SystemSynthesisCompletion,
};

const MODULE_SYSTEM_PROMPT: &str = "You analyze one module of a codebase given its atoms, \
file history, and external signals. Respond with strict JSON: {\"module_name\": string, \
\"wiring\": [{\"from\": string, \"to\": string, \"reason\": string}], \
\"zones\": [{\"name\": string, \"intent\": string, \"files\": string[]}], \
\"module_intent\": string}.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "You synthesize a system-wide architectural view from a \
set of per-module analyses. Respond with strict JSON: {\"blueprint\": string, \
\"patterns\": string[]}.";

const MODULE_MAX_TOKENS: u32 = 4096;
const SYNTHESIS_MAX_TOKENS: u32 = 4096;

/// Input for one module's deep analysis: the module's atoms, per-file
/// history digests, and external signals.
pub struct ModuleInput<'a> {
    pub module_name: &'a str,
    pub atoms: &'a [Atom],
    pub histories: &'a [FileHistory],
    pub signals: &'a [Signal],
}

fn build_module_prompt(input: &ModuleInput) -> String {
    let mut sections = vec![format!("module: {}\n", input.module_name)];

    sections.push("atoms:".to_string());
    for atom in input.atoms {
        sections.push(format!(
            "- {} ({}): {}\n  imports: {:?}\n  exports: {:?}",
            atom.name, atom.kind.as_str(), atom.summary, atom.imports, atom.exports
        ));
    }

    sections.push("\nfile history:".to_string());
    for history in input.histories {
        sections.push(format!(
            "- {}: {} commits, churn={}, authors={:?}",
            history.file_path, history.commits.len(), history.churn, history.authors
        ));
    }

    sections.push("\nsignals:".to_string());
    for signal in input.signals {
        sections.push(format!("- [{:?}] {} {}", signal.kind, signal.id, signal.title));
    }

    sections.join("\n")
}

async fn analyze_module(client: &LlmClient, input: &ModuleInput<'_>) -> Result<ModuleAnalysis, String> {
    let prompt = build_module_prompt(input);
    let payload = client
        .complete(&prompt, ModelTier::Deep, MODULE_SYSTEM_PROMPT, MODULE_MAX_TOKENS)
        .await?;
    let completion: ModuleAnalysisCompletion =
        serde_json::from_value(payload).map_err(|e| format!("malformed module analysis completion: {e}"))?;

    let module_name = if completion.module_name.is_empty() {
        input.module_name.to_string()
    } else {
        completion.module_name
    };

    Ok(ModuleAnalysis {
        module_name,
        wiring: completion.wiring,
        zones: completion.zones,
        module_intent: completion.module_intent,
    })
}

/// Runs `analyze_module` for every input under a bounded worker pool,
/// returning successful analyses plus a batch outcome and per-module skip
/// reasons. Never aborts on a single module's failure.
pub async fn analyze_batch(
    client: Arc<LlmClient>,
    inputs: Vec<ModuleInput<'_>>,
    max_workers: usize,
) -> (Vec<ModuleAnalysis>, BatchOutcome, Vec<IndexError>) {
    use tokio::sync::Semaphore;

    let attempted = inputs.len();
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));

    // Module inputs borrow shared Atom/FileHistory/Signal slices, so this
    // phase fans out via concurrent futures on the current task rather than
    // `tokio::spawn`, which requires 'static ownership. The I/O-bound LLM
    // call is where the concurrency matters, not OS-thread parallelism.
    let futures_iter = inputs.into_iter().map(|input| {
        let client = &client;
        let semaphore = semaphore.clone();
        async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed during a batch");
            let module_name = input.module_name.to_string();
            let result = analyze_module(client, &input).await;
            (module_name, result)
        }
    });
    let results = futures::future::join_all(futures_iter).await;

    let mut analyses = Vec::new();
    let mut errors = Vec::new();
    for (module_name, result) in results {
        match result {
            Ok(analysis) => analyses.push(analysis),
            Err(message) => {
                warn!(module = %module_name, error = %message, "skipping module after deep analysis failure");
                errors.push(IndexError::new("analysis", module_name, message));
            }
        }
    }

    let outcome = BatchOutcome {
        attempted,
        skipped: errors.len(),
    };
    (analyses, outcome, errors)
}

fn build_synthesis_prompt(analyses: &[ModuleAnalysis]) -> String {
    let mut sections = vec!["module analyses:".to_string()];
    for analysis in analyses {
        sections.push(format!(
            "- module: {}\n  intent: {}\n  zones: {:?}\n  wiring edges: {}",
            analysis.module_name,
            analysis.module_intent,
            analysis.zones.iter().map(|z| z.name.as_str()).collect::<Vec<_>>(),
            analysis.wiring.len()
        ));
    }
    sections.join("\n")
}

/// System-wide synthesis from every successful `ModuleAnalysis`. Failure is
/// non-fatal; the caller simply does not store a synthesis record.
pub async fn synthesize(client: &LlmClient, analyses: &[ModuleAnalysis]) -> Result<SystemSynthesis, String> {
    let prompt = build_synthesis_prompt(analyses);
    let payload = client
        .complete(&prompt, ModelTier::Deep, SYNTHESIS_SYSTEM_PROMPT, SYNTHESIS_MAX_TOKENS)
        .await?;
    let completion: SystemSynthesisCompletion =
        serde_json::from_value(payload).map_err(|e| format!("malformed synthesis completion: {e}"))?;
    Ok(SystemSynthesis {
        blueprint: completion.blueprint,
        patterns: completion.patterns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_includes_module_name_and_atom_summaries() {
        let atoms = vec![Atom {
            name: "helper".to_string(),
            kind: crate::types::ChunkKind::Function,
            language: "rust".to_string(),
            file_path: "src/lib.rs".to_string(),
            start_line: 1,
            end_line: 2,
            summary: "does a thing".to_string(),
            clarified_code: "fn helper() {}".to_string(),
            imports: vec![],
            exports: vec!["helper".to_string()],
        }];
        let input = ModuleInput {
            module_name: "demo",
            atoms: &atoms,
            histories: &[],
            signals: &[],
        };
        let prompt = build_module_prompt(&input);
        assert!(prompt.contains("demo"));
        assert!(prompt.contains("does a thing"));
    }

    #[test]
    fn empty_batch_yields_no_analyses() {
        let outcome = BatchOutcome::default();
        assert_eq!(outcome.attempted, 0);
        assert!(!outcome.is_partial());
    }
}
