//! Source Registry (C5): a small trait-object registry of pluggable
//! external-signal fetchers, grounded on the scanner's multi-scanner
//! pattern — an ordered list of independent, individually fallible
//! components invoked in turn with non-fatal error handling.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use crate::history::module_log;
use crate::types::{Signal, SignalKind};

/// Scope a source operates at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceScope {
    Project,
    Module,
}

/// Context passed to a source's `fetch`: the project root and the module
/// currently being collected for.
pub struct FetchContext<'a> {
    pub root: &'a Path,
    pub module_rel_path: &'a str,
}

/// A pluggable external-signal fetcher. Implementations differ in how they
/// reach their backing system (git subprocess, ticketing HTTP API, local
/// file reads); the registry only depends on this capability set.
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &'static str;
    fn scope(&self) -> SourceScope;

    /// Validate and store configuration key/value pairs. Default is a no-op
    /// for sources with nothing to configure.
    fn configure(&mut self, _options: &HashMap<String, String>) -> Result<(), String> {
        Ok(())
    }

    async fn fetch(&self, ctx: &FetchContext<'_>) -> Result<Vec<Signal>, String>;
}

/// Built-in source deriving commit/PR signals from the module's git log,
/// sorted newest-first.
pub struct GitLogSource {
    limit: u32,
}

impl Default for GitLogSource {
    fn default() -> Self {
        GitLogSource { limit: 50 }
    }
}

#[async_trait::async_trait]
impl Source for GitLogSource {
    fn name(&self) -> &'static str {
        "git-log"
    }

    fn scope(&self) -> SourceScope {
        SourceScope::Module
    }

    fn configure(&mut self, options: &HashMap<String, String>) -> Result<(), String> {
        if let Some(raw) = options.get("limit") {
            self.limit = raw
                .parse()
                .map_err(|e| format!("invalid git-log limit {raw:?}: {e}"))?;
        }
        Ok(())
    }

    async fn fetch(&self, ctx: &FetchContext<'_>) -> Result<Vec<Signal>, String> {
        let path_filter = if ctx.module_rel_path.is_empty() {
            None
        } else {
            Some(ctx.module_rel_path)
        };
        let commits = module_log(ctx.root, path_filter, self.limit).await;

        let mut signals: Vec<Signal> = commits
            .into_iter()
            .map(|commit| {
                let mut tags = Vec::new();
                if let Some(pr) = &commit.pr_reference {
                    tags.push("pr".to_string());
                    return Signal {
                        kind: SignalKind::Pr,
                        id: pr.clone(),
                        title: commit.subject.clone(),
                        body: commit.subject,
                        url: String::new(),
                        date: commit.date,
                        author: commit.author,
                        tags,
                    };
                }
                tags.push("commit".to_string());
                Signal {
                    kind: SignalKind::Commit,
                    id: commit.hash,
                    title: commit.subject.clone(),
                    body: commit.subject,
                    url: String::new(),
                    date: commit.date,
                    author: commit.author,
                    tags,
                }
            })
            .collect();

        signals.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(signals)
    }
}

/// An ordered collection of sources. Holds project- and module-scoped
/// sources alike; `fetch_all` filters by scope as appropriate for the
/// caller's context.
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<Box<dyn Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        SourceRegistry::default()
    }

    pub fn register(&mut self, source: Box<dyn Source>) {
        self.sources.push(source);
    }

    /// Invokes every registered source, continuing past individual
    /// failures (logged as warnings, never fatal) and concatenating the
    /// resulting signals.
    pub async fn fetch_all(&self, ctx: &FetchContext<'_>) -> Vec<Signal> {
        let mut signals = Vec::new();
        for source in &self.sources {
            match source.fetch(ctx).await {
                Ok(mut found) => signals.append(&mut found),
                Err(message) => {
                    warn!(source = source.name(), error = %message, "source fetch failed, continuing");
                }
            }
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_repo_git_log_source_yields_empty_signals() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = SourceRegistry::new();
        registry.register(Box::new(GitLogSource::default()));

        let ctx = FetchContext {
            root: dir.path(),
            module_rel_path: "",
        };
        let signals = registry.fetch_all(&ctx).await;
        assert!(signals.is_empty());
    }

    #[test]
    fn configure_rejects_unparsable_limit() {
        let mut source = GitLogSource::default();
        let mut options = HashMap::new();
        options.insert("limit".to_string(), "not-a-number".to_string());
        assert!(source.configure(&options).is_err());
    }
}
