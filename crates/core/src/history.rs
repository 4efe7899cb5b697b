//! History Extractor (C4): per-file git log mining over a subprocess. A
//! missing `git` binary, a non-repo directory, or a missing file all yield an
//! empty history, never an error.

use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::types::{Commit, FileHistory};

const DEFAULT_COMMIT_LIMIT: u32 = 50;
const DEFAULT_SINCE: &str = "6 months ago";

fn pr_reference_re_hash() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#(\d+)").unwrap())
}

fn pr_reference_re_pr() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)PR[ -]?(\d+)").unwrap())
}

/// Extracts a PR reference from a commit subject: `#<digits>` takes
/// precedence over `PR[ -]?<digits>`; neither present yields `""`.
pub fn parse_pr_reference(subject: &str) -> String {
    if let Some(caps) = pr_reference_re_hash().captures(subject) {
        return format!("#{}", &caps[1]);
    }
    if let Some(caps) = pr_reference_re_pr().captures(subject) {
        return format!("PR-{}", &caps[1]);
    }
    String::new()
}

fn parse_log_line(line: &str) -> Option<Commit> {
    let mut parts = line.splitn(4, '|');
    let hash = parts.next()?.to_string();
    let author = parts.next()?.to_string();
    let date = parts.next()?.to_string();
    let subject = parts.next().unwrap_or_default().to_string();
    if hash.is_empty() {
        return None;
    }
    let pr_reference = {
        let r = parse_pr_reference(&subject);
        if r.is_empty() { None } else { Some(r) }
    };
    Some(Commit {
        hash,
        author,
        date,
        subject,
        pr_reference,
    })
}

async fn run_git_log(args: &[String]) -> Vec<Commit> {
    let output = match Command::new("git").args(args).output().await {
        Ok(o) => o,
        Err(e) => {
            debug!(error = %e, "git binary unavailable or failed to spawn");
            return Vec::new();
        }
    };
    if !output.status.success() {
        return Vec::new();
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(parse_log_line)
        .collect()
}

fn unique_authors(commits: &[Commit]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut authors = Vec::new();
    for c in commits {
        if seen.insert(c.author.clone()) {
            authors.push(c.author.clone());
        }
    }
    authors
}

/// Per-file history over `--follow`, bounded by commit count and a relative
/// time window.
pub async fn file_history(root: &Path, rel_path: &str) -> FileHistory {
    let args = vec![
        "-C".to_string(),
        root.to_string_lossy().to_string(),
        "log".to_string(),
        "--follow".to_string(),
        "--pretty=format:%H|%an|%aI|%s".to_string(),
        format!("-n{DEFAULT_COMMIT_LIMIT}"),
        format!("--since={DEFAULT_SINCE}"),
        "--".to_string(),
        rel_path.to_string(),
    ];
    let commits = run_git_log(&args).await;
    let authors = unique_authors(&commits);
    let churn = commits.len();
    FileHistory {
        file_path: rel_path.to_string(),
        commits,
        authors,
        churn,
    }
}

/// Module-scoped log used by the built-in commit/PR signal source: no
/// `--follow`, no `--since`, optionally restricted to a path.
pub async fn module_log(root: &Path, rel_path: Option<&str>, limit: u32) -> Vec<Commit> {
    let mut args = vec![
        "-C".to_string(),
        root.to_string_lossy().to_string(),
        "log".to_string(),
        "--pretty=format:%H|%an|%aI|%s".to_string(),
        format!("-n{limit}"),
    ];
    if let Some(path) = rel_path {
        args.push("--".to_string());
        args.push(path.to_string());
    }
    run_git_log(&args).await
}

/// Runs `file_history` for every given path under a bounded worker pool.
pub async fn bulk_history(root: &Path, rel_paths: &[String], max_workers: usize) -> Vec<FileHistory> {
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let root = Arc::new(root.to_path_buf());

    let mut handles = Vec::with_capacity(rel_paths.len());
    for rel_path in rel_paths {
        let semaphore = semaphore.clone();
        let root = root.clone();
        let rel_path = rel_path.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed during bulk history");
            file_history(&root, &rel_path).await
        }));
    }

    let mut histories = Vec::with_capacity(handles.len());
    for handle in handles {
        histories.push(handle.await.expect("history extraction task panicked"));
    }
    histories
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pr_reference_prefers_hash_form() {
        assert_eq!(parse_pr_reference("Fix bug (#123)"), "#123");
        assert_eq!(parse_pr_reference("PR-456 something"), "PR-456");
        assert_eq!(parse_pr_reference("no ref"), "");
    }

    #[test]
    fn parses_pipe_delimited_log_line() {
        let commit = parse_log_line("abc123|Jane Doe|2024-01-02T03:04:05+00:00|Fix the thing (#42)").unwrap();
        assert_eq!(commit.hash, "abc123");
        assert_eq!(commit.author, "Jane Doe");
        assert_eq!(commit.pr_reference, Some("#42".to_string()));
    }

    #[test]
    fn subject_with_pipes_is_preserved_whole() {
        let commit = parse_log_line("h|a|d|one | two | three").unwrap();
        assert_eq!(commit.subject, "one | two | three");
    }

    #[tokio::test]
    async fn non_repo_directory_yields_empty_history_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let history = file_history(dir.path(), "missing.rs").await;
        assert!(history.commits.is_empty());
        assert_eq!(history.churn, 0);
    }
}
