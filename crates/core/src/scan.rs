//! Scanner (C1): walks a source tree, applies ignore rules, detects
//! language per file, and partitions the tree into modules.

use ignore::WalkBuilder;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::types::{FileInfo, Module, ScanResult};

// ---------------------------------------------------------------------------
// Built-in skip/lock/binary sets
// ---------------------------------------------------------------------------

/// Directory basenames pruned from the walk entirely, regardless of ignore
/// rules — build output, dependency caches, and VCS metadata.
fn skip_dirs() -> &'static HashSet<&'static str> {
    static SET: std::sync::OnceLock<HashSet<&'static str>> = std::sync::OnceLock::new();
    SET.get_or_init(|| {
        [
            ".git", ".hg", ".svn", "node_modules", "__pycache__", "target", "dist", "build",
            ".next", ".nuxt", "vendor", ".venv", "venv", ".tox", ".idea", ".vscode", "bin",
            "obj", ".gradle", ".cargo", "bower_components",
        ]
        .into_iter()
        .collect()
    })
}

fn lock_files() -> &'static HashSet<&'static str> {
    static SET: std::sync::OnceLock<HashSet<&'static str>> = std::sync::OnceLock::new();
    SET.get_or_init(|| {
        [
            "Cargo.lock",
            "package-lock.json",
            "yarn.lock",
            "pnpm-lock.yaml",
            "poetry.lock",
            "Gemfile.lock",
            "go.sum",
            "composer.lock",
            "Pipfile.lock",
        ]
        .into_iter()
        .collect()
    })
}

fn binary_extensions() -> &'static HashSet<&'static str> {
    static SET: std::sync::OnceLock<HashSet<&'static str>> = std::sync::OnceLock::new();
    SET.get_or_init(|| {
        [
            "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "svg", "pdf", "zip", "tar", "gz",
            "bz2", "xz", "7z", "rar", "exe", "dll", "so", "dylib", "a", "o", "bin", "woff",
            "woff2", "ttf", "eot", "otf", "mp3", "mp4", "mov", "avi", "mkv", "wav", "flac",
            "class", "jar", "wasm", "pyc", "db", "sqlite", "sqlite3", "lock",
        ]
        .into_iter()
        .collect()
    })
}

/// Extension → language name, as a first-class tag rather than a display hint.
fn language_for_ext(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "rs" => "rust",
        "go" => "go",
        "py" | "pyi" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascript",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescript",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "rb" => "ruby",
        "php" => "php",
        "cs" => "csharp",
        "kt" | "kts" => "kotlin",
        "swift" => "swift",
        "scala" => "scala",
        "css" | "scss" | "less" | "sass" => "css",
        "html" | "htm" => "html",
        "md" | "mdx" => "markdown",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "sh" | "bash" | "zsh" => "shell",
        _ => return None,
    })
}

/// Extensionless filenames with a known language (build scripts, etc.).
fn language_for_filename(name: &str) -> Option<&'static str> {
    Some(match name {
        "Makefile" | "makefile" => "makefile",
        "Dockerfile" => "dockerfile",
        "Rakefile" => "ruby",
        "Gemfile" => "ruby",
        _ => return None,
    })
}

fn detect_language(path: &Path) -> String {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if let Some(lang) = language_for_ext(ext) {
            return lang.to_string();
        }
    }
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if let Some(lang) = language_for_filename(name) {
            return lang.to_string();
        }
    }
    "plaintext".to_string()
}

// ---------------------------------------------------------------------------
// Binary-content sniffing
// ---------------------------------------------------------------------------

/// A file is treated as binary if its first 512 bytes contain a NUL byte.
fn looks_binary(path: &Path) -> bool {
    let mut file = match fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return true,
    };
    let mut buf = [0u8; 512];
    match file.read(&mut buf) {
        Ok(n) => buf[..n].contains(&0),
        Err(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Walk
// ---------------------------------------------------------------------------

/// Walk `root`, applying the built-in skip set, lock-file set, binary
/// detection, and any `.gitignore`-style ignore rules found under `root`.
/// Unreadable individual entries are skipped silently; an unreadable root
/// is an error.
pub fn scan(root: &Path) -> Result<ScanResult, String> {
    if !root.exists() {
        return Err(format!("root path does not exist: {}", root.display()));
    }
    if !root.is_dir() {
        return Err(format!("root path is not a directory: {}", root.display()));
    }

    let mut files = Vec::new();

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .filter_entry(|entry| {
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                let name = entry.file_name().to_string_lossy();
                return !skip_dirs().contains(name.as_ref());
            }
            true
        })
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                debug!(error = %err, "skipping unreadable entry");
                continue;
            }
        };

        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }

        let abs_path = entry.path().to_path_buf();
        let file_name = abs_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        if lock_files().contains(file_name) {
            continue;
        }

        let ext = abs_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if binary_extensions().contains(ext.as_str()) {
            continue;
        }

        if looks_binary(&abs_path) {
            continue;
        }

        let rel_path = match abs_path.strip_prefix(root) {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };

        let size = fs::metadata(&abs_path).map(|m| m.len()).unwrap_or(0);
        let language = detect_language(&abs_path);

        files.push(FileInfo {
            abs_path,
            rel_path,
            language,
            size,
        });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

    let modules = detect_modules(root, &files);

    Ok(ScanResult {
        root: root.to_path_buf(),
        files,
        modules,
    })
}

// ---------------------------------------------------------------------------
// Module detection
// ---------------------------------------------------------------------------

const MANIFEST_BASENAMES: &[(&str, &str)] = &[
    ("go.mod", "go"),
    ("package.json", "node"),
    ("Cargo.toml", "rust"),
    ("pom.xml", "maven"),
    ("pyproject.toml", "python"),
];

fn manifest_type_for(basename: &str) -> Option<&'static str> {
    MANIFEST_BASENAMES
        .iter()
        .find(|(name, _)| *name == basename)
        .map(|(_, ty)| *ty)
}

fn parse_module_name(abs_path: &Path, basename: &str) -> Option<String> {
    let content = fs::read_to_string(abs_path).ok()?;
    match basename {
        "go.mod" => {
            let re = Regex::new(r"(?m)^module\s+(\S+)").ok()?;
            re.captures(&content).map(|c| c[1].to_string())
        }
        "package.json" => {
            let value: serde_json::Value = serde_json::from_str(&content).ok()?;
            value
                .get("name")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        }
        "Cargo.toml" => {
            let value: toml::Value = content.parse().ok()?;
            value
                .get("package")
                .and_then(|p| p.get("name"))
                .and_then(|n| n.as_str())
                .map(|s| s.to_string())
        }
        "pyproject.toml" => {
            let value: toml::Value = content.parse().ok()?;
            value
                .get("project")
                .and_then(|p| p.get("name"))
                .and_then(|n| n.as_str())
                .or_else(|| {
                    value
                        .get("tool")
                        .and_then(|t| t.get("poetry"))
                        .and_then(|p| p.get("name"))
                        .and_then(|n| n.as_str())
                })
                .map(|s| s.to_string())
        }
        "pom.xml" => {
            let re = Regex::new(r"<artifactId>([^<]+)</artifactId>").ok()?;
            re.captures(&content).map(|c| c[1].to_string())
        }
        _ => None,
    }
}

/// Find every module manifest under `root`, assign each scanned file to the
/// deepest-ancestor manifest, and fall back to a single `unknown` module at
/// the root when none exist.
fn detect_modules(root: &Path, files: &[FileInfo]) -> Vec<Module> {
    // Discover manifest files among the scanned file list.
    let mut manifests: Vec<(String, &'static str, PathBuf)> = Vec::new();
    for f in files {
        if let Some(basename) = Path::new(&f.rel_path).file_name().and_then(|n| n.to_str()) {
            if let Some(module_type) = manifest_type_for(basename) {
                let dir_rel = Path::new(&f.rel_path)
                    .parent()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                manifests.push((dir_rel, module_type, f.abs_path.clone()));
            }
        }
    }

    if manifests.is_empty() {
        return vec![Module {
            name: root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            module_type: "unknown".to_string(),
            abs_path: root.to_path_buf(),
            rel_path: String::new(),
            files: files.iter().map(|f| f.rel_path.clone()).collect(),
        }];
    }

    // Deepest-first so assignment is deterministic: a file under both "a/"
    // and "a/b/" manifests is claimed by "a/b/" first.
    manifests.sort_by(|a, b| {
        let depth_a = a.0.split('/').filter(|s| !s.is_empty()).count();
        let depth_b = b.0.split('/').filter(|s| !s.is_empty()).count();
        depth_b.cmp(&depth_a).then_with(|| b.0.cmp(&a.0))
    });

    let mut modules: Vec<Module> = manifests
        .iter()
        .map(|(dir_rel, module_type, manifest_abs)| {
            let basename = manifest_abs.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let name = parse_module_name(manifest_abs, basename).unwrap_or_else(|| {
                if dir_rel.is_empty() {
                    root.file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| "root".to_string())
                } else {
                    Path::new(dir_rel)
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| dir_rel.clone())
                }
            });
            Module {
                name,
                module_type: module_type.to_string(),
                abs_path: root.join(dir_rel),
                rel_path: dir_rel.clone(),
                files: Vec::new(),
            }
        })
        .collect();

    for f in files {
        let file_dir = Path::new(&f.rel_path)
            .parent()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();

        let owner = modules.iter_mut().find(|m| {
            m.rel_path.is_empty() || file_dir == m.rel_path || file_dir.starts_with(&format!("{}/", m.rel_path))
        });

        match owner {
            Some(m) => m.files.push(f.rel_path.clone()),
            None => {
                warn!(file = %f.rel_path, "file matched no module; this should be unreachable given a root fallback");
            }
        }
    }

    // Ensure every file is claimed: if no manifest sits at the root, add a
    // fallback "unknown" module at root depth for stragglers.
    let claimed: HashSet<&str> = modules.iter().flat_map(|m| m.files.iter().map(|s| s.as_str())).collect();
    let unclaimed: Vec<String> = files
        .iter()
        .filter(|f| !claimed.contains(f.rel_path.as_str()))
        .map(|f| f.rel_path.clone())
        .collect();
    if !unclaimed.is_empty() {
        modules.push(Module {
            name: "unknown".to_string(),
            module_type: "unknown".to_string(),
            abs_path: root.to_path_buf(),
            rel_path: String::new(),
            files: unclaimed,
        });
    }

    modules
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn scans_go_project_into_one_module() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("go.mod"), "module example.com/x\n\ngo 1.21\n").unwrap();
        fs::write(
            dir.path().join("main.go"),
            "package main\n\nfunc main(){}\n\nfunc helper() string { return \"\" }\n",
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/util.go"), "package pkg\n").unwrap();
        fs::write(dir.path().join("pkg/types.go"), "package pkg\n").unwrap();

        let result = scan(dir.path()).unwrap();
        assert_eq!(result.files.len(), 4);
        assert_eq!(result.modules.len(), 1);
        assert_eq!(result.modules[0].name, "example.com/x");
        assert_eq!(result.modules[0].files.len(), 4);
    }

    #[test]
    fn respects_gitignore_negation_and_anchoring() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(".gitignore"),
            "*.log\nsecrets/\ntmp/*.txt\n!important.log\n",
        )
        .unwrap();
        fs::write(dir.path().join("debug.log"), "x").unwrap();
        fs::write(dir.path().join("important.log"), "x").unwrap();
        fs::create_dir_all(dir.path().join("secrets")).unwrap();
        fs::write(dir.path().join("secrets/key.pem"), "x").unwrap();
        fs::create_dir_all(dir.path().join("tmp")).unwrap();
        fs::write(dir.path().join("tmp/data.csv"), "a,b,c").unwrap();
        fs::write(dir.path().join("tmp/note.txt"), "x").unwrap();

        let result = scan(dir.path()).unwrap();
        let paths: HashSet<&str> = result.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert!(!paths.contains("debug.log"));
        assert!(paths.contains("important.log"));
        assert!(!paths.contains("secrets/key.pem"));
        assert!(paths.contains("tmp/data.csv"));
        assert!(!paths.contains("tmp/note.txt"));
    }

    #[test]
    fn skips_binary_and_nul_containing_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("image.png"), [0u8, 1, 2, 3]).unwrap();
        fs::write(dir.path().join("weird.txt"), [b'a', 0u8, b'b']).unwrap();
        fs::write(dir.path().join("ok.txt"), "hello").unwrap();

        let result = scan(dir.path()).unwrap();
        let paths: HashSet<&str> = result.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert!(!paths.contains("image.png"));
        assert!(!paths.contains("weird.txt"));
        assert!(paths.contains("ok.txt"));
    }

    #[test]
    fn unreadable_root_is_an_error() {
        let err = scan(Path::new("/definitely/does/not/exist/anywhere"));
        assert!(err.is_err());
    }
}
