//! Manifest (C7): content-hash index of previously indexed files, used to
//! detect added/modified/removed files between runs.

use std::collections::HashSet;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::types::{ChangeSet, Manifest, ManifestEntry};

const HIDDEN_DIR: &str = ".carto";
const MANIFEST_FILE: &str = "manifest.json";

fn manifest_path(root: &Path) -> std::path::PathBuf {
    root.join(HIDDEN_DIR).join(MANIFEST_FILE)
}

/// Reads `<root>/.carto/manifest.json`, returning an empty manifest (not an
/// error) if it does not yet exist.
pub fn load(root: &Path, project: &str) -> Result<Manifest, String> {
    let path = manifest_path(root);
    if !path.exists() {
        return Ok(Manifest::new(project));
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("failed to read manifest at {}: {e}", path.display()))?;
    serde_json::from_str(&content).map_err(|e| format!("malformed manifest JSON: {e}"))
}

/// Writes the manifest atomically: ensure the directory exists, marshal,
/// then write the whole file in one call.
pub fn save(root: &Path, manifest: &Manifest) -> Result<(), String> {
    let dir = root.join(HIDDEN_DIR);
    std::fs::create_dir_all(&dir)
        .map_err(|e| format!("failed to create {}: {e}", dir.display()))?;
    let content = serde_json::to_string_pretty(manifest)
        .map_err(|e| format!("failed to marshal manifest: {e}"))?;
    std::fs::write(manifest_path(root), content)
        .map_err(|e| format!("failed to write manifest: {e}"))
}

/// SHA-256 hex digest of a file's bytes.
pub fn compute_hash(path: &Path) -> Result<String, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Partitions `current_files` (root-relative paths) against the manifest
/// into Added/Modified/Removed. `Added ∪ Unchanged ∪ Modified = current`;
/// `Removed = manifest \ current`.
pub fn detect_changes(manifest: &Manifest, root: &Path, current_files: &[String]) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let current_set: HashSet<&str> = current_files.iter().map(|s| s.as_str()).collect();

    for rel_path in current_files {
        match manifest.files.get(rel_path) {
            None => changes.added.push(rel_path.clone()),
            Some(entry) => {
                let abs_path = root.join(rel_path);
                match compute_hash(&abs_path) {
                    Ok(hash) if hash != entry.hash => changes.modified.push(rel_path.clone()),
                    Ok(_) => {}
                    Err(_) => changes.modified.push(rel_path.clone()),
                }
            }
        }
    }

    for rel_path in manifest.files.keys() {
        if !current_set.contains(rel_path.as_str()) {
            changes.removed.push(rel_path.clone());
        }
    }

    changes
}

/// Sets or replaces a file's manifest entry with the current wall-clock time.
pub fn update_file(manifest: &mut Manifest, rel_path: &str, hash: String, size: u64) {
    manifest.files.insert(
        rel_path.to_string(),
        ManifestEntry {
            hash,
            size,
            indexed_at: chrono::Utc::now().to_rfc3339(),
        },
    );
}

/// Deletes a file's manifest entry, if present.
pub fn remove_file(manifest: &mut Manifest, rel_path: &str) {
    manifest.files.remove(rel_path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let mut manifest = Manifest::new("demo");
        update_file(&mut manifest, "src/lib.rs", "deadbeef".to_string(), 42);

        save(dir.path(), &manifest).unwrap();
        let loaded = load(dir.path(), "demo").unwrap();

        assert_eq!(loaded.project, manifest.project);
        assert_eq!(loaded.files.len(), 1);
        assert_eq!(loaded.files["src/lib.rs"].hash, "deadbeef");
    }

    #[test]
    fn missing_manifest_yields_empty_not_error() {
        let dir = tempdir().unwrap();
        let manifest = load(dir.path(), "demo").unwrap();
        assert!(manifest.files.is_empty());
    }

    #[test]
    fn detect_changes_partitions_added_modified_removed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "original").unwrap();
        fs::write(dir.path().join("b.rs"), "unchanged").unwrap();

        let mut manifest = Manifest::new("demo");
        let hash_a = compute_hash(&dir.path().join("a.rs")).unwrap();
        let hash_b = compute_hash(&dir.path().join("b.rs")).unwrap();
        update_file(&mut manifest, "a.rs", hash_a, 8);
        update_file(&mut manifest, "b.rs", hash_b, 9);
        update_file(&mut manifest, "gone.rs", "stale".to_string(), 1);

        fs::write(dir.path().join("a.rs"), "changed now").unwrap();
        fs::write(dir.path().join("c.rs"), "brand new").unwrap();

        let current = vec!["a.rs".to_string(), "b.rs".to_string(), "c.rs".to_string()];
        let changes = detect_changes(&manifest, dir.path(), &current);

        assert_eq!(changes.added, vec!["c.rs".to_string()]);
        assert_eq!(changes.modified, vec!["a.rs".to_string()]);
        assert_eq!(changes.removed, vec!["gone.rs".to_string()]);
    }

    #[test]
    fn unchanged_tree_has_no_added_modified_or_removed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "same").unwrap();
        let hash = compute_hash(&dir.path().join("a.rs")).unwrap();

        let mut manifest = Manifest::new("demo");
        update_file(&mut manifest, "a.rs", hash, 4);

        let current = vec!["a.rs".to_string()];
        let changes = detect_changes(&manifest, dir.path(), &current);
        assert!(changes.added.is_empty());
        assert!(changes.modified.is_empty());
        assert!(changes.removed.is_empty());
    }
}
