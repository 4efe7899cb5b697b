//! Shared data model for the indexing pipeline: scan results, chunks, atoms,
//! history, signals, module/system analyses, the manifest, and the layer/tier
//! vocabulary used by the store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Scanner output (C1)
// ---------------------------------------------------------------------------

/// A single discovered source file. Immutable once created by the scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub abs_path: PathBuf,
    pub rel_path: String,
    pub language: String,
    pub size: u64,
}

/// A logical project root identified by a build-system manifest file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    /// e.g. "go", "node", "rust", "maven", "python", "unknown".
    pub module_type: String,
    pub abs_path: PathBuf,
    pub rel_path: String,
    /// Root-relative paths of every file assigned to this module.
    pub files: Vec<String>,
}

/// Result of a full scan: discovered files plus the modules that partition them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub root: PathBuf,
    pub files: Vec<FileInfo>,
    pub modules: Vec<Module>,
}

// ---------------------------------------------------------------------------
// Chunker output (C2)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Function,
    Method,
    Class,
    Interface,
    Type,
    Const,
    Module,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
            ChunkKind::Class => "class",
            ChunkKind::Interface => "interface",
            ChunkKind::Type => "type",
            ChunkKind::Const => "const",
            ChunkKind::Module => "module",
        }
    }
}

/// A contiguous span of one source file representing one top-level declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub name: String,
    pub kind: ChunkKind,
    pub language: String,
    pub file_path: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub code: String,
}

// ---------------------------------------------------------------------------
// Atom Analyzer output (C3)
// ---------------------------------------------------------------------------

/// A `Chunk` enriched by the fast-tier LLM pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    pub name: String,
    pub kind: ChunkKind,
    pub language: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub summary: String,
    pub clarified_code: String,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
}

/// The JSON payload requested from the fast-tier LLM for a single chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct AtomCompletion {
    pub clarified_code: String,
    pub summary: String,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub exports: Vec<String>,
}

// ---------------------------------------------------------------------------
// History Extractor output (C4)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub author: String,
    /// ISO-8601.
    pub date: String,
    pub subject: String,
    pub pr_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileHistory {
    pub file_path: String,
    pub commits: Vec<Commit>,
    pub authors: Vec<String>,
    pub churn: usize,
}

// ---------------------------------------------------------------------------
// Source Registry output (C5)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Commit,
    Pr,
    Issue,
    Ticket,
    Doc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub id: String,
    pub title: String,
    pub body: String,
    pub url: String,
    /// ISO-8601.
    pub date: String,
    pub author: String,
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Deep Analyzer output (C6)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WiringEdge {
    pub from: String,
    pub to: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub intent: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleAnalysis {
    pub module_name: String,
    pub wiring: Vec<WiringEdge>,
    pub zones: Vec<Zone>,
    pub module_intent: String,
}

/// Raw shape of the deep-tier JSON completion before the module name is
/// defaulted back to the input module when the response leaves it empty.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleAnalysisCompletion {
    #[serde(default)]
    pub module_name: String,
    #[serde(default)]
    pub wiring: Vec<WiringEdge>,
    #[serde(default)]
    pub zones: Vec<Zone>,
    #[serde(default)]
    pub module_intent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemSynthesis {
    pub blueprint: String,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SystemSynthesisCompletion {
    #[serde(default)]
    pub blueprint: String,
    #[serde(default)]
    pub patterns: Vec<String>,
}

// ---------------------------------------------------------------------------
// Manifest (C7)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub hash: String,
    pub size: u64,
    pub indexed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub project: String,
    pub indexed_at: String,
    pub files: HashMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new(project: impl Into<String>) -> Self {
        Manifest {
            version: "1.0".to_string(),
            project: project.into(),
            indexed_at: String::new(),
            files: HashMap::new(),
        }
    }
}

/// Result of comparing the manifest against the current file list.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

// ---------------------------------------------------------------------------
// Layer / Tier vocabulary (C8)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Atoms,
    History,
    Signals,
    Wiring,
    Zones,
    Blueprint,
    Patterns,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Atoms => "atoms",
            Layer::History => "history",
            Layer::Signals => "signals",
            Layer::Wiring => "wiring",
            Layer::Zones => "zones",
            Layer::Blueprint => "blueprint",
            Layer::Patterns => "patterns",
        }
    }
}

/// Name used in place of a real module name for system-wide artifacts.
pub const SYSTEM_MODULE: &str = "_system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Mini,
    Standard,
    Full,
}

impl Tier {
    /// Layers retrieved for this tier: mini ⊂ standard ⊂ full.
    pub fn layers(&self) -> &'static [Layer] {
        match self {
            Tier::Mini => &[Layer::Zones, Layer::Blueprint],
            Tier::Standard => &[Layer::Zones, Layer::Blueprint, Layer::Atoms, Layer::Wiring],
            Tier::Full => &[
                Layer::Zones,
                Layer::Blueprint,
                Layer::Atoms,
                Layer::Wiring,
                Layer::History,
                Layer::Signals,
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// LLM tiers (distinct from retrieval `Tier`)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Fast,
    Deep,
}
