//! Chunker (C2): parses a source file with the language's tree-sitter grammar
//! and extracts each top-level declaration as a `Chunk`. Falls back to a
//! single whole-file chunk when the language has no grammar or the grammar
//! yields no qualifying nodes.

use crate::types::{Chunk, ChunkKind};

#[cfg(feature = "treesitter")]
use tree_sitter::{Language, Node, Parser};

const NAME_FALLBACK_LEN: usize = 60;

#[cfg(feature = "treesitter")]
fn language_for(lang: &str) -> Option<Language> {
    match lang {
        "rust" => Some(tree_sitter_rust::LANGUAGE.into()),
        "typescript" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "javascript" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "python" => Some(tree_sitter_python::LANGUAGE.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        "c" => Some(tree_sitter_c::LANGUAGE.into()),
        "cpp" => Some(tree_sitter_cpp::LANGUAGE.into()),
        "java" => Some(tree_sitter_java::LANGUAGE.into()),
        _ => None,
    }
}

/// Maps a grammar node kind to a chunk kind, for nodes that stand on their
/// own (no further descent needed to find the declaration).
#[cfg(feature = "treesitter")]
fn classify_node(kind: &str) -> Option<ChunkKind> {
    match kind {
        // Rust
        "function_item" => Some(ChunkKind::Function),
        "struct_item" | "enum_item" => Some(ChunkKind::Class),
        "trait_item" => Some(ChunkKind::Interface),
        "impl_item" => Some(ChunkKind::Class),
        "type_item" => Some(ChunkKind::Type),
        "const_item" | "static_item" => Some(ChunkKind::Const),

        // Go
        "function_declaration" => Some(ChunkKind::Function),
        "method_declaration" => Some(ChunkKind::Method),
        "const_declaration" => Some(ChunkKind::Const),

        // JS/TS/Java shared
        "class_declaration" => Some(ChunkKind::Class),
        "interface_declaration" => Some(ChunkKind::Interface),
        "type_alias_declaration" => Some(ChunkKind::Type),
        "method_definition" => Some(ChunkKind::Method),
        "lexical_declaration" => Some(ChunkKind::Const),
        "enum_declaration" => Some(ChunkKind::Class),

        // Python
        "function_definition" => Some(ChunkKind::Function),
        "class_definition" => Some(ChunkKind::Class),

        // C/C++
        "struct_specifier" | "enum_specifier" | "class_specifier" => Some(ChunkKind::Class),

        // Needs descent — handled by `resolve_declaration`.
        "type_declaration" | "export_statement" => None,

        _ => None,
    }
}

/// Some node kinds stand for a declaration found one level inside them
/// rather than at the node itself: Go's `type_declaration` wraps a
/// `type_spec`, and JS/TS's `export_statement` wraps the exported
/// declaration. Returns the node to classify/name plus its kind.
#[cfg(feature = "treesitter")]
fn resolve_declaration<'a>(node: Node<'a>) -> Option<(Node<'a>, ChunkKind)> {
    if let Some(kind) = classify_node(node.kind()) {
        return Some((node, kind));
    }

    match node.kind() {
        "type_declaration" => {
            let spec = node
                .named_children(&mut node.walk())
                .find(|c| c.kind() == "type_spec")?;
            Some((spec, ChunkKind::Type))
        }
        "export_statement" => {
            let inner = node.named_child(0)?;
            resolve_declaration(inner)
        }
        _ => None,
    }
}

#[cfg(feature = "treesitter")]
fn extract_name(node: &Node, effective: &Node, source: &[u8]) -> Option<String> {
    for field in ["name", "declarator"] {
        if let Some(n) = effective.child_by_field_name(field) {
            if let Ok(text) = n.utf8_text(source) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }

    match effective.kind() {
        // Rust impl blocks: name is the implemented type.
        "impl_item" => effective
            .child_by_field_name("type")
            .and_then(|n| n.utf8_text(source).ok())
            .map(|s| s.trim().to_string()),

        // Go type_spec: name is the first named child.
        "type_spec" => effective
            .named_child(0)
            .and_then(|n| n.utf8_text(source).ok())
            .map(|s| s.trim().to_string()),

        // JS/TS lexical declarations (`const x = ...`): name comes from the
        // first variable_declarator's `name` field.
        "lexical_declaration" => effective
            .named_children(&mut effective.walk())
            .find(|c| c.kind() == "variable_declarator")
            .and_then(|decl| decl.child_by_field_name("name"))
            .and_then(|n| n.utf8_text(source).ok())
            .map(|s| s.trim().to_string()),

        _ => {
            let _ = node;
            None
        }
    }
}

fn fallback_name(code: &str) -> String {
    let first_line = code.lines().next().unwrap_or("");
    let cut = first_line
        .char_indices()
        .nth(NAME_FALLBACK_LEN)
        .map(|(i, _)| i)
        .unwrap_or(first_line.len());
    first_line[..cut].to_string()
}

fn whole_file_chunk(path: &str, language: &str, content: &str) -> Chunk {
    let total_lines = content.lines().count().max(1);
    Chunk {
        name: path
            .rsplit('/')
            .next()
            .unwrap_or(path)
            .to_string(),
        kind: ChunkKind::Module,
        language: language.to_string(),
        file_path: path.to_string(),
        start_line: 1,
        end_line: total_lines,
        code: content.to_string(),
    }
}

/// Parse `content` (the full text of `path`) per `language` and extract
/// top-level declaration chunks. Returns a single whole-file chunk when no
/// grammar is available or no qualifying nodes are found. An empty file
/// always yields an empty list.
pub fn chunk_file(path: &str, language: &str, content: &str) -> Vec<Chunk> {
    if content.is_empty() {
        return Vec::new();
    }

    #[cfg(feature = "treesitter")]
    {
        if let Some(lang) = language_for(language) {
            let mut parser = Parser::new();
            if parser.set_language(&lang).is_ok() {
                if let Some(tree) = parser.parse(content, None) {
                    let root = tree.root_node();
                    let source = content.as_bytes();
                    let mut chunks = Vec::new();

                    let mut cursor = root.walk();
                    for child in root.children(&mut cursor) {
                        if let Some((effective, kind)) = resolve_declaration(child) {
                            let start_line = child.start_position().row + 1;
                            let end_line = child.end_position().row + 1;
                            let code = child.utf8_text(source).unwrap_or_default().to_string();
                            let name = extract_name(&child, &effective, source)
                                .unwrap_or_else(|| fallback_name(&code));

                            chunks.push(Chunk {
                                name,
                                kind,
                                language: language.to_string(),
                                file_path: path.to_string(),
                                start_line,
                                end_line,
                                code,
                            });
                        }
                    }

                    if !chunks.is_empty() {
                        return chunks;
                    }
                }
            }
        }
    }

    vec![whole_file_chunk(path, language, content)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_no_chunks() {
        assert!(chunk_file("empty.rs", "rust", "").is_empty());
    }

    #[test]
    fn css_file_falls_back_to_whole_file_module_chunk() {
        let content = "body {\n  margin: 0;\n}\n.title {\n  color: red;\n}\n";
        let chunks = chunk_file("style.css", "css", content);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Module);
        assert_eq!(chunks[0].name, "style.css");
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, content.lines().count());
    }

    #[cfg(feature = "treesitter")]
    #[test]
    fn rust_file_yields_function_and_struct_chunks() {
        let content = "fn helper() -> i32 {\n    1\n}\n\nstruct Config {\n    verbose: bool,\n}\n";
        let chunks = chunk_file("main.rs", "rust", content);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().any(|c| c.name == "helper" && c.kind == ChunkKind::Function));
        assert!(chunks.iter().any(|c| c.name == "Config" && c.kind == ChunkKind::Class));
        for c in &chunks {
            assert!(c.start_line >= 1);
            assert!(c.start_line <= c.end_line);
        }
    }

    #[cfg(feature = "treesitter")]
    #[test]
    fn rust_impl_block_uses_implemented_type_as_name() {
        let content = "struct Config;\n\nimpl Config {\n    fn new() -> Self {\n        Config\n    }\n}\n";
        let chunks = chunk_file("config.rs", "rust", content);
        let impl_chunk = chunks.iter().find(|c| c.code.starts_with("impl")).unwrap();
        assert_eq!(impl_chunk.name, "Config");
        assert_eq!(impl_chunk.kind, ChunkKind::Class);
    }

    #[cfg(feature = "treesitter")]
    #[test]
    fn go_file_yields_at_least_two_chunks() {
        let content = "package main\n\nfunc main() {\n}\n\nfunc helper() string {\n    return \"\"\n}\n";
        let chunks = chunk_file("main.go", "go", content);
        assert!(chunks.len() >= 2, "expected >=2 chunks, got {}", chunks.len());
        assert!(chunks.iter().any(|c| c.name == "main"));
        assert!(chunks.iter().any(|c| c.name == "helper"));
    }

    #[cfg(feature = "treesitter")]
    #[test]
    fn unnamed_node_falls_back_to_first_60_chars_of_source_line() {
        // static_item without a parseable name field is unlikely in valid Rust,
        // but any node missing both "name" and "declarator" fields should use
        // the truncated first line rather than panic or emit an empty name.
        let content = "const X: i32 = 1;\n";
        let chunks = chunk_file("consts.rs", "rust", content);
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].name.is_empty());
    }
}
