//! Language detection and tree-sitter grammar registry.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Supported language, with `Text` as the catch-all for unrecognized
/// extensions (no grammar; always chunked by lines).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Text,
}

impl Lang {
    /// Identifier used in payloads, chunk records, and config.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Text => "text",
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the corresponding
    /// feature is not enabled or the language has no grammar.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Top-level AST node kinds that represent function declarations.
    #[must_use]
    pub fn function_node_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["function_item"],
            Self::Python => &["function_definition"],
            Self::JavaScript | Self::TypeScript => &[
                "function_declaration",
                "generator_function_declaration",
            ],
            Self::Go => &["function_declaration", "method_declaration"],
            Self::Text => &[],
        }
    }

    /// Top-level AST node kinds that represent class-like declarations.
    #[must_use]
    pub fn class_node_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["struct_item", "enum_item", "trait_item", "impl_item"],
            Self::Python => &["class_definition"],
            Self::JavaScript => &["class_declaration"],
            Self::TypeScript => &["class_declaration", "abstract_class_declaration"],
            Self::Go => &["type_declaration"],
            Self::Text => &[],
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension; unrecognized extensions are `Text`.
#[must_use]
pub fn detect_language(path: &Path) -> Lang {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return Lang::Text;
    };
    match ext {
        "rs" => Lang::Rust,
        "py" | "pyi" => Lang::Python,
        "js" | "jsx" | "mjs" | "cjs" => Lang::JavaScript,
        "ts" | "tsx" | "mts" | "cts" => Lang::TypeScript,
        "go" => Lang::Go,
        _ => Lang::Text,
    }
}

/// Check if a file is recognized source code worth indexing.
#[must_use]
pub fn is_source_file(path: &Path) -> bool {
    detect_language(path) != Lang::Text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_language_rs() {
        assert_eq!(detect_language(Path::new("src/main.rs")), Lang::Rust);
    }

    #[test]
    fn detect_language_py() {
        assert_eq!(detect_language(Path::new("script.py")), Lang::Python);
    }

    #[test]
    fn detect_language_js_variants() {
        for ext in &["js", "jsx", "mjs", "cjs"] {
            let path = format!("file.{ext}");
            assert_eq!(
                detect_language(Path::new(&path)),
                Lang::JavaScript,
                "failed for .{ext}"
            );
        }
    }

    #[test]
    fn detect_language_ts_variants() {
        for ext in &["ts", "tsx", "mts", "cts"] {
            let path = format!("file.{ext}");
            assert_eq!(
                detect_language(Path::new(&path)),
                Lang::TypeScript,
                "failed for .{ext}"
            );
        }
    }

    #[test]
    fn unrecognized_extension_defaults_to_text() {
        assert_eq!(detect_language(Path::new("file.xyz")), Lang::Text);
        assert_eq!(detect_language(Path::new("Makefile")), Lang::Text);
        assert_eq!(detect_language(Path::new("notes.md")), Lang::Text);
    }

    #[test]
    fn text_has_no_grammar_or_node_kinds() {
        assert!(Lang::Text.grammar().is_none());
        assert!(Lang::Text.function_node_kinds().is_empty());
        assert!(Lang::Text.class_node_kinds().is_empty());
    }

    #[test]
    fn grammar_available_for_enabled_features() {
        #[cfg(feature = "lang-rust")]
        assert!(Lang::Rust.grammar().is_some());
        #[cfg(feature = "lang-python")]
        assert!(Lang::Python.grammar().is_some());
        #[cfg(feature = "lang-js")]
        {
            assert!(Lang::JavaScript.grammar().is_some());
            assert!(Lang::TypeScript.grammar().is_some());
        }
        #[cfg(feature = "lang-go")]
        assert!(Lang::Go.grammar().is_some());
    }

    #[test]
    fn is_source_file_filters_text() {
        assert!(is_source_file(Path::new("src/lib.rs")));
        assert!(!is_source_file(Path::new("README.md")));
        assert!(!is_source_file(Path::new("LICENSE")));
    }

    #[test]
    fn lang_id_roundtrip() {
        for lang in [
            Lang::Rust,
            Lang::Python,
            Lang::JavaScript,
            Lang::TypeScript,
            Lang::Go,
            Lang::Text,
        ] {
            assert!(!lang.id().is_empty());
            assert_eq!(lang.to_string(), lang.id());
        }
    }
}
