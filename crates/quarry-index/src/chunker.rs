//! Structural chunking via tree-sitter with a line-based fallback.
//!
//! The structural pass extracts top-level functions and class-like
//! declarations as one chunk each. Oversized constructs are omitted rather
//! than truncated. Whenever the structural pass produces nothing (no grammar,
//! parse failure, or zero extractable constructs) the file is chunked by
//! fixed-size line windows instead, so every file always yields chunks.

use tree_sitter::{Node, Parser};

use crate::languages::Lang;

/// What a chunk structurally represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Function,
    Class,
    Module,
}

impl ChunkKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Module => "module",
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chunk of source with location and type tag. Line numbers are
/// 1-based and inclusive.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub content: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub kind: ChunkKind,
    pub language: Lang,
    pub name: Option<String>,
}

/// Chunker configuration.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target chunk size in characters (default: 1500).
    pub target_size: usize,
    /// Character overlap reseeded between consecutive fallback chunks
    /// (default: 200).
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_size: 1500,
            overlap: 200,
        }
    }
}

/// Functions above `target_size * 2` are skipped.
const FUNCTION_SIZE_MULTIPLIER: usize = 2;
/// Classes above `target_size * 3` are skipped.
const CLASS_SIZE_MULTIPLIER: usize = 3;

/// Chunk a source file.
///
/// Infallible: parse problems branch to the line-based fallback rather than
/// erroring. Empty input yields no chunks; any non-empty input yields at
/// least one.
#[must_use]
pub fn chunk_file(source: &str, file_path: &str, lang: Lang, config: &ChunkerConfig) -> Vec<Chunk> {
    if source.is_empty() {
        return Vec::new();
    }

    if let Some(chunks) = structural_chunks(source, file_path, lang, config)
        && !chunks.is_empty()
    {
        return chunks;
    }

    line_chunks(source, file_path, lang, config)
}

fn structural_chunks(
    source: &str,
    file_path: &str,
    lang: Lang,
    config: &ChunkerConfig,
) -> Option<Vec<Chunk>> {
    let grammar = lang.grammar()?;

    let mut parser = Parser::new();
    parser.set_language(&grammar).ok()?;
    let tree = parser.parse(source, None)?;
    let root = tree.root_node();

    let mut chunks = Vec::new();
    let child_count = u32::try_from(root.named_child_count()).unwrap_or(u32::MAX);
    for i in 0..child_count {
        let Some(node) = root.named_child(i) else {
            continue;
        };
        let Some((kind, name)) = classify(lang, &node, source) else {
            continue;
        };

        let content = &source[node.byte_range()];
        let multiplier = match kind {
            ChunkKind::Function => FUNCTION_SIZE_MULTIPLIER,
            ChunkKind::Class => CLASS_SIZE_MULTIPLIER,
            ChunkKind::Module => 1,
        };
        if content.len() > config.target_size * multiplier {
            // Oversized bodies are excluded from chunk-level embedding,
            // never truncated.
            continue;
        }

        chunks.push(Chunk {
            content: content.to_string(),
            file_path: file_path.to_string(),
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            kind,
            language: lang,
            name,
        });
    }

    Some(chunks)
}

fn classify(lang: Lang, node: &Node, source: &str) -> Option<(ChunkKind, Option<String>)> {
    let kind = node.kind();

    if lang.function_node_kinds().contains(&kind) {
        return Some((ChunkKind::Function, node_name(node, source)));
    }
    if lang.class_node_kinds().contains(&kind) {
        return Some((ChunkKind::Class, node_name(node, source)));
    }

    match (lang, kind) {
        // Decorators wrap the definition node; classify what they wrap but
        // keep the decorated span.
        (Lang::Python, "decorated_definition") => {
            let inner = node.child_by_field_name("definition")?;
            classify(lang, &inner, source)
        }
        // `const handler = () => {}` counts as a named function.
        (
            Lang::JavaScript | Lang::TypeScript,
            "lexical_declaration" | "variable_declaration",
        ) => declarator_function_name(node, source)
            .map(|name| (ChunkKind::Function, Some(name))),
        (Lang::JavaScript | Lang::TypeScript, "export_statement") => {
            let inner = node.child_by_field_name("declaration")?;
            classify(lang, &inner, source)
        }
        _ => None,
    }
}

fn node_name(node: &Node, source: &str) -> Option<String> {
    // tree-sitter-rust: impl_item uses "type" field, most others use "name"
    node.child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
        .map(|n| source[n.byte_range()].to_string())
}

fn declarator_function_name(node: &Node, source: &str) -> Option<String> {
    let child_count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
    for i in 0..child_count {
        let Some(child) = node.named_child(i) else {
            continue;
        };
        if child.kind() != "variable_declarator" {
            continue;
        }
        let Some(value) = child.child_by_field_name("value") else {
            continue;
        };
        if matches!(
            value.kind(),
            "arrow_function" | "function_expression" | "function"
        ) {
            let name = child.child_by_field_name("name")?;
            return Some(source[name.byte_range()].to_string());
        }
    }
    None
}

fn line_chunks(source: &str, file_path: &str, lang: Lang, config: &ChunkerConfig) -> Vec<Chunk> {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let mut end = start;
        let mut len = 0usize;
        while end < lines.len() {
            len += lines[end].len() + 1;
            end += 1;
            if len >= config.target_size {
                break;
            }
        }

        chunks.push(Chunk {
            content: lines[start..end].join("\n"),
            file_path: file_path.to_string(),
            start_line: start + 1,
            end_line: end,
            kind: ChunkKind::Module,
            language: lang,
            name: None,
        });

        if end >= lines.len() {
            break;
        }

        // Reseed with an overlap window proportional to the configured
        // character overlap; clamped below the emitted chunk's line count
        // so the window is never negative and progress is guaranteed.
        let emitted = end - start;
        let avg_line_len = (len / emitted).max(1);
        let overlap_lines = (config.overlap / avg_line_len).min(emitted - 1);
        start = end - overlap_lines;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> ChunkerConfig {
        ChunkerConfig::default()
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunks = chunk_file("", "empty.rs", Lang::Rust, &default_config());
        assert!(chunks.is_empty());
    }

    #[test]
    fn function_and_class_extracted_with_names() {
        let source = r"
function getUserById(id) {
  return db.users.find(id);
}

class UserService {
  constructor(db) {
    this.db = db;
  }
}
";
        let chunks = chunk_file(source, "src/users.js", Lang::JavaScript, &default_config());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].kind, ChunkKind::Function);
        assert_eq!(chunks[0].name.as_deref(), Some("getUserById"));
        assert_eq!(chunks[1].kind, ChunkKind::Class);
        assert_eq!(chunks[1].name.as_deref(), Some("UserService"));
    }

    #[test]
    fn structural_chunks_are_exact_source_substrings() {
        let source = r#"
fn alpha() {
    println!("a");
}

fn beta() {
    println!("b");
}
"#;
        let chunks = chunk_file(source, "src/lib.rs", Lang::Rust, &default_config());
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert!(source.contains(&chunk.content), "content not a substring");
            let span: Vec<&str> = source
                .lines()
                .skip(chunk.start_line - 1)
                .take(chunk.end_line - chunk.start_line + 1)
                .collect();
            assert_eq!(span.join("\n"), chunk.content);
        }
    }

    #[test]
    fn structural_chunks_do_not_overlap() {
        let source = "fn a() { 1 }\nfn b() { 2 }\nfn c() { 3 }\n";
        let chunks = chunk_file(source, "src/lib.rs", Lang::Rust, &default_config());
        assert_eq!(chunks.len(), 3);
        for pair in chunks.windows(2) {
            assert!(pair[0].end_line < pair[1].start_line);
        }
    }

    #[test]
    fn chunks_follow_source_order() {
        let source = "fn first() {}\nfn second() {}\nfn third() {}\n";
        let chunks = chunk_file(source, "src/lib.rs", Lang::Rust, &default_config());
        let names: Vec<_> = chunks.iter().filter_map(|c| c.name.as_deref()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn arrow_function_bound_to_identifier_is_named_function() {
        let source = "const loadUser = async (id) => {\n  return fetch(`/users/${id}`);\n};\n";
        let chunks = chunk_file(source, "src/api.ts", Lang::TypeScript, &default_config());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Function);
        assert_eq!(chunks[0].name.as_deref(), Some("loadUser"));
    }

    #[test]
    fn exported_declarations_are_classified() {
        let source = "export function init() {}\nexport class Registry {}\n";
        let chunks = chunk_file(source, "src/mod.ts", Lang::TypeScript, &default_config());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].kind, ChunkKind::Function);
        assert_eq!(chunks[1].kind, ChunkKind::Class);
    }

    #[test]
    fn plain_const_binding_is_not_a_chunk() {
        let source = "const LIMIT = 100;\nfunction work() { return LIMIT; }\n";
        let chunks = chunk_file(source, "src/a.js", Lang::JavaScript, &default_config());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].name.as_deref(), Some("work"));
    }

    #[test]
    fn oversized_function_is_skipped_not_truncated() {
        let config = ChunkerConfig {
            target_size: 40,
            overlap: 0,
        };
        let mut big = String::from("function huge() {\n");
        for i in 0..30 {
            big.push_str(&format!("  const v{i} = {i};\n"));
        }
        big.push_str("}\n");
        let source = format!("function tiny() {{ return 1; }}\n{big}");

        let chunks = chunk_file(&source, "src/a.js", Lang::JavaScript, &config);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].name.as_deref(), Some("tiny"));
    }

    #[test]
    fn class_size_multiplier_is_more_permissive() {
        // ~100 chars: above 2x target (80) but below 3x (120).
        let body = "x".repeat(60);
        let source = format!("class Wide {{ /* {body} */ }}\n");
        let config = ChunkerConfig {
            target_size: 40,
            overlap: 0,
        };
        let chunks = chunk_file(&source, "src/a.js", Lang::JavaScript, &config);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Class);
    }

    #[test]
    fn python_class_and_decorated_function() {
        let source = r"
class Greeter:
    def hello(self):
        print('hello')

@retry
def fetch_data():
    return request()
";
        let chunks = chunk_file(source, "app.py", Lang::Python, &default_config());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].kind, ChunkKind::Class);
        assert_eq!(chunks[0].name.as_deref(), Some("Greeter"));
        assert_eq!(chunks[1].kind, ChunkKind::Function);
        assert_eq!(chunks[1].name.as_deref(), Some("fetch_data"));
    }

    #[test]
    fn rust_impl_block_named_by_type() {
        let source = "struct Foo;\n\nimpl Foo {\n    fn bar(&self) -> i32 { 42 }\n}\n";
        let chunks = chunk_file(source, "src/foo.rs", Lang::Rust, &default_config());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].kind, ChunkKind::Class);
        assert_eq!(chunks[1].name.as_deref(), Some("Foo"));
    }

    #[test]
    fn text_files_take_line_fallback() {
        let source = "line one\nline two\nline three\n";
        let chunks = chunk_file(source, "notes.txt", Lang::Text, &default_config());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Module);
    }

    #[test]
    fn fallback_covers_every_line() {
        let config = ChunkerConfig {
            target_size: 50,
            overlap: 10,
        };
        let source: String = (0..40).map(|i| format!("line number {i}\n")).collect();
        let chunks = chunk_file(&source, "big.txt", Lang::Text, &config);
        assert!(chunks.len() > 1);

        let total_lines = source.lines().count();
        let mut covered = vec![false; total_lines];
        for chunk in &chunks {
            for line in chunk.start_line..=chunk.end_line {
                covered[line - 1] = true;
            }
        }
        assert!(covered.iter().all(|&c| c), "every line must be covered");
    }

    #[test]
    fn fallback_emits_final_partial_chunk() {
        let config = ChunkerConfig {
            target_size: 20,
            overlap: 0,
        };
        let source = "aaaaaaaaaaaaaaaaaaaa\nbb\n";
        let chunks = chunk_file(source, "f.txt", Lang::Text, &config);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].content, "bb");
    }

    #[test]
    fn fallback_single_chunk_for_small_input() {
        let chunks = chunk_file("short", "s.txt", Lang::Text, &default_config());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "short");
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
    }

    #[test]
    fn fallback_overlap_reseeds_previous_lines() {
        let config = ChunkerConfig {
            target_size: 30,
            overlap: 15,
        };
        let source = "aaaaaaaaa\nbbbbbbbbb\nccccccccc\nddddddddd\neeeeeeeee\n";
        let chunks = chunk_file(source, "f.txt", Lang::Text, &config);
        assert!(chunks.len() >= 2);
        // Each successive chunk starts at or before the previous end.
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line <= pair[0].end_line + 1);
            assert!(pair[1].start_line > pair[0].start_line, "must progress");
        }
    }

    #[test]
    fn fallback_zero_overlap_produces_disjoint_chunks() {
        let config = ChunkerConfig {
            target_size: 25,
            overlap: 0,
        };
        let source = "aaaaaaaaaaaa\nbbbbbbbbbbbb\ncccccccccccc\ndddddddddddd\n";
        let chunks = chunk_file(source, "f.txt", Lang::Text, &config);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line + 1);
        }
    }

    #[test]
    fn garbage_source_falls_back_instead_of_erroring() {
        let source = "}}}} not (( valid {{ rust ]]\nbut still text\n";
        let chunks = chunk_file(source, "broken.rs", Lang::Rust, &default_config());
        assert!(!chunks.is_empty());
    }
}
