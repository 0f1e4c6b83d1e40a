//! Syntax highlighting using Tree-sitter.
//!
//! The rest of the crate treats this module as a pure function: text plus a
//! language in, one list of styled tokens per line out.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tree_sitter_highlight::{HighlightConfiguration, HighlightEvent, Highlighter as TsHighlighter};

/// A grammar the highlighter can run. Variants exist only when the matching
/// `lang-*` feature is compiled in; anything unrecognized ends up [`Plain`].
///
/// [`Plain`]: LanguageId::Plain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageId {
    /// No grammar; every line renders as a single unstyled token.
    Plain,
    /// Rust (`.rs`).
    #[cfg(feature = "lang-rust")]
    Rust,
    /// Go (`.go`).
    #[cfg(feature = "lang-go")]
    Go,
    /// Python (`.py`, `.pyi`).
    #[cfg(feature = "lang-python")]
    Python,
    /// TypeScript (`.ts` and the newer module-suffixed forms).
    #[cfg(feature = "lang-typescript")]
    TypeScript,
    /// JSX-flavored TypeScript or JavaScript (`.tsx`, `.jsx`).
    #[cfg(feature = "lang-typescript")]
    Tsx,
    /// JavaScript, highlighted with the TypeScript grammar (a superset).
    #[cfg(feature = "lang-typescript")]
    JavaScript,
    /// JSON (`.json`).
    #[cfg(feature = "lang-json")]
    Json,
    /// YAML (`.yaml`, `.yml`).
    #[cfg(feature = "lang-yaml")]
    Yaml,
    /// POSIX-ish shell scripts (`.sh`, `.bash`, `.zsh`).
    #[cfg(feature = "lang-bash")]
    Shell,
}

impl LanguageId {
    /// Pick a grammar from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            #[cfg(feature = "lang-rust")]
            "rs" => Self::Rust,
            #[cfg(feature = "lang-go")]
            "go" => Self::Go,
            #[cfg(feature = "lang-python")]
            "py" | "pyi" => Self::Python,
            #[cfg(feature = "lang-typescript")]
            "ts" | "mts" | "cts" => Self::TypeScript,
            #[cfg(feature = "lang-typescript")]
            "tsx" | "jsx" => Self::Tsx,
            #[cfg(feature = "lang-typescript")]
            "js" | "mjs" | "cjs" => Self::JavaScript,
            #[cfg(feature = "lang-json")]
            "json" => Self::Json,
            #[cfg(feature = "lang-yaml")]
            "yaml" | "yml" => Self::Yaml,
            #[cfg(feature = "lang-bash")]
            "sh" | "bash" | "zsh" => Self::Shell,
            _ => Self::Plain,
        }
    }

    /// Pick a grammar from a file path.
    pub fn from_path(path: &str) -> Self {
        std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Plain)
    }
}

/// The style buckets the renderer knows how to color.
///
/// Deliberately coarser than tree-sitter's capture vocabulary: captures are
/// collapsed onto these via [`capture_style`], and plain identifiers take
/// `Default` rather than getting a bucket of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StyleId {
    /// Anything unclassified, including ordinary identifiers.
    #[default]
    Default,
    /// Comments, line or block.
    Comment,
    /// Keywords and other reserved words.
    Keyword,
    /// String and character literals.
    String,
    /// Numeric and boolean literals.
    Number,
    /// Named constants.
    Constant,
    /// Type names.
    Type,
    /// Functions, methods, and constructors.
    Function,
    /// Field and property accesses.
    Property,
    /// Attributes, annotations, decorators.
    Attribute,
    /// Operators.
    Operator,
    /// Brackets, delimiters, and the rest of the punctuation.
    Punctuation,
}

/// A styled run of text within one line. Token text never contains a
/// newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The run's text.
    pub text: String,
    /// Style to render it with.
    pub style: StyleId,
}

impl Token {
    /// A token with the default style.
    pub fn plain(text: &str) -> Self {
        Token {
            text: text.to_string(),
            style: StyleId::Default,
        }
    }
}

/// Capture names we ask tree-sitter-highlight to recognize, grouped by the
/// bucket they collapse into. Sub-captures (`function.method`, ...) resolve
/// through their base name in [`capture_style`].
const CAPTURE_NAMES: &[&str] = &[
    "comment",
    "keyword",
    "string",
    "string.special",
    "number",
    "boolean",
    "constant",
    "constant.builtin",
    "type",
    "type.builtin",
    "function",
    "function.builtin",
    "function.method",
    "constructor",
    "property",
    "attribute",
    "operator",
    "punctuation",
    "punctuation.bracket",
    "punctuation.delimiter",
    "variable",
    "variable.builtin",
    "variable.parameter",
];

/// Collapse a capture name onto a style bucket by its base segment, so
/// `punctuation.bracket` follows `punctuation` without listing every
/// sub-capture.
fn capture_style(name: &str) -> StyleId {
    match name.split('.').next().unwrap_or(name) {
        "comment" => StyleId::Comment,
        "keyword" => StyleId::Keyword,
        "string" => StyleId::String,
        "number" | "boolean" => StyleId::Number,
        "constant" => StyleId::Constant,
        "type" => StyleId::Type,
        "function" | "constructor" => StyleId::Function,
        "property" => StyleId::Property,
        "attribute" => StyleId::Attribute,
        "operator" => StyleId::Operator,
        "punctuation" => StyleId::Punctuation,
        // `variable` and friends read best unstyled
        _ => StyleId::Default,
    }
}

/// Build the highlight configuration for a language, or None for Plain and
/// languages compiled out.
fn build_config(lang: LanguageId) -> Option<HighlightConfiguration> {
    let (language, highlights_query) = match lang {
        #[cfg(feature = "lang-rust")]
        LanguageId::Rust => (
            tree_sitter_rust::LANGUAGE.into(),
            tree_sitter_rust::HIGHLIGHTS_QUERY,
        ),
        #[cfg(feature = "lang-go")]
        LanguageId::Go => (
            tree_sitter_go::LANGUAGE.into(),
            tree_sitter_go::HIGHLIGHTS_QUERY,
        ),
        #[cfg(feature = "lang-python")]
        LanguageId::Python => (
            tree_sitter_python::LANGUAGE.into(),
            tree_sitter_python::HIGHLIGHTS_QUERY,
        ),
        #[cfg(feature = "lang-typescript")]
        LanguageId::TypeScript | LanguageId::JavaScript => (
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            tree_sitter_typescript::HIGHLIGHTS_QUERY,
        ),
        #[cfg(feature = "lang-typescript")]
        LanguageId::Tsx => (
            tree_sitter_typescript::LANGUAGE_TSX.into(),
            tree_sitter_typescript::HIGHLIGHTS_QUERY,
        ),
        #[cfg(feature = "lang-json")]
        LanguageId::Json => (
            tree_sitter_json::LANGUAGE.into(),
            tree_sitter_json::HIGHLIGHTS_QUERY,
        ),
        #[cfg(feature = "lang-yaml")]
        LanguageId::Yaml => (
            tree_sitter_yaml::LANGUAGE.into(),
            tree_sitter_yaml::HIGHLIGHTS_QUERY,
        ),
        #[cfg(feature = "lang-bash")]
        LanguageId::Shell => (
            tree_sitter_bash::LANGUAGE.into(),
            tree_sitter_bash::HIGHLIGHT_QUERY,
        ),
        _ => return None,
    };

    let mut config = HighlightConfiguration::new(language, "source", highlights_query, "", "").ok()?;
    config.configure(CAPTURE_NAMES);
    Some(config)
}

/// Shared per-language configuration cache; configs are expensive to build
/// and loader workers highlight concurrently.
fn cached_config(lang: LanguageId) -> Option<Arc<HighlightConfiguration>> {
    static CONFIGS: Mutex<Option<HashMap<LanguageId, Option<Arc<HighlightConfiguration>>>>> =
        Mutex::new(None);

    let mut guard = CONFIGS.lock();
    let map = guard.get_or_insert_with(HashMap::new);
    map.entry(lang)
        .or_insert_with(|| build_config(lang).map(Arc::new))
        .clone()
}

/// One default-styled token per line.
fn plain_lines(text: &str) -> Vec<Vec<Token>> {
    text.lines().map(|l| vec![Token::plain(l)]).collect()
}

/// Highlight `text` and return one token list per line (index 0 holds line 1).
///
/// Tabs are expanded to two spaces for display. Any parser or query failure
/// degrades to unstyled lines; the row count always equals the input's line
/// count.
pub fn highlight_lines(text: &str, lang: LanguageId) -> Vec<Vec<Token>> {
    let detabbed = text.replace('\t', "  ");

    let Some(config) = cached_config(lang) else {
        return plain_lines(&detabbed);
    };

    let mut highlighter = TsHighlighter::new();
    let source = detabbed.as_bytes();
    let events = match highlighter.highlight(&config, source, None, |_| None) {
        Ok(events) => events,
        Err(_) => return plain_lines(&detabbed),
    };

    let mut lines: Vec<Vec<Token>> = vec![Vec::new()];
    let mut style_stack: Vec<StyleId> = vec![StyleId::Default];
    let mut consumed = 0usize;

    let push_source = |lines: &mut Vec<Vec<Token>>, chunk: &str, style: StyleId| {
        for (idx, part) in chunk.split('\n').enumerate() {
            if idx > 0 {
                lines.push(Vec::new());
            }
            if !part.is_empty() {
                match lines.last_mut() {
                    Some(line) => line.push(Token {
                        text: part.to_string(),
                        style,
                    }),
                    None => unreachable!("lines starts non-empty"),
                }
            }
        }
    };

    for event in events {
        match event {
            Ok(HighlightEvent::Source { start, end }) => {
                let style = *style_stack.last().unwrap_or(&StyleId::Default);
                let start = start.min(detabbed.len());
                let end = end.min(detabbed.len());
                if start < end {
                    push_source(&mut lines, &detabbed[start..end], style);
                    consumed = end;
                }
            }
            Ok(HighlightEvent::HighlightStart(highlight)) => {
                let name = CAPTURE_NAMES.get(highlight.0).copied().unwrap_or("");
                style_stack.push(capture_style(name));
            }
            Ok(HighlightEvent::HighlightEnd) => {
                style_stack.pop();
            }
            Err(_) => break,
        }
    }

    // Fill any remaining content
    if consumed < detabbed.len() {
        push_source(&mut lines, &detabbed[consumed..], StyleId::Default);
    }

    // A final newline leaves a trailing empty row that is not a line
    if detabbed.ends_with('\n') && lines.last().is_some_and(Vec::is_empty) {
        lines.pop();
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_text(tokens: &[Token]) -> String {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn plain_language_passes_text_through() {
        let lines = highlight_lines("one\ntwo\nthree\n", LanguageId::Plain);
        assert_eq!(lines.len(), 3);
        assert_eq!(line_text(&lines[0]), "one");
        assert_eq!(line_text(&lines[2]), "three");
        assert!(lines.iter().all(|l| l.len() == 1));
    }

    #[test]
    fn tabs_become_spaces() {
        let lines = highlight_lines("\tindented\n", LanguageId::Plain);
        assert_eq!(line_text(&lines[0]), "  indented");
    }

    #[test]
    fn unknown_extension_is_plain() {
        assert_eq!(LanguageId::from_extension("xyz"), LanguageId::Plain);
        assert_eq!(LanguageId::from_path("no_extension"), LanguageId::Plain);
    }

    #[test]
    fn extension_lookup_ignores_case() {
        #[cfg(feature = "lang-rust")]
        assert_eq!(LanguageId::from_extension("RS"), LanguageId::Rust);
        #[cfg(feature = "lang-yaml")]
        assert_eq!(LanguageId::from_path("ci/pipeline.YML"), LanguageId::Yaml);
    }

    #[test]
    fn sub_captures_follow_their_base_name() {
        assert_eq!(capture_style("punctuation.bracket"), StyleId::Punctuation);
        assert_eq!(capture_style("function.method"), StyleId::Function);
        assert_eq!(capture_style("variable.builtin"), StyleId::Default);
        assert_eq!(capture_style("boolean"), StyleId::Number);
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_line_count_matches_input() {
        let src = "fn main() {\n    let x = 1;\n}\n";
        let lines = highlight_lines(src, LanguageId::Rust);
        assert_eq!(lines.len(), 3);
        assert_eq!(line_text(&lines[0]), "fn main() {");
        assert_eq!(line_text(&lines[1]), "    let x = 1;");
        assert_eq!(line_text(&lines[2]), "}");
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_keywords_get_styled() {
        let lines = highlight_lines("fn main() {}\n", LanguageId::Rust);
        let styled = lines[0].iter().any(|t| t.style != StyleId::Default);
        assert!(styled, "expected at least one styled token");
    }

    #[cfg(feature = "lang-yaml")]
    #[test]
    fn yaml_line_count_matches_input() {
        let src = "stages:\n  - build\n  - test\n";
        let lines = highlight_lines(src, LanguageId::Yaml);
        assert_eq!(lines.len(), 3);
        assert_eq!(line_text(&lines[1]), "  - build");
    }

    #[test]
    fn no_token_contains_newline() {
        let lines = highlight_lines("a\n\nb\n", LanguageId::Plain);
        assert_eq!(lines.len(), 3);
        for line in &lines {
            for token in line {
                assert!(!token.text.contains('\n'));
            }
        }
    }
}
