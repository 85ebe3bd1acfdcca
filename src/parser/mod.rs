//! Source parsing via tree-sitter.
//!
//! [`parse`] maps a file's extension to a [`Language`], runs the grammar, and
//! hands the tree to the shared walker. Malformed input still yields whatever
//! declarations could be recovered plus diagnostics; only a missing tree is
//! reported as [`ParseError::ParseFailed`].

mod go;
mod javascript;
mod python;
mod rust;
pub mod types;
mod walker;

pub use types::{
    Diagnostic, Language, ParseResult, Relationship, RelationshipKind, Symbol, SymbolKind,
};

use crate::error::ParseError;
use javascript::{Dialect, JavaScript};
use walker::{Grammar, Walker};

static PYTHON: python::Python = python::Python;
static RUST: rust::Rust = rust::Rust;
static JAVASCRIPT: JavaScript = JavaScript {
    dialect: Dialect::JavaScript,
};
static TYPESCRIPT: JavaScript = JavaScript {
    dialect: Dialect::TypeScript,
};
static TSX: JavaScript = JavaScript { dialect: Dialect::Tsx };
static GO: go::Go = go::Go;

fn grammar(language: Language) -> &'static dyn Grammar {
    match language {
        Language::Python => &PYTHON,
        Language::Rust => &RUST,
        Language::JavaScript => &JAVASCRIPT,
        Language::TypeScript => &TYPESCRIPT,
        Language::Tsx => &TSX,
        Language::Go => &GO,
    }
}

/// Parse `bytes` as the language implied by `path`'s extension.
///
/// `path` should be workspace-relative; it is baked into symbol ids.
pub fn parse(bytes: &[u8], path: &str) -> Result<ParseResult, ParseError> {
    let language =
        Language::from_path(path).ok_or_else(|| ParseError::UnsupportedLanguage(path.to_string()))?;
    parse_as(bytes, path, language)
}

/// Parse with an explicit language, bypassing extension detection.
pub fn parse_as(bytes: &[u8], path: &str, language: Language) -> Result<ParseResult, ParseError> {
    let grammar = grammar(language);
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&grammar.ts_language())
        .map_err(|e| ParseError::ParseFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

    let tree = parser.parse(bytes, None).ok_or_else(|| ParseError::ParseFailed {
        path: path.to_string(),
        reason: "parser produced no tree".to_string(),
    })?;

    let result = Walker::new(grammar, bytes).run(tree.root_node(), path, language);
    if !result.diagnostics.is_empty() {
        tracing::debug!(
            path,
            diagnostics = result.diagnostics.len(),
            symbols = result.symbols.len(),
            "parsed with syntax errors"
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_extension_is_an_error() {
        let err = parse(b"hello", "notes.txt").unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedLanguage(_)));
    }

    #[test]
    fn blank_input_yields_no_symbols() {
        for path in ["a.py", "a.rs", "a.js", "a.ts", "a.tsx", "a.go"] {
            let result = parse(b"\n\n", path).unwrap();
            assert!(result.symbols.is_empty(), "{path}");
        }
    }

    #[test]
    fn parsing_is_deterministic() {
        let src = b"class A:\n    def f(self):\n        g()\n\ndef g():\n    pass\n";
        let first = parse(src, "det.py").unwrap();
        let second = parse(src, "det.py").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn duplicate_names_get_distinct_ids() {
        let src = b"def f():\n    pass\n\ndef f():\n    pass\n";
        let result = parse(src, "dup.py").unwrap();
        assert_eq!(result.symbols.len(), 2);
        assert_ne!(result.symbols[0].id, result.symbols[1].id);
    }

    #[test]
    fn garbage_never_panics() {
        let garbage: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        for path in ["g.py", "g.rs", "g.js", "g.ts", "g.tsx", "g.go"] {
            let _ = parse(&garbage, path);
        }
    }

    #[test]
    fn deep_nesting_is_walked_without_recursion() {
        let n = 20_000;
        let balanced = format!("def f():\n    x = {}1{}\n", "(".repeat(n), ")".repeat(n));
        let result = parse(balanced.as_bytes(), "deep.py").unwrap();
        assert!(result.find("f").is_some());

        let broken = format!("def g():\n    y = {}1 +{}\n", "(".repeat(n), ")".repeat(n));
        let result = parse(broken.as_bytes(), "broken.py").unwrap();
        assert!(!result.diagnostics.is_empty());

        let rust = format!("fn h() {{ let z = {}0{}; }}\n", "[".repeat(n), "]".repeat(n));
        let result = parse(rust.as_bytes(), "deep.rs").unwrap();
        assert!(result.find("h").is_some());
    }
}
