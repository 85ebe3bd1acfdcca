use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Source languages with a parser adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Rust,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Self::Python,
        Self::Rust,
        Self::JavaScript,
        Self::TypeScript,
        Self::Tsx,
        Self::Go,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Rust => "rust",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|lang| lang.as_str() == s)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "py" | "pyi" => Some(Self::Python),
            "rs" => Some(Self::Rust),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "go" => Some(Self::Go),
            _ => None,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

/// Kinds of declarations the index knows about, uniform across languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Variable,
    Interface,
    Enum,
    Namespace,
    Type,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Variable => "variable",
            Self::Interface => "interface",
            Self::Enum => "enum",
            Self::Namespace => "namespace",
            Self::Type => "type",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(Self::Function),
            "method" => Some(Self::Method),
            "class" => Some(Self::Class),
            "variable" => Some(Self::Variable),
            "interface" => Some(Self::Interface),
            "enum" => Some(Self::Enum),
            "namespace" => Some(Self::Namespace),
            "type" => Some(Self::Type),
            _ => None,
        }
    }

    /// Only these kinds may own child symbols.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Class | Self::Interface | Self::Namespace)
    }

    /// Kinds whose bodies hold executable code (calls are attributed to them).
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function | Self::Method)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    Inherits,
    Implements,
    Imports,
    Calls,
    References,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inherits => "inherits",
            Self::Implements => "implements",
            Self::Imports => "imports",
            Self::Calls => "calls",
            Self::References => "references",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inherits" => Some(Self::Inherits),
            "implements" => Some(Self::Implements),
            "imports" => Some(Self::Imports),
            "calls" => Some(Self::Calls),
            "references" => Some(Self::References),
            _ => None,
        }
    }
}

/// A parsed declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Symbol {
    /// Stable id derived from path, kind, and qualified name.
    pub id: String,
    pub path: String,
    pub language: Language,
    pub kind: SymbolKind,
    pub name: String,
    pub qualified_name: String,
    pub signature: String,
    pub doc_comment: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub exported: bool,
    pub parent_id: Option<String>,
    /// Child symbol ids in source order.
    pub children: Vec<String>,
    /// Decorator / attribute text attached to the declaration.
    pub annotations: Vec<String>,
}

/// A directed edge derived from source. `to_id` is set when the target is
/// declared in the same file; otherwise only `to_name` is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub kind: RelationshipKind,
    pub from_id: Option<String>,
    pub to_id: Option<String>,
    pub to_name: String,
    pub path: String,
    pub line: u32,
}

/// A recoverable syntax problem found while parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub symbols: Vec<Symbol>,
    pub relationships: Vec<Relationship>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseResult {
    pub fn symbols_of_kind(&self, kind: SymbolKind) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(move |s| s.kind == kind)
    }

    pub fn find(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_from_extension() {
        assert_eq!(Language::from_path("src/main.rs"), Some(Language::Rust));
        assert_eq!(Language::from_path("pkg/app.pyi"), Some(Language::Python));
        assert_eq!(Language::from_path("web/app.tsx"), Some(Language::Tsx));
        assert_eq!(Language::from_path("web/app.mjs"), Some(Language::JavaScript));
        assert_eq!(Language::from_path("README.md"), None);
        assert_eq!(Language::from_path("Makefile"), None);
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            SymbolKind::Function,
            SymbolKind::Method,
            SymbolKind::Class,
            SymbolKind::Variable,
            SymbolKind::Interface,
            SymbolKind::Enum,
            SymbolKind::Namespace,
            SymbolKind::Type,
        ] {
            assert_eq!(SymbolKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(Language::parse("go"), Some(Language::Go));
    }

    #[test]
    fn only_containers_have_children() {
        assert!(SymbolKind::Class.is_container());
        assert!(SymbolKind::Namespace.is_container());
        assert!(!SymbolKind::Enum.is_container());
        assert!(!SymbolKind::Function.is_container());
    }
}
