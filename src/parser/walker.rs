//! Language-independent tree walk.
//!
//! Adapters classify nodes through [`Grammar`]; the walker owns ordering,
//! nesting, method attachment, id derivation, and relationship emission so
//! every language produces the same shape of [`ParseResult`].

use std::collections::{HashMap, HashSet};
use tree_sitter::Node;
use uuid::Uuid;

use super::types::{
    Diagnostic, Language, ParseResult, Relationship, RelationshipKind, Symbol, SymbolKind,
};

const MAX_SIGNATURE_CHARS: usize = 240;

/// Where a declaration sits, as far as the adapter needs to know.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Scope {
    /// Inside a class / interface / namespace body or an impl block.
    pub in_type: bool,
    /// The enclosing type is itself exported.
    pub parent_exported: bool,
}

/// One declaration recognized by an adapter.
pub(crate) struct Decl<'t> {
    pub kind: SymbolKind,
    pub name: String,
    /// Node whose text yields the signature.
    pub node: Node<'t>,
    /// Outer node (decorators, export wrappers included) defining the line span.
    pub span: Node<'t>,
    /// Members for containers, code for callables, the initializer for variables.
    pub body: Option<Node<'t>>,
    pub bases: Vec<(RelationshipKind, String)>,
    pub annotations: Vec<String>,
    pub doc: Option<String>,
    pub exported: bool,
    /// Type this declaration belongs to when declared outside it.
    pub owner: Option<String>,
}

impl<'t> Decl<'t> {
    pub fn new(kind: SymbolKind, name: impl Into<String>, node: Node<'t>) -> Self {
        Self {
            kind,
            name: name.into(),
            node,
            span: node,
            body: None,
            bases: Vec::new(),
            annotations: Vec::new(),
            doc: None,
            exported: false,
            owner: None,
        }
    }
}

pub(crate) enum Item<'t> {
    Declaration(Decl<'t>),
    /// Declares members of another type without being a symbol itself
    /// (Rust `impl` blocks).
    Container {
        owner: String,
        body: Node<'t>,
        bases: Vec<(RelationshipKind, String)>,
        line: u32,
    },
}

/// Per-language node classification.
pub(crate) trait Grammar: Sync {
    fn ts_language(&self) -> tree_sitter::Language;

    /// Declarations introduced by `node`; empty when it declares nothing.
    fn declarations<'t>(&self, node: Node<'t>, src: &[u8], scope: &Scope) -> Vec<Item<'t>>;

    /// Module paths imported by `node`, if it is an import.
    fn imports(&self, node: Node<'_>, src: &[u8]) -> Option<Vec<String>>;

    /// Callee name and callee node if `node` is a call.
    fn call<'t>(&self, node: Node<'t>, src: &[u8]) -> Option<(String, Node<'t>)>;

    /// Member name if `node` is a member access (`a.b`).
    fn member_access(&self, node: Node<'_>, src: &[u8]) -> Option<String>;
}

#[derive(Clone)]
enum Source {
    File,
    Symbol(usize),
    Owner(String),
}

struct RawSymbol {
    kind: SymbolKind,
    name: String,
    signature: String,
    doc: Option<String>,
    start_line: u32,
    end_line: u32,
    exported: bool,
    parent: Option<usize>,
    owner: Option<String>,
    annotations: Vec<String>,
}

struct RawRelationship {
    kind: RelationshipKind,
    from: Source,
    to_name: String,
    line: u32,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Declarations,
    Body,
}

/// Pending step of the walk.
enum Work<'t> {
    Visit(Node<'t>, Ctx),
    Declare(Item<'t>, Ctx),
}

#[derive(Clone)]
struct Ctx {
    mode: Mode,
    parent: Option<usize>,
    enclosing: Option<usize>,
    owner: Option<String>,
    scope: Scope,
}

pub(crate) struct Walker<'g, 's> {
    grammar: &'g dyn Grammar,
    src: &'s [u8],
    symbols: Vec<RawSymbol>,
    relationships: Vec<RawRelationship>,
    callee_nodes: HashSet<usize>,
}

impl<'g, 's> Walker<'g, 's> {
    pub fn new(grammar: &'g dyn Grammar, src: &'s [u8]) -> Self {
        Self {
            grammar,
            src,
            symbols: Vec::new(),
            relationships: Vec::new(),
            callee_nodes: HashSet::new(),
        }
    }

    pub fn run(mut self, root: Node<'_>, path: &str, language: Language) -> ParseResult {
        let ctx = Ctx {
            mode: Mode::Declarations,
            parent: None,
            enclosing: None,
            owner: None,
            scope: Scope::default(),
        };
        self.walk(root, ctx);

        let diagnostics = collect_diagnostics(root);
        self.finish(path, language, diagnostics)
    }

    /// Pre-order walk on an explicit stack; nesting depth is bounded only by memory.
    fn walk<'t>(&mut self, root: Node<'t>, ctx: Ctx) {
        let mut stack = vec![Work::Visit(root, ctx)];
        while let Some(work) = stack.pop() {
            match work {
                Work::Visit(node, ctx) => self.visit(node, ctx, &mut stack),
                Work::Declare(item, ctx) => self.declare(item, &ctx, &mut stack),
            }
        }
    }

    fn visit<'t>(&mut self, node: Node<'t>, ctx: Ctx, stack: &mut Vec<Work<'t>>) {
        if let Some(targets) = self.grammar.imports(node, self.src) {
            let line = line_of(node);
            for target in targets {
                self.relationships.push(RawRelationship {
                    kind: RelationshipKind::Imports,
                    from: Source::File,
                    to_name: target,
                    line,
                });
            }
            return;
        }

        if ctx.mode == Mode::Declarations {
            let items = self.grammar.declarations(node, self.src, &ctx.scope);
            if !items.is_empty() {
                stack.extend(
                    items
                        .into_iter()
                        .rev()
                        .map(|item| Work::Declare(item, ctx.clone())),
                );
                return;
            }
        }

        self.record_usage(node, ctx.enclosing);

        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev().map(|child| Work::Visit(child, ctx.clone())));
    }

    fn declare<'t>(&mut self, item: Item<'t>, ctx: &Ctx, stack: &mut Vec<Work<'t>>) {
        match item {
            Item::Declaration(decl) => {
                let owner = decl.owner.clone().or_else(|| ctx.owner.clone());
                let idx = self.symbols.len();
                let signature = match decl.kind {
                    SymbolKind::Variable | SymbolKind::Type => first_line(decl.node, self.src),
                    _ => signature(decl.node, decl.body, self.src),
                };
                self.symbols.push(RawSymbol {
                    kind: decl.kind,
                    name: decl.name,
                    signature,
                    doc: decl.doc,
                    start_line: line_of(decl.span),
                    end_line: decl.span.end_position().row as u32 + 1,
                    exported: decl.exported,
                    parent: if owner.is_some() { None } else { ctx.parent },
                    owner,
                    annotations: decl.annotations,
                });

                let line = line_of(decl.node);
                for (kind, target) in decl.bases {
                    self.relationships.push(RawRelationship {
                        kind,
                        from: Source::Symbol(idx),
                        to_name: target,
                        line,
                    });
                }

                if let Some(body) = decl.body {
                    let child_ctx = if decl.kind.is_container() {
                        Ctx {
                            mode: Mode::Declarations,
                            parent: Some(idx),
                            enclosing: Some(idx),
                            owner: None,
                            scope: Scope {
                                in_type: true,
                                parent_exported: decl.exported,
                            },
                        }
                    } else {
                        Ctx {
                            mode: Mode::Body,
                            parent: ctx.parent,
                            enclosing: Some(idx),
                            owner: None,
                            scope: ctx.scope,
                        }
                    };
                    stack.push(Work::Visit(body, child_ctx));
                }
            }
            Item::Container {
                owner,
                body,
                bases,
                line,
            } => {
                for (kind, target) in bases {
                    self.relationships.push(RawRelationship {
                        kind,
                        from: Source::Owner(owner.clone()),
                        to_name: target,
                        line,
                    });
                }
                let child_ctx = Ctx {
                    mode: Mode::Declarations,
                    parent: None,
                    enclosing: ctx.enclosing,
                    owner: Some(owner),
                    scope: Scope {
                        in_type: true,
                        parent_exported: false,
                    },
                };
                stack.push(Work::Visit(body, child_ctx));
            }
        }
    }

    fn record_usage(&mut self, node: Node<'_>, enclosing: Option<usize>) {
        let from = enclosing.map(Source::Symbol).unwrap_or(Source::File);
        if let Some((name, callee)) = self.grammar.call(node, self.src) {
            self.callee_nodes.insert(callee.id());
            if !name.is_empty() {
                self.relationships.push(RawRelationship {
                    kind: RelationshipKind::Calls,
                    from,
                    to_name: name,
                    line: line_of(node),
                });
            }
            return;
        }
        if self.callee_nodes.contains(&node.id()) {
            return;
        }
        if let Some(member) = self.grammar.member_access(node, self.src) {
            self.relationships.push(RawRelationship {
                kind: RelationshipKind::References,
                from,
                to_name: member,
                line: line_of(node),
            });
        }
    }

    fn finish(self, path: &str, language: Language, diagnostics: Vec<Diagnostic>) -> ParseResult {
        let Self {
            mut symbols,
            relationships,
            ..
        } = self;

        // Attach out-of-line members (impl methods, Go receivers) to their type.
        let owner_of = |name: &str, symbols: &[RawSymbol]| {
            symbols
                .iter()
                .position(|s| s.name == name && s.kind.is_container() && s.owner.is_none())
        };
        for i in 0..symbols.len() {
            if let Some(owner) = symbols[i].owner.clone() {
                if let Some(parent) = owner_of(&owner, &symbols) {
                    symbols[i].parent = Some(parent);
                    symbols[i].owner = None;
                }
            }
        }

        let qualified: Vec<String> = (0..symbols.len())
            .map(|i| qualified_name(&symbols, i))
            .collect();

        let mut seen: HashMap<String, usize> = HashMap::new();
        let ids: Vec<String> = symbols
            .iter()
            .zip(&qualified)
            .map(|(sym, qname)| {
                let mut key = format!("{path}\0{}\0{qname}", sym.kind.as_str());
                let n = seen.entry(key.clone()).or_insert(0);
                if *n > 0 {
                    key.push_str(&format!("#{n}"));
                }
                *n += 1;
                symbol_id(&key)
            })
            .collect();

        let mut children: Vec<Vec<String>> = vec![Vec::new(); symbols.len()];
        for (i, sym) in symbols.iter().enumerate() {
            if let Some(parent) = sym.parent {
                children[parent].push(ids[i].clone());
            }
        }

        let mut by_name: HashMap<&str, usize> = HashMap::new();
        for (i, sym) in symbols.iter().enumerate() {
            by_name.entry(sym.name.as_str()).or_insert(i);
        }
        for (i, qname) in qualified.iter().enumerate() {
            by_name.entry(qname.as_str()).or_insert(i);
        }

        let relationships = relationships
            .into_iter()
            .map(|rel| {
                let from_id = match &rel.from {
                    Source::File => None,
                    Source::Symbol(i) => Some(ids[*i].clone()),
                    Source::Owner(name) => owner_of(name, &symbols).map(|i| ids[i].clone()),
                };
                let to_id = if rel.kind == RelationshipKind::Imports {
                    None
                } else {
                    by_name
                        .get(rel.to_name.as_str())
                        .or_else(|| by_name.get(last_segment(&rel.to_name)))
                        .map(|i| ids[*i].clone())
                };
                Relationship {
                    kind: rel.kind,
                    from_id,
                    to_id,
                    to_name: rel.to_name,
                    path: path.to_string(),
                    line: rel.line,
                }
            })
            .collect();

        let symbols = symbols
            .into_iter()
            .enumerate()
            .zip(children)
            .map(|((i, sym), children)| Symbol {
                id: ids[i].clone(),
                path: path.to_string(),
                language,
                kind: sym.kind,
                name: sym.name,
                qualified_name: qualified[i].clone(),
                signature: sym.signature,
                doc_comment: sym.doc,
                start_line: sym.start_line,
                end_line: sym.end_line,
                exported: sym.exported,
                parent_id: sym.parent.map(|p| ids[p].clone()),
                children,
                annotations: sym.annotations,
            })
            .collect();

        ParseResult {
            symbols,
            relationships,
            diagnostics,
        }
    }
}

fn qualified_name(symbols: &[RawSymbol], i: usize) -> String {
    let mut parts = vec![symbols[i].name.as_str()];
    let mut current = &symbols[i];
    while let Some(parent) = current.parent {
        current = &symbols[parent];
        parts.push(current.name.as_str());
    }
    if let Some(owner) = current.owner.as_deref() {
        parts.push(owner);
    }
    parts.reverse();
    parts.join(".")
}

/// Deterministic symbol id: UUID v5 over the disambiguated key.
pub(crate) fn symbol_id(key: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

fn collect_diagnostics(root: Node<'_>) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_missing() {
            out.push(Diagnostic {
                line: line_of(node),
                column: node.start_position().column as u32 + 1,
                message: format!("missing {}", node.kind()),
            });
            continue;
        }
        if node.is_error() {
            out.push(Diagnostic {
                line: line_of(node),
                column: node.start_position().column as u32 + 1,
                message: "syntax error".to_string(),
            });
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    out
}

// ---------------------------------------------------------------------------
// Helpers shared by adapters
// ---------------------------------------------------------------------------

pub(crate) fn text<'s>(node: Node<'_>, src: &'s [u8]) -> &'s str {
    node.utf8_text(src).unwrap_or("")
}

pub(crate) fn field_text<'s>(node: Node<'_>, field: &str, src: &'s [u8]) -> Option<&'s str> {
    node.child_by_field_name(field)
        .map(|n| text(n, src))
        .filter(|s| !s.is_empty())
}

pub(crate) fn line_of(node: Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

/// Last path segment of `a.b.c`, `a::b::c`, or `a/b/c`.
pub(crate) fn last_segment(name: &str) -> &str {
    name.rsplit(['.', ':', '/']).next().unwrap_or(name)
}

/// Text of `node` up to the start of `body`, whitespace collapsed.
fn signature(node: Node<'_>, body: Option<Node<'_>>, src: &[u8]) -> String {
    let start = node.start_byte();
    let end = body
        .filter(|b| b.start_byte() > start && b.start_byte() <= node.end_byte())
        .map(|b| b.start_byte())
        .unwrap_or_else(|| node.end_byte());
    let raw = String::from_utf8_lossy(&src[start..end]);
    let collapsed = collapse_whitespace(&raw);
    truncate(collapsed.trim_end_matches(['{', ':', '=', ' ', ';']).to_string())
}

fn first_line(node: Node<'_>, src: &[u8]) -> String {
    let raw = String::from_utf8_lossy(&src[node.start_byte()..node.end_byte()]);
    let line = raw.lines().next().unwrap_or("");
    truncate(collapse_whitespace(line).trim_end_matches(['{', ';', ' ']).to_string())
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(mut s: String) -> String {
    if s.chars().count() > MAX_SIGNATURE_CHARS {
        let cut = s
            .char_indices()
            .nth(MAX_SIGNATURE_CHARS)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        s.truncate(cut);
        s.push('…');
    }
    s
}

/// Comments and other extras immediately preceding `node`, in source order.
///
/// Walks back over siblings accepted by `accept`; stops at the first other
/// node or at a blank-line gap.
pub(crate) fn preceding<'t>(node: Node<'t>, accept: impl Fn(Node<'t>) -> bool) -> Vec<Node<'t>> {
    let mut out = Vec::new();
    let mut next_row = node.start_position().row;
    let mut current = node.prev_named_sibling();
    while let Some(sibling) = current {
        if !accept(sibling) || sibling.end_position().row + 1 < next_row {
            break;
        }
        next_row = sibling.start_position().row;
        out.push(sibling);
        current = sibling.prev_named_sibling();
    }
    out.reverse();
    out
}

/// Strip `/** ... */` delimiters and leading `*` gutters.
pub(crate) fn clean_block_comment(raw: &str) -> String {
    let inner = raw
        .trim()
        .trim_start_matches("/**")
        .trim_start_matches("/*")
        .trim_end_matches("*/");
    inner
        .lines()
        .map(|line| line.trim().trim_start_matches('*').trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip a line-comment marker (`///`, `//`, `#`) from each line.
pub(crate) fn clean_line_comments<'a>(
    lines: impl IntoIterator<Item = &'a str>,
    marker: &str,
) -> String {
    lines
        .into_iter()
        .map(|line| {
            let line = line.trim();
            let line = line.strip_prefix(marker).unwrap_or(line);
            line.strip_prefix(' ').unwrap_or(line).trim_end()
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

pub(crate) fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_segment_handles_all_separators() {
        assert_eq!(last_segment("os.path.join"), "join");
        assert_eq!(last_segment("std::fmt::Display"), "Display");
        assert_eq!(last_segment("./utils/http"), "http");
        assert_eq!(last_segment("plain"), "plain");
    }

    #[test]
    fn block_comment_cleanup() {
        let raw = "/**\n * Adds two numbers.\n *\n * Returns the sum.\n */";
        assert_eq!(clean_block_comment(raw), "Adds two numbers.\nReturns the sum.");
    }

    #[test]
    fn line_comment_cleanup() {
        let doc = clean_line_comments(["/// First line", "///   indented", "///"], "///");
        assert_eq!(doc, "First line\n  indented");
    }

    #[test]
    fn symbol_ids_are_deterministic() {
        assert_eq!(symbol_id("a.py\0function\0f"), symbol_id("a.py\0function\0f"));
        assert_ne!(symbol_id("a.py\0function\0f"), symbol_id("b.py\0function\0f"));
    }
}
