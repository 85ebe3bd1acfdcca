use tree_sitter::Node;

use super::types::{RelationshipKind, SymbolKind};
use super::walker::{
    clean_block_comment, clean_line_comments, field_text, non_empty, preceding, text, Decl, Grammar,
    Item, Scope,
};

pub(crate) struct Go;

fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

/// Receiver or embedded type name with pointers, generics, and package stripped.
fn type_name(mut node: Node<'_>, src: &[u8]) -> Option<String> {
    loop {
        node = match node.kind() {
            "type_identifier" | "identifier" => return Some(text(node, src).to_string()),
            "qualified_type" => return field_text(node, "name", src).map(str::to_string),
            "generic_type" => node.child_by_field_name("type")?,
            "pointer_type" | "type_elem" | "constraint_elem" | "interface_type_name" => {
                node.named_child(0)?
            }
            _ => return None,
        };
    }
}

fn receiver_type(node: Node<'_>, src: &[u8]) -> Option<String> {
    let receiver = node.child_by_field_name("receiver")?;
    let mut cursor = receiver.walk();
    let param = receiver
        .named_children(&mut cursor)
        .find(|c| c.kind() == "parameter_declaration")?;
    type_name(param.child_by_field_name("type")?, src)
}

/// `//` comment block (or one `/* */` comment) directly above `node`.
fn doc_comment(node: Node<'_>, src: &[u8]) -> Option<String> {
    let comments = preceding(node, |n| n.kind() == "comment");
    if comments.is_empty() {
        return None;
    }
    let lines: Vec<&str> = comments.iter().map(|c| text(*c, src)).collect();
    let doc = if lines.iter().all(|l| l.starts_with("//")) {
        clean_line_comments(lines, "//")
    } else {
        clean_block_comment(lines.last().copied().unwrap_or(""))
    };
    non_empty(doc)
}

/// Specs of a (possibly parenthesized) declaration, with the node whose
/// preceding comments document each spec.
fn specs<'t>(decl: Node<'t>, spec_kinds: &[&str]) -> Vec<(Node<'t>, Node<'t>)> {
    let mut out = Vec::new();
    let mut cursor = decl.walk();
    for child in decl.named_children(&mut cursor) {
        if spec_kinds.contains(&child.kind()) {
            out.push(child);
        } else if child.kind().ends_with("_list") {
            let mut inner = child.walk();
            out.extend(
                child
                    .named_children(&mut inner)
                    .filter(|c| spec_kinds.contains(&c.kind())),
            );
        }
    }
    let grouped = out.len() > 1 || out.iter().any(|s| s.parent() != Some(decl));
    out.into_iter()
        .map(|spec| (spec, if grouped { spec } else { decl }))
        .collect()
}

impl Go {
    fn type_specs<'t>(&self, node: Node<'t>, src: &[u8]) -> Vec<Decl<'t>> {
        specs(node, &["type_spec", "type_alias"])
            .into_iter()
            .filter_map(|(spec, span)| {
                let name = field_text(spec, "name", src)?;
                let ty = spec.child_by_field_name("type");
                let kind = match ty.map(|t| t.kind()) {
                    Some("struct_type") if spec.kind() == "type_spec" => SymbolKind::Class,
                    Some("interface_type") if spec.kind() == "type_spec" => SymbolKind::Interface,
                    _ => SymbolKind::Type,
                };
                let mut decl = Decl::new(kind, name, spec);
                decl.span = span;
                decl.exported = is_exported(name);
                decl.doc = doc_comment(span, src);
                match kind {
                    SymbolKind::Interface => {
                        decl.body = ty;
                        if let Some(iface) = ty {
                            let mut cursor = iface.walk();
                            decl.bases = iface
                                .named_children(&mut cursor)
                                .filter(|c| {
                                    matches!(
                                        c.kind(),
                                        "type_elem" | "constraint_elem" | "interface_type_name"
                                    )
                                })
                                .filter_map(|c| type_name(c, src))
                                .map(|t| (RelationshipKind::Implements, t))
                                .collect();
                        }
                    }
                    SymbolKind::Class => {
                        decl.body = ty.and_then(|t| {
                            let mut cursor = t.walk();
                            let list = t
                                .named_children(&mut cursor)
                                .find(|c| c.kind() == "field_declaration_list");
                            list
                        });
                    }
                    _ => {}
                }
                Some(decl)
            })
            .collect()
    }

    fn value_specs<'t>(&self, node: Node<'t>, src: &[u8]) -> Vec<Decl<'t>> {
        let mut decls = Vec::new();
        for (spec, span) in specs(node, &["var_spec", "const_spec"]) {
            let mut cursor = spec.walk();
            let names: Vec<Node<'t>> = spec.children_by_field_name("name", &mut cursor).collect();
            for name in names {
                let name = text(name, src);
                if name == "_" {
                    continue;
                }
                let mut decl = Decl::new(SymbolKind::Variable, name, spec);
                decl.span = span;
                decl.exported = is_exported(name);
                decl.doc = doc_comment(span, src);
                decl.body = spec.child_by_field_name("value");
                decls.push(decl);
            }
        }
        decls
    }
}

impl Grammar for Go {
    fn ts_language(&self) -> tree_sitter::Language {
        tree_sitter_go::LANGUAGE.into()
    }

    fn declarations<'t>(&self, node: Node<'t>, src: &[u8], scope: &Scope) -> Vec<Item<'t>> {
        let decls = match node.kind() {
            "function_declaration" | "method_declaration" | "method_elem" | "method_spec" => {
                let Some(name) = field_text(node, "name", src) else {
                    return Vec::new();
                };
                let kind = if node.kind() == "function_declaration" {
                    SymbolKind::Function
                } else {
                    SymbolKind::Method
                };
                let mut decl = Decl::new(kind, name, node);
                decl.exported = is_exported(name);
                decl.body = node.child_by_field_name("body");
                decl.doc = doc_comment(node, src);
                if node.kind() == "method_declaration" && !scope.in_type {
                    decl.owner = receiver_type(node, src);
                }
                vec![decl]
            }
            "type_declaration" => self.type_specs(node, src),
            "var_declaration" | "const_declaration" => self.value_specs(node, src),
            _ => Vec::new(),
        };
        decls.into_iter().map(Item::Declaration).collect()
    }

    fn imports(&self, node: Node<'_>, src: &[u8]) -> Option<Vec<String>> {
        if node.kind() != "import_declaration" {
            return None;
        }
        let paths = specs(node, &["import_spec"])
            .into_iter()
            .filter_map(|(spec, _)| field_text(spec, "path", src))
            .map(|p| p.trim_matches(['"', '`']).to_string())
            .collect();
        Some(paths)
    }

    fn call<'t>(&self, node: Node<'t>, src: &[u8]) -> Option<(String, Node<'t>)> {
        if node.kind() != "call_expression" {
            return None;
        }
        let callee = node.child_by_field_name("function")?;
        let name = match callee.kind() {
            "identifier" => text(callee, src).to_string(),
            "selector_expression" => field_text(callee, "field", src).unwrap_or("").to_string(),
            _ => String::new(),
        };
        Some((name, callee))
    }

    fn member_access(&self, node: Node<'_>, src: &[u8]) -> Option<String> {
        if node.kind() != "selector_expression" {
            return None;
        }
        field_text(node, "field", src).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::{parse, RelationshipKind, SymbolKind};

    const SRC: &[u8] = br#"package store

import (
	"fmt"
	"strings"
)

// Reader reads things.
type Reader interface {
	io.Closer
	Read(key string) string
}

// Store keeps values.
type Store struct {
	items map[string]string
}

// Get returns a value.
func (s *Store) Get(key string) string {
	return strings.TrimSpace(s.items[key])
}

func NewStore() *Store {
	fmt.Println("new")
	return &Store{}
}

const maxItems = 10
"#;

    #[test]
    fn receiver_methods_attach_to_struct() {
        let result = parse(SRC, "store/store.go").unwrap();
        let store = result.find("Store").unwrap();
        assert_eq!(store.kind, SymbolKind::Class);
        assert_eq!(store.doc_comment.as_deref(), Some("Store keeps values."));

        let get = result.find("Get").unwrap();
        assert_eq!(get.kind, SymbolKind::Method);
        assert_eq!(get.parent_id.as_deref(), Some(store.id.as_str()));
        assert_eq!(get.qualified_name, "Store.Get");
        assert_eq!(get.doc_comment.as_deref(), Some("Get returns a value."));
        assert!(get.exported);
        assert_eq!(get.signature, "func (s *Store) Get(key string) string");

        assert!(result.find("NewStore").unwrap().exported);
        assert!(!result.find("maxItems").unwrap().exported);
    }

    #[test]
    fn interface_embedding_implements() {
        let result = parse(SRC, "store/store.go").unwrap();
        let reader = result.find("Reader").unwrap();
        assert_eq!(reader.kind, SymbolKind::Interface);
        assert_eq!(reader.children.len(), 1);
        assert!(result.relationships.iter().any(|r| r.kind == RelationshipKind::Implements
            && r.to_name == "Closer"
            && r.from_id.as_deref() == Some(reader.id.as_str())));
    }

    #[test]
    fn imports_and_calls() {
        let result = parse(SRC, "store/store.go").unwrap();
        let imports: Vec<&str> = result
            .relationships
            .iter()
            .filter(|r| r.kind == RelationshipKind::Imports)
            .map(|r| r.to_name.as_str())
            .collect();
        assert_eq!(imports, ["fmt", "strings"]);

        let calls: Vec<&str> = result
            .relationships
            .iter()
            .filter(|r| r.kind == RelationshipKind::Calls)
            .map(|r| r.to_name.as_str())
            .collect();
        assert!(calls.contains(&"TrimSpace"));
        assert!(calls.contains(&"Println"));
    }
}
