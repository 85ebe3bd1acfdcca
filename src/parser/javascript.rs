//! JavaScript, TypeScript, and TSX share one adapter; the TypeScript grammars
//! are supersets and only add node kinds.

use tree_sitter::Node;

use super::types::{RelationshipKind, SymbolKind};
use super::walker::{
    clean_block_comment, field_text, non_empty, preceding, text, Decl, Grammar, Item, Scope,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    JavaScript,
    TypeScript,
    Tsx,
}

pub(crate) struct JavaScript {
    pub dialect: Dialect,
}

const FUNCTION_VALUES: &[&str] = &[
    "arrow_function",
    "function_expression",
    "function",
    "generator_function",
];

impl JavaScript {
    fn classify<'t>(&self, node: Node<'t>, src: &[u8], scope: &Scope) -> Vec<Decl<'t>> {
        let single = |kind: SymbolKind, body_field: &str| -> Vec<Decl<'t>> {
            let Some(name) = field_text(node, "name", src) else {
                return Vec::new();
            };
            let mut decl = Decl::new(kind, name, node);
            decl.body = node.child_by_field_name(body_field);
            vec![decl]
        };

        match node.kind() {
            "function_declaration" | "generator_function_declaration" => {
                single(SymbolKind::Function, "body")
            }
            "class_declaration" | "abstract_class_declaration" => {
                let mut decls = single(SymbolKind::Class, "body");
                if let Some(decl) = decls.first_mut() {
                    decl.bases = class_heritage(node, src);
                }
                decls
            }
            "method_definition" | "method_signature" | "abstract_method_signature" => {
                let kind = if scope.in_type {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                };
                let mut decls = single(kind, "body");
                for decl in &mut decls {
                    decl.exported = scope.parent_exported && !is_private(node, &decl.name, src);
                }
                decls
            }
            "field_definition" | "public_field_definition" | "property_signature" => {
                let name = field_text(node, "property", src)
                    .or_else(|| field_text(node, "name", src));
                let Some(name) = name else {
                    return Vec::new();
                };
                let mut decl = Decl::new(SymbolKind::Variable, name, node);
                decl.body = node.child_by_field_name("value");
                decl.exported = scope.parent_exported && !is_private(node, name, src);
                vec![decl]
            }
            "lexical_declaration" | "variable_declaration" => {
                let mut cursor = node.walk();
                let declarators: Vec<Node<'t>> = node
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "variable_declarator")
                    .collect();
                declarators
                    .into_iter()
                    .filter_map(|declarator| {
                        let name_node = declarator.child_by_field_name("name")?;
                        if name_node.kind() != "identifier" {
                            return None;
                        }
                        let value = declarator.child_by_field_name("value");
                        let is_function =
                            value.is_some_and(|v| FUNCTION_VALUES.contains(&v.kind()));
                        let (kind, body) = if is_function {
                            (
                                SymbolKind::Function,
                                value.and_then(|v| v.child_by_field_name("body")),
                            )
                        } else {
                            (SymbolKind::Variable, value)
                        };
                        let mut decl = Decl::new(kind, text(name_node, src), declarator);
                        decl.span = node;
                        decl.body = body;
                        Some(decl)
                    })
                    .collect()
            }
            "interface_declaration" if self.is_typescript() => {
                let mut decls = single(SymbolKind::Interface, "body");
                if let Some(decl) = decls.first_mut() {
                    decl.bases = interface_extends(node, src);
                }
                decls
            }
            "enum_declaration" if self.is_typescript() => single(SymbolKind::Enum, "body"),
            "type_alias_declaration" if self.is_typescript() => single(SymbolKind::Type, "value"),
            "internal_module" | "module" if self.is_typescript() => {
                single(SymbolKind::Namespace, "body")
            }
            _ => Vec::new(),
        }
    }

    fn is_typescript(&self) -> bool {
        matches!(self.dialect, Dialect::TypeScript | Dialect::Tsx)
    }
}

fn is_private(node: Node<'_>, name: &str, src: &[u8]) -> bool {
    if name.starts_with('#') {
        return true;
    }
    let mut cursor = node.walk();
    let private = node
        .named_children(&mut cursor)
        .any(|c| {
            c.kind() == "accessibility_modifier"
                && matches!(text(c, src), "private" | "protected")
        });
    private
}

fn class_heritage(node: Node<'_>, src: &[u8]) -> Vec<(RelationshipKind, String)> {
    let mut bases = Vec::new();
    let mut cursor = node.walk();
    let Some(heritage) = node
        .named_children(&mut cursor)
        .find(|c| c.kind() == "class_heritage")
    else {
        return bases;
    };

    let mut cursor = heritage.walk();
    for clause in heritage.named_children(&mut cursor) {
        match clause.kind() {
            "extends_clause" => {
                let mut inner = clause.walk();
                for value in clause.children_by_field_name("value", &mut inner) {
                    bases.push((RelationshipKind::Inherits, text(value, src).to_string()));
                }
            }
            "implements_clause" => {
                let mut inner = clause.walk();
                for ty in clause.named_children(&mut inner) {
                    bases.push((RelationshipKind::Implements, base_type_name(ty, src)));
                }
            }
            // plain JavaScript: `class A extends B`
            _ => bases.push((RelationshipKind::Inherits, text(clause, src).to_string())),
        }
    }
    bases
}

fn interface_extends(node: Node<'_>, src: &[u8]) -> Vec<(RelationshipKind, String)> {
    let mut cursor = node.walk();
    let clauses: Vec<Node<'_>> = node
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "extends_type_clause")
        .collect();
    let mut bases = Vec::new();
    for clause in clauses {
        let mut inner = clause.walk();
        for ty in clause.named_children(&mut inner) {
            bases.push((RelationshipKind::Inherits, base_type_name(ty, src)));
        }
    }
    bases
}

fn base_type_name(node: Node<'_>, src: &[u8]) -> String {
    match node.kind() {
        "generic_type" => node
            .child_by_field_name("name")
            .map(|n| text(n, src).to_string())
            .unwrap_or_else(|| text(node, src).to_string()),
        _ => text(node, src).to_string(),
    }
}

/// JSDoc and decorators attached to a declaration.
fn attach_leading(decl: &mut Decl<'_>, src: &[u8]) {
    let mut annotations: Vec<String> = Vec::new();
    let mut doc = None;

    for extra in preceding(decl.span, |n| matches!(n.kind(), "comment" | "decorator")) {
        match extra.kind() {
            "decorator" => annotations.push(text(extra, src).trim().to_string()),
            _ => {
                let raw = text(extra, src);
                doc = if raw.starts_with("/**") {
                    non_empty(clean_block_comment(raw))
                } else {
                    None
                };
            }
        }
    }

    let mut cursor = decl.node.walk();
    annotations.extend(
        decl.node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "decorator")
            .map(|c| text(c, src).trim().to_string()),
    );

    decl.annotations = annotations;
    decl.doc = doc;
}

impl Grammar for JavaScript {
    fn ts_language(&self) -> tree_sitter::Language {
        match self.dialect {
            Dialect::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Dialect::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Dialect::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }

    fn declarations<'t>(&self, node: Node<'t>, src: &[u8], scope: &Scope) -> Vec<Item<'t>> {
        let (inner, exported) = if node.kind() == "export_statement" {
            match node.child_by_field_name("declaration") {
                Some(decl) => (decl, true),
                None => return Vec::new(),
            }
        } else {
            (node, false)
        };

        let mut decls = self.classify(inner, src, scope);
        for decl in &mut decls {
            if exported {
                decl.exported = true;
                decl.span = node;
            }
            attach_leading(decl, src);
        }
        decls.into_iter().map(Item::Declaration).collect()
    }

    fn imports(&self, node: Node<'_>, src: &[u8]) -> Option<Vec<String>> {
        match node.kind() {
            "import_statement" => {
                let source = field_text(node, "source", src)?;
                Some(vec![unquote(source)])
            }
            // re-exports: `export { a } from "./a"`
            "export_statement" => field_text(node, "source", src).map(|s| vec![unquote(s)]),
            _ => None,
        }
    }

    fn call<'t>(&self, node: Node<'t>, src: &[u8]) -> Option<(String, Node<'t>)> {
        let callee = match node.kind() {
            "call_expression" => node.child_by_field_name("function")?,
            "new_expression" => node.child_by_field_name("constructor")?,
            _ => return None,
        };
        let name = match callee.kind() {
            "identifier" | "type_identifier" => text(callee, src).to_string(),
            "member_expression" => field_text(callee, "property", src).unwrap_or("").to_string(),
            _ => String::new(),
        };
        Some((name, callee))
    }

    fn member_access(&self, node: Node<'_>, src: &[u8]) -> Option<String> {
        if node.kind() != "member_expression" {
            return None;
        }
        field_text(node, "property", src).map(str::to_string)
    }
}

fn unquote(s: &str) -> String {
    s.trim_matches(['"', '\'', '`']).to_string()
}

#[cfg(test)]
mod tests {
    use crate::parser::{parse, RelationshipKind, SymbolKind};

    #[test]
    fn exported_class_with_jsdoc() {
        let src = br#"
import { render } from "./render";

/** A widget. */
export class Widget extends Base {
  #secret = 1;

  draw(ctx) {
    render(ctx);
    return this.size;
  }
}

function helper() {}
"#;
        let result = parse(src, "web/widget.js").unwrap();
        let widget = result.find("Widget").unwrap();
        assert_eq!(widget.kind, SymbolKind::Class);
        assert!(widget.exported);
        assert_eq!(widget.doc_comment.as_deref(), Some("A widget."));
        assert_eq!(widget.children.len(), 2);

        let draw = result.find("draw").unwrap();
        assert_eq!(draw.kind, SymbolKind::Method);
        assert!(draw.exported);
        assert!(!result.find("#secret").unwrap().exported);
        assert!(!result.find("helper").unwrap().exported);

        let kinds: Vec<(RelationshipKind, &str)> = result
            .relationships
            .iter()
            .map(|r| (r.kind, r.to_name.as_str()))
            .collect();
        assert!(kinds.contains(&(RelationshipKind::Imports, "./render")));
        assert!(kinds.contains(&(RelationshipKind::Inherits, "Base")));
        assert!(kinds.contains(&(RelationshipKind::Calls, "render")));
        assert!(kinds.contains(&(RelationshipKind::References, "size")));
    }

    #[test]
    fn arrow_functions_are_functions() {
        let src = b"export const add = (a, b) => a + b;\nconst LIMIT = 10;\n";
        let result = parse(src, "math.mjs").unwrap();
        assert_eq!(result.find("add").unwrap().kind, SymbolKind::Function);
        assert!(result.find("add").unwrap().exported);
        assert_eq!(result.find("LIMIT").unwrap().kind, SymbolKind::Variable);
    }

    #[test]
    fn typescript_interfaces_and_implements() {
        let src = br#"
export interface Shape extends Named {
  area(): number;
}

export class Square implements Shape {
  @memoize()
  area(): number {
    return compute(this.side);
  }
  private side: number = 2;
}

export enum Color { Red }
type Id = string;
namespace Geometry {
  export function origin() {}
}
"#;
        let result = parse(src, "src/shape.ts").unwrap();
        let shape = result.find("Shape").unwrap();
        assert_eq!(shape.kind, SymbolKind::Interface);
        assert_eq!(shape.children.len(), 1);

        let square = result.find("Square").unwrap();
        let area = result
            .symbols
            .iter()
            .find(|s| s.name == "area" && s.parent_id.as_deref() == Some(square.id.as_str()))
            .unwrap();
        assert_eq!(area.annotations, ["@memoize()"]);
        assert!(!result.find("side").unwrap().exported);

        assert!(result.relationships.iter().any(|r| r.kind == RelationshipKind::Implements
            && r.to_name == "Shape"
            && r.from_id.as_deref() == Some(square.id.as_str())));
        assert!(result
            .relationships
            .iter()
            .any(|r| r.kind == RelationshipKind::Inherits && r.to_name == "Named"));

        assert_eq!(result.find("Color").unwrap().kind, SymbolKind::Enum);
        assert_eq!(result.find("Id").unwrap().kind, SymbolKind::Type);
        let geometry = result.find("Geometry").unwrap();
        assert_eq!(geometry.kind, SymbolKind::Namespace);
        assert_eq!(result.find("origin").unwrap().qualified_name, "Geometry.origin");
    }

    #[test]
    fn tsx_parses_components() {
        let src = b"export function App() {\n  return <div>{greet()}</div>;\n}\n";
        let result = parse(src, "ui/App.tsx").unwrap();
        assert_eq!(result.find("App").unwrap().kind, SymbolKind::Function);
        assert!(result
            .relationships
            .iter()
            .any(|r| r.kind == RelationshipKind::Calls && r.to_name == "greet"));
    }
}
