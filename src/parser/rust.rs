use tree_sitter::Node;

use super::types::{RelationshipKind, SymbolKind};
use super::walker::{
    clean_block_comment, clean_line_comments, field_text, line_of, non_empty, preceding, text,
    Decl, Grammar, Item, Scope,
};

pub(crate) struct Rust;

impl Rust {
    fn item<'t>(&self, node: Node<'t>, src: &[u8], scope: &Scope) -> Option<Item<'t>> {
        let kind = match node.kind() {
            "function_item" | "function_signature_item" if scope.in_type => SymbolKind::Method,
            "function_item" | "function_signature_item" => SymbolKind::Function,
            "struct_item" | "union_item" => SymbolKind::Class,
            "enum_item" => SymbolKind::Enum,
            "trait_item" => SymbolKind::Interface,
            "mod_item" => SymbolKind::Namespace,
            "const_item" | "static_item" => SymbolKind::Variable,
            "type_item" => SymbolKind::Type,
            "impl_item" => return self.impl_block(node, src),
            _ => return None,
        };

        let name = field_text(node, "name", src)?;
        let mut decl = Decl::new(kind, name, node);
        decl.exported = has_visibility(node);
        decl.body = match kind {
            SymbolKind::Variable => node.child_by_field_name("value"),
            _ => node.child_by_field_name("body"),
        };

        let (annotations, doc) = leading_attributes(node, src);
        decl.annotations = annotations;
        decl.doc = doc;

        if kind == SymbolKind::Interface {
            if let Some(bounds) = node.child_by_field_name("bounds") {
                let mut cursor = bounds.walk();
                for bound in bounds.named_children(&mut cursor) {
                    if let Some(name) = type_name(bound, src) {
                        decl.bases.push((RelationshipKind::Inherits, name));
                    }
                }
            }
        }
        Some(Item::Declaration(decl))
    }

    fn impl_block<'t>(&self, node: Node<'t>, src: &[u8]) -> Option<Item<'t>> {
        let owner = type_name(node.child_by_field_name("type")?, src)?;
        let body = node.child_by_field_name("body")?;
        let bases = node
            .child_by_field_name("trait")
            .and_then(|t| type_name(t, src))
            .map(|t| vec![(RelationshipKind::Implements, t)])
            .unwrap_or_default();
        Some(Item::Container {
            owner,
            body,
            bases,
            line: line_of(node),
        })
    }

    fn use_paths(&self, node: Node<'_>, prefix: &str, src: &[u8], out: &mut Vec<String>) {
        let mut pending = vec![(node, prefix.to_string())];
        while let Some((node, prefix)) = pending.pop() {
            let join = |rest: &str| {
                if prefix.is_empty() {
                    rest.to_string()
                } else {
                    format!("{prefix}::{rest}")
                }
            };
            match node.kind() {
                "scoped_use_list" => {
                    let path = node
                        .child_by_field_name("path")
                        .map(|p| join(text(p, src)))
                        .unwrap_or_else(|| prefix.clone());
                    if let Some(list) = node.child_by_field_name("list") {
                        pending.push((list, path));
                    }
                }
                "use_list" => {
                    let mut cursor = node.walk();
                    let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                    pending.extend(children.into_iter().rev().map(|c| (c, prefix.clone())));
                }
                "use_as_clause" => {
                    if let Some(path) = node.child_by_field_name("path") {
                        out.push(join(text(path, src)));
                    }
                }
                "use_wildcard" => out.push(join(text(node, src))),
                "self" => out.push(prefix.clone()),
                _ => out.push(join(text(node, src))),
            }
        }
    }
}

fn has_visibility(node: Node<'_>) -> bool {
    let mut cursor = node.walk();
    let found = node
        .named_children(&mut cursor)
        .any(|c| c.kind() == "visibility_modifier");
    found
}

/// Base type name without generics, references, or path prefix.
fn type_name(mut node: Node<'_>, src: &[u8]) -> Option<String> {
    loop {
        node = match node.kind() {
            "type_identifier" | "identifier" => return Some(text(node, src).to_string()),
            "scoped_type_identifier" => return field_text(node, "name", src).map(str::to_string),
            "generic_type" | "reference_type" | "pointer_type" => node.child_by_field_name("type")?,
            _ => return None,
        };
    }
}

/// Outer attributes and `///` / `/** */` docs directly above an item.
fn leading_attributes(node: Node<'_>, src: &[u8]) -> (Vec<String>, Option<String>) {
    let extras = preceding(node, |n| match n.kind() {
        "attribute_item" => true,
        "line_comment" => is_outer_doc_line(text(n, src)),
        "block_comment" => text(n, src).starts_with("/**"),
        _ => false,
    });

    let mut annotations = Vec::new();
    let mut doc_lines: Vec<String> = Vec::new();
    for extra in extras {
        let raw = text(extra, src).trim();
        match extra.kind() {
            "attribute_item" if !raw.starts_with("#[doc") => annotations.push(raw.to_string()),
            "line_comment" => doc_lines.push(clean_line_comments([raw], "///")),
            "block_comment" => doc_lines.push(clean_block_comment(raw)),
            _ => {}
        }
    }
    (annotations, non_empty(doc_lines.join("\n").trim().to_string()))
}

fn is_outer_doc_line(raw: &str) -> bool {
    raw.starts_with("///") && !raw.starts_with("////")
}

impl Grammar for Rust {
    fn ts_language(&self) -> tree_sitter::Language {
        tree_sitter_rust::LANGUAGE.into()
    }

    fn declarations<'t>(&self, node: Node<'t>, src: &[u8], scope: &Scope) -> Vec<Item<'t>> {
        self.item(node, src, scope).into_iter().collect()
    }

    fn imports(&self, node: Node<'_>, src: &[u8]) -> Option<Vec<String>> {
        match node.kind() {
            "use_declaration" => {
                let argument = node.child_by_field_name("argument")?;
                let mut out = Vec::new();
                self.use_paths(argument, "", src, &mut out);
                Some(out)
            }
            "extern_crate_declaration" => {
                Some(field_text(node, "name", src).map(str::to_string).into_iter().collect())
            }
            _ => None,
        }
    }

    fn call<'t>(&self, node: Node<'t>, src: &[u8]) -> Option<(String, Node<'t>)> {
        if node.kind() != "call_expression" {
            return None;
        }
        let callee = node.child_by_field_name("function")?;
        Some((callee_name(callee, src), callee))
    }

    fn member_access(&self, node: Node<'_>, src: &[u8]) -> Option<String> {
        if node.kind() != "field_expression" {
            return None;
        }
        let field = node.child_by_field_name("field")?;
        // tuple indexing (`pair.0`) is not a named member
        if field.kind() == "integer_literal" {
            return None;
        }
        Some(text(field, src).to_string())
    }
}

fn callee_name(mut callee: Node<'_>, src: &[u8]) -> String {
    while callee.kind() == "generic_function" {
        match callee.child_by_field_name("function") {
            Some(function) => callee = function,
            None => return String::new(),
        }
    }
    match callee.kind() {
        "identifier" => text(callee, src).to_string(),
        "field_expression" => field_text(callee, "field", src).unwrap_or("").to_string(),
        "scoped_identifier" => field_text(callee, "name", src).unwrap_or("").to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::{parse, RelationshipKind, SymbolKind};

    #[test]
    fn simple_function_with_doc() {
        let src = br#"
/// Says hello.
#[inline]
pub fn hello_world(name: &str) -> String {
    format!("Hello, {}!", name)
}
"#;
        let result = parse(src, "src/lib.rs").unwrap();
        assert_eq!(result.symbols.len(), 1);
        let f = &result.symbols[0];
        assert_eq!(f.kind, SymbolKind::Function);
        assert_eq!(f.name, "hello_world");
        assert!(f.exported);
        assert_eq!(f.doc_comment.as_deref(), Some("Says hello."));
        assert_eq!(f.annotations, ["#[inline]"]);
        assert_eq!(f.signature, "pub fn hello_world(name: &str) -> String");
    }

    #[test]
    fn impl_methods_attach_to_struct() {
        let src = br#"
impl Display for User {
    fn fmt(&self, f: &mut Formatter) -> Result {
        self.render(f)
    }
}

pub struct User {
    name: String,
}

impl User {
    pub fn new(name: String) -> Self {
        Self { name }
    }

    fn render(&self, f: &mut Formatter) -> Result {
        write_name(f, &self.name)
    }
}
"#;
        let result = parse(src, "src/user.rs").unwrap();
        let user = result.find("User").unwrap();
        assert_eq!(user.kind, SymbolKind::Class);
        assert_eq!(user.children.len(), 3);

        let fmt = result.find("fmt").unwrap();
        assert_eq!(fmt.kind, SymbolKind::Method);
        assert_eq!(fmt.qualified_name, "User.fmt");
        assert_eq!(fmt.parent_id.as_deref(), Some(user.id.as_str()));

        let implements = result
            .relationships
            .iter()
            .find(|r| r.kind == RelationshipKind::Implements)
            .unwrap();
        assert_eq!(implements.to_name, "Display");
        assert_eq!(implements.from_id.as_deref(), Some(user.id.as_str()));

        // self.name is a plain member access
        assert!(result
            .relationships
            .iter()
            .any(|r| r.kind == RelationshipKind::References && r.to_name == "name"));
        // method call on a receiver uses the member name and binds in-file
        let render_call = result
            .relationships
            .iter()
            .find(|r| r.kind == RelationshipKind::Calls && r.to_name == "render")
            .unwrap();
        assert_eq!(
            render_call.to_id.as_deref(),
            Some(result.find("render").unwrap().id.as_str())
        );
    }

    #[test]
    fn impl_for_enum_stays_top_level() {
        let src = b"enum Color { Red }\nimpl Color {\n    fn name(&self) -> &str { \"red\" }\n}\n";
        let result = parse(src, "c.rs").unwrap();
        let name = result.find("name").unwrap();
        assert!(name.parent_id.is_none());
        assert_eq!(name.qualified_name, "Color.name");
        assert!(result.find("Color").unwrap().children.is_empty());
    }

    #[test]
    fn use_lists_expand() {
        let src = b"use std::collections::{HashMap, HashSet};\nuse crate::db::Database as Db;\n";
        let result = parse(src, "src/m.rs").unwrap();
        let targets: Vec<&str> = result.relationships.iter().map(|r| r.to_name.as_str()).collect();
        assert_eq!(
            targets,
            ["std::collections::HashMap", "std::collections::HashSet", "crate::db::Database"]
        );
    }

    #[test]
    fn trait_and_module_nesting() {
        let src = br#"
pub mod shapes {
    pub trait Shape: Debug {
        fn area(&self) -> f64;
    }
    const SIDES: u32 = 4;
}
"#;
        let result = parse(src, "src/shapes.rs").unwrap();
        let module = result.find("shapes").unwrap();
        assert_eq!(module.kind, SymbolKind::Namespace);
        assert_eq!(module.children.len(), 2);
        let shape = result.find("Shape").unwrap();
        assert_eq!(shape.kind, SymbolKind::Interface);
        assert_eq!(shape.qualified_name, "shapes.Shape");
        let area = result.find("area").unwrap();
        assert_eq!(area.kind, SymbolKind::Method);
        assert_eq!(area.qualified_name, "shapes.Shape.area");
        assert!(result
            .relationships
            .iter()
            .any(|r| r.kind == RelationshipKind::Inherits && r.to_name == "Debug"));
        assert_eq!(result.find("SIDES").unwrap().kind, SymbolKind::Variable);
    }
}
