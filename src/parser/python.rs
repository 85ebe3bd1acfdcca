use tree_sitter::Node;

use super::types::{RelationshipKind, SymbolKind};
use super::walker::{field_text, non_empty, text, Decl, Grammar, Item, Scope};

pub(crate) struct Python;

impl Python {
    fn definition<'t>(&self, node: Node<'t>, src: &[u8], scope: &Scope) -> Option<Decl<'t>> {
        let kind = match node.kind() {
            "function_definition" if scope.in_type => SymbolKind::Method,
            "function_definition" => SymbolKind::Function,
            "class_definition" => SymbolKind::Class,
            _ => return None,
        };
        let name = field_text(node, "name", src)?;
        let mut decl = Decl::new(kind, name, node);
        decl.exported = !name.starts_with('_') || is_dunder(name);
        decl.body = node.child_by_field_name("body");
        decl.doc = decl.body.and_then(|body| docstring(body, src));

        if kind == SymbolKind::Class {
            if let Some(bases) = node.child_by_field_name("superclasses") {
                let mut cursor = bases.walk();
                for base in bases.named_children(&mut cursor) {
                    if matches!(base.kind(), "identifier" | "attribute") {
                        decl.bases.push((RelationshipKind::Inherits, text(base, src).to_string()));
                    }
                }
            }
        }
        Some(decl)
    }

    fn assignment<'t>(&self, node: Node<'t>, src: &[u8]) -> Option<Decl<'t>> {
        if node.kind() != "expression_statement" {
            return None;
        }
        let assign = node.named_child(0).filter(|n| n.kind() == "assignment")?;
        let left = assign.child_by_field_name("left")?;
        if left.kind() != "identifier" {
            return None;
        }
        let name = text(left, src);
        let mut decl = Decl::new(SymbolKind::Variable, name, assign);
        decl.span = node;
        decl.exported = !name.starts_with('_');
        decl.body = assign.child_by_field_name("right");
        Some(decl)
    }
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// First statement of a body when it is a bare string literal.
fn docstring(body: Node<'_>, src: &[u8]) -> Option<String> {
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0).filter(|n| n.kind() == "string")?;
    let raw = text(string, src);
    let stripped = raw
        .trim_start_matches(['r', 'R', 'u', 'U', 'b', 'B', 'f', 'F'])
        .trim_start_matches("\"\"\"")
        .trim_start_matches("'''")
        .trim_end_matches("\"\"\"")
        .trim_end_matches("'''")
        .trim_matches(['"', '\'']);
    let cleaned = stripped
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    non_empty(cleaned.trim().to_string())
}

impl Grammar for Python {
    fn ts_language(&self) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn declarations<'t>(&self, node: Node<'t>, src: &[u8], scope: &Scope) -> Vec<Item<'t>> {
        if node.kind() == "decorated_definition" {
            let Some(inner) = node.child_by_field_name("definition") else {
                return Vec::new();
            };
            let Some(mut decl) = self.definition(inner, src, scope) else {
                return Vec::new();
            };
            let mut cursor = node.walk();
            decl.annotations = node
                .named_children(&mut cursor)
                .filter(|n| n.kind() == "decorator")
                .map(|n| text(n, src).trim().to_string())
                .collect();
            decl.span = node;
            return vec![Item::Declaration(decl)];
        }

        self.definition(node, src, scope)
            .or_else(|| self.assignment(node, src))
            .map(Item::Declaration)
            .into_iter()
            .collect()
    }

    fn imports(&self, node: Node<'_>, src: &[u8]) -> Option<Vec<String>> {
        match node.kind() {
            "import_statement" => {
                let mut cursor = node.walk();
                let names = node
                    .children_by_field_name("name", &mut cursor)
                    .map(|n| match n.kind() {
                        "aliased_import" => field_text(n, "name", src).unwrap_or("").to_string(),
                        _ => text(n, src).to_string(),
                    })
                    .filter(|s| !s.is_empty())
                    .collect();
                Some(names)
            }
            "import_from_statement" => {
                let module = field_text(node, "module_name", src)?.to_string();
                let mut cursor = node.walk();
                let names: Vec<String> = node
                    .children_by_field_name("name", &mut cursor)
                    .map(|n| match n.kind() {
                        "aliased_import" => field_text(n, "name", src).unwrap_or("").to_string(),
                        _ => text(n, src).to_string(),
                    })
                    .filter(|s| !s.is_empty())
                    .map(|name| join_module(&module, &name))
                    .collect();
                if names.is_empty() {
                    Some(vec![module])
                } else {
                    Some(names)
                }
            }
            _ => None,
        }
    }

    fn call<'t>(&self, node: Node<'t>, src: &[u8]) -> Option<(String, Node<'t>)> {
        if node.kind() != "call" {
            return None;
        }
        let callee = node.child_by_field_name("function")?;
        let name = match callee.kind() {
            "identifier" => text(callee, src).to_string(),
            "attribute" => field_text(callee, "attribute", src).unwrap_or("").to_string(),
            _ => String::new(),
        };
        Some((name, callee))
    }

    fn member_access(&self, node: Node<'_>, src: &[u8]) -> Option<String> {
        if node.kind() != "attribute" {
            return None;
        }
        field_text(node, "attribute", src).map(str::to_string)
    }
}

fn join_module(module: &str, name: &str) -> String {
    if module.ends_with('.') {
        format!("{module}{name}")
    } else {
        format!("{module}.{name}")
    }
}
