//! Pure collection pass over one parsed compilation unit.
//!
//! The traversal mutates no tables: it produces a flat list of raw records
//! (declarations, direct references, and deferred simple names that can only
//! be classified once every declaration is known). The linking pass in the
//! parent module turns those records into the symbol tables.

use super::symbol::{SymbolClass, SymbolKey, TypeEnv};
use tree_sitter::{Node, Tree};

/// Source span of a record: byte offset + 1-based line, 0-based column.
#[derive(Debug, Clone, Copy)]
pub struct Span {
    pub position: usize,
    pub length: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    fn of(node: Node<'_>) -> Self {
        let start = node.start_position();
        Self {
            position: node.start_byte(),
            length: node.end_byte() - node.start_byte(),
            line: start.row + 1,
            column: start.column,
        }
    }
}

/// Lexical position of a deferred name, captured at visit time.
#[derive(Debug, Clone)]
pub struct NameContext {
    /// Enclosing class signature, `LTest;` form.
    pub class: String,
    /// Enclosing method name and JNI signature, `None` at class level.
    pub method: Option<(String, String)>,
}

#[derive(Debug, Clone)]
pub enum RawSymbol {
    Declaration {
        class: SymbolClass,
        name: String,
        key: SymbolKey,
        span: Span,
    },
    Reference {
        class: SymbolClass,
        name: String,
        key: SymbolKey,
        span: Span,
    },
    /// A simple name whose binding is classified during linking.
    DeferredName {
        name: String,
        context: NameContext,
        span: Span,
    },
    /// A method invocation, linked to a method declaration by name.
    DeferredCall {
        name: String,
        context: NameContext,
        span: Span,
    },
}

/// Package name and declared classes of one unit, for the type environment
/// pre-pass. Nested classes are reported as `Outer$Inner`.
pub fn scan_types(tree: &Tree, source: &str) -> (Option<String>, Vec<(String, String)>) {
    let mut package = None;
    let mut classes = Vec::new();
    scan_types_rec(tree.root_node(), source, &mut package, &mut Vec::new(), &mut classes);
    (package, classes)
}

fn scan_types_rec(
    node: Node<'_>,
    source: &str,
    package: &mut Option<String>,
    stack: &mut Vec<String>,
    out: &mut Vec<(String, String)>,
) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "package_declaration" => {
                *package = package_name(child, source);
            }
            "class_declaration" | "interface_declaration" | "enum_declaration" => {
                if let Some(name) = text_of_field(child, "name", source) {
                    stack.push(name.to_string());
                    let nested = stack.join("$");
                    let binary = match package {
                        Some(pkg) => format!("{}/{nested}", pkg.replace('.', "/")),
                        None => nested,
                    };
                    out.push((name.to_string(), binary));
                    scan_types_rec(child, source, package, stack, out);
                    stack.pop();
                }
            }
            _ => scan_types_rec(child, source, package, stack, out),
        }
    }
}

/// Collect every raw record of one unit.
pub fn collect(tree: &Tree, source: &str, env: &TypeEnv) -> Vec<RawSymbol> {
    let mut collector = Collector {
        source,
        env,
        package: None,
        classes: Vec::new(),
        method: None,
        records: Vec::new(),
    };
    collector.walk(tree.root_node());
    collector.records
}

struct Collector<'a> {
    source: &'a str,
    env: &'a TypeEnv,
    package: Option<String>,
    classes: Vec<String>,
    method: Option<(String, String)>,
    records: Vec<RawSymbol>,
}

impl<'a> Collector<'a> {
    fn text(&self, node: Node<'_>) -> &'a str {
        node.utf8_text(self.source.as_bytes()).unwrap_or_default()
    }

    fn class_signature(&self) -> String {
        let nested = self.classes.join("$");
        match &self.package {
            Some(pkg) => format!("L{}/{nested};", pkg.replace('.', "/")),
            None => format!("L{nested};"),
        }
    }

    fn context(&self) -> NameContext {
        NameContext {
            class: self.class_signature(),
            method: self.method.clone(),
        }
    }

    fn walk(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        drop(cursor);

        for child in children {
            match child.kind() {
                "package_declaration" => self.visit_package(child),
                "class_declaration" | "interface_declaration" | "enum_declaration" => {
                    self.visit_type(child)
                }
                "field_declaration" => self.visit_field(child),
                "method_declaration" => self.visit_method(child, false),
                "constructor_declaration" => self.visit_method(child, true),
                "local_variable_declaration" => self.visit_local(child),
                "method_invocation" => self.visit_invocation(child),
                "identifier" => self.visit_identifier(child),
                _ => self.walk(child),
            }
        }
    }

    fn visit_package(&mut self, node: Node<'_>) {
        let Some(name) = package_name(node, self.source) else {
            return;
        };
        self.records.push(RawSymbol::Declaration {
            class: SymbolClass::Package,
            name: name.clone(),
            key: SymbolKey::Package { name: name.clone() },
            span: Span::of(node),
        });
        self.package = Some(name);
    }

    fn visit_type(&mut self, node: Node<'_>) {
        let Some(name) = text_of_field(node, "name", self.source) else {
            return;
        };
        self.classes.push(name.to_string());
        self.records.push(RawSymbol::Declaration {
            class: SymbolClass::Type,
            name: name.to_string(),
            key: SymbolKey::Type {
                class: self.class_signature(),
            },
            span: Span::of(node),
        });
        if let Some(body) = node.child_by_field_name("body") {
            self.walk(body);
        }
        self.classes.pop();
    }

    fn visit_field(&mut self, node: Node<'_>) {
        let type_text = text_of_field(node, "type", self.source).unwrap_or_default();
        let descriptor = self.env.descriptor(type_text);
        let class = self.class_signature();

        let mut cursor = node.walk();
        let declarators: Vec<Node<'_>> = node
            .children_by_field_name("declarator", &mut cursor)
            .collect();
        drop(cursor);

        for declarator in &declarators {
            let Some(name) = text_of_field(*declarator, "name", self.source) else {
                continue;
            };
            self.records.push(RawSymbol::Declaration {
                class: SymbolClass::Member,
                name: name.to_string(),
                key: SymbolKey::Member {
                    class: class.clone(),
                    name: name.to_string(),
                    signature: descriptor.clone(),
                },
                // the whole field declaration is the declaration span
                span: Span::of(node),
            });
        }
        for declarator in declarators {
            self.walk(declarator);
        }
    }

    fn visit_method(&mut self, node: Node<'_>, constructor: bool) {
        let name = if constructor {
            "<init>".to_string()
        } else {
            match text_of_field(node, "name", self.source) {
                Some(name) => name.to_string(),
                None => return,
            }
        };
        let return_type = if constructor {
            "void"
        } else {
            text_of_field(node, "type", self.source).unwrap_or("void")
        };

        let params = parameters(node, self.source);
        let param_types: Vec<String> = params.iter().map(|p| p.type_text.clone()).collect();
        let signature = self.env.method_signature(&param_types, return_type);
        let class = self.class_signature();

        self.records.push(RawSymbol::Declaration {
            class: SymbolClass::Method,
            name: name.clone(),
            key: SymbolKey::Method {
                class: class.clone(),
                name: name.clone(),
                signature: signature.clone(),
            },
            span: Span::of(node),
        });

        self.method = Some((name.clone(), signature.clone()));
        for param in &params {
            self.records.push(RawSymbol::Declaration {
                class: SymbolClass::Local,
                name: param.name.clone(),
                key: SymbolKey::Local {
                    class: class.clone(),
                    method: name.clone(),
                    method_signature: signature.clone(),
                    name: param.name.clone(),
                },
                span: param.span,
            });
        }

        if let Some(parameters) = node.child_by_field_name("parameters") {
            self.walk(parameters);
        }
        if let Some(body) = node.child_by_field_name("body") {
            self.walk(body);
        }
        self.method = None;
    }

    fn visit_local(&mut self, node: Node<'_>) {
        let type_text = text_of_field(node, "type", self.source).unwrap_or_default();
        let descriptor = self.env.descriptor(type_text);

        // the declared type is a type reference spanning the whole statement
        self.records.push(RawSymbol::Reference {
            class: SymbolClass::Type,
            name: type_text.to_string(),
            key: SymbolKey::Type {
                class: descriptor.clone(),
            },
            span: Span::of(node),
        });

        let Some((method, method_signature)) = self.method.clone() else {
            // initializer blocks are not tracked
            self.walk_children_generic(node);
            return;
        };
        let class = self.class_signature();

        let mut cursor = node.walk();
        let declarators: Vec<Node<'_>> = node
            .children_by_field_name("declarator", &mut cursor)
            .collect();
        drop(cursor);

        for declarator in &declarators {
            let Some(name) = text_of_field(*declarator, "name", self.source) else {
                continue;
            };
            self.records.push(RawSymbol::Declaration {
                class: SymbolClass::Local,
                name: name.to_string(),
                key: SymbolKey::Local {
                    class: class.clone(),
                    method: method.clone(),
                    method_signature: method_signature.clone(),
                    name: name.to_string(),
                },
                span: Span::of(*declarator),
            });
        }
        for declarator in declarators {
            self.walk(declarator);
        }
    }

    fn visit_invocation(&mut self, node: Node<'_>) {
        if let Some(name) = text_of_field(node, "name", self.source) {
            self.records.push(RawSymbol::DeferredCall {
                name: name.to_string(),
                context: self.context(),
                span: Span::of(node),
            });
        }
        if let Some(object) = node.child_by_field_name("object") {
            self.walk_node(object);
        }
        if let Some(arguments) = node.child_by_field_name("arguments") {
            self.walk(arguments);
        }
    }

    fn visit_identifier(&mut self, node: Node<'_>) {
        // declaration and invocation *names* resolve to bindings the linker
        // never classifies as variables, skip them outright
        if let Some(parent) = node.parent() {
            let is_name_field = parent
                .child_by_field_name("name")
                .is_some_and(|name| name == node);
            if is_name_field
                && matches!(
                    parent.kind(),
                    "method_declaration"
                        | "constructor_declaration"
                        | "class_declaration"
                        | "interface_declaration"
                        | "enum_declaration"
                        | "method_invocation"
                )
            {
                return;
            }
        }
        self.records.push(RawSymbol::DeferredName {
            name: self.text(node).to_string(),
            context: self.context(),
            span: Span::of(node),
        });
    }

    /// Walk a single node, dispatching as `walk` does for children.
    fn walk_node(&mut self, node: Node<'_>) {
        match node.kind() {
            "identifier" => self.visit_identifier(node),
            "method_invocation" => self.visit_invocation(node),
            _ => self.walk(node),
        }
    }

    fn walk_children_generic(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        drop(cursor);
        for child in children {
            self.walk_node(child);
        }
    }
}

struct Parameter {
    name: String,
    type_text: String,
    span: Span,
}

fn parameters(method: Node<'_>, source: &str) -> Vec<Parameter> {
    let Some(list) = method.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut cursor = list.walk();
    let mut params = Vec::new();
    for child in list.named_children(&mut cursor) {
        match child.kind() {
            "formal_parameter" => {
                let Some(name) = text_of_field(child, "name", source) else {
                    continue;
                };
                let type_text = text_of_field(child, "type", source).unwrap_or_default();
                params.push(Parameter {
                    name: name.to_string(),
                    type_text: type_text.to_string(),
                    span: Span::of(child),
                });
            }
            "spread_parameter" => {
                // varargs: `int... values` parses as type + "..." + declarator
                let mut inner = child.walk();
                let mut type_text = String::new();
                let mut name = None;
                let mut span = Span::of(child);
                for part in child.named_children(&mut inner) {
                    if part.kind() == "variable_declarator" {
                        name = text_of_field(part, "name", source).map(str::to_string);
                        span = Span::of(child);
                    } else if type_text.is_empty() {
                        type_text = part
                            .utf8_text(source.as_bytes())
                            .unwrap_or_default()
                            .to_string();
                    }
                }
                if let Some(name) = name {
                    params.push(Parameter {
                        name,
                        type_text: format!("{type_text}..."),
                        span,
                    });
                }
            }
            _ => {}
        }
    }
    params
}

fn text_of_field<'a>(node: Node<'_>, field: &str, source: &'a str) -> Option<&'a str> {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(source.as_bytes()).ok())
}

fn package_name(node: Node<'_>, source: &str) -> Option<String> {
    let mut cursor = node.walk();
    let name = node
        .named_children(&mut cursor)
        .find(|n| matches!(n.kind(), "scoped_identifier" | "identifier"))?;
    name.utf8_text(source.as_bytes()).ok().map(str::to_string)
}
