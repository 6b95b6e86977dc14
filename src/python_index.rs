use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::path::Path;
use tree_sitter::{Node, Parser};

/// Derives the dotted module name from a repo-relative POSIX path: strips the
/// `.py` suffix; `__init__.py` maps to its parent package's dotted name.
pub fn module_name_from_rel(rel_path: &str) -> String {
    let stripped = rel_path.strip_suffix(".py").unwrap_or(rel_path);
    let parts: Vec<&str> = stripped.split('/').filter(|s| !s.is_empty()).collect();
    if parts.last() == Some(&"__init__") {
        parts[..parts.len() - 1].join(".")
    } else {
        parts.join(".")
    }
}

pub struct IndexOutput {
    pub module_record: Value,
    pub import_edges: Vec<Value>,
    pub ast_extras: Vec<Value>,
}

/// Parses a single Python file and emits its `python.module` record, its
/// `graph.edge` import edges, and (when `emit_ast`) fine-grained `ast.*`
/// records.
pub fn index_file(path: &Path, rel_path: &str, emit_ast: bool) -> Result<IndexOutput> {
    let module = module_name_from_rel(rel_path);
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading python source {}", path.display()))?;

    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::language())
        .context("setting tree-sitter python language")?;

    let Some(tree) = parser.parse(&source, None) else {
        return Ok(IndexOutput {
            module_record: json!({
                "kind": "python.module",
                "path": rel_path,
                "module": module,
                "error": {
                    "kind": "ParseFailure",
                    "message": "tree-sitter returned no parse tree",
                    "lineno": 0,
                    "offset": 0,
                },
            }),
            import_edges: vec![],
            ast_extras: vec![],
        });
    };

    let root = tree.root_node();
    if let Some(err_node) = first_error_node(root) {
        let pos = err_node.start_position();
        return Ok(IndexOutput {
            module_record: json!({
                "kind": "python.module",
                "path": rel_path,
                "module": module,
                "error": {
                    "kind": "SyntaxError",
                    "message": "syntax error near byte offset",
                    "lineno": pos.row + 1,
                    "offset": pos.column,
                },
            }),
            import_edges: vec![],
            ast_extras: vec![],
        });
    }

    let mut walker = Walker {
        src: source.as_bytes(),
        rel_path: rel_path.to_string(),
        emit_ast,
        scope_stack: vec![],
        classes: vec![],
        functions: vec![],
        imports: vec![],
        edges: vec![],
        extras: vec![],
    };
    walker.visit(root, None);

    Ok(IndexOutput {
        module_record: json!({
            "kind": "python.module",
            "path": rel_path,
            "module": module,
            "symbols": {
                "classes": walker.classes,
                "functions": walker.functions,
            },
            "imports": walker.imports,
        }),
        import_edges: walker.edges,
        ast_extras: walker.extras,
    })
}

fn first_error_node(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error_node(child) {
            return Some(found);
        }
    }
    None
}

struct Scope {
    kind: &'static str,
    name: String,
}

struct Walker<'a> {
    src: &'a [u8],
    rel_path: String,
    emit_ast: bool,
    scope_stack: Vec<Scope>,
    classes: Vec<String>,
    functions: Vec<String>,
    imports: Vec<String>,
    edges: Vec<Value>,
    extras: Vec<Value>,
}

impl<'a> Walker<'a> {
    fn text(&self, node: Node) -> &'a str {
        node.utf8_text(self.src).unwrap_or("")
    }

    fn qualify(&self, name: &str) -> String {
        if self.scope_stack.is_empty() {
            name.to_string()
        } else {
            let prefix: Vec<&str> = self.scope_stack.iter().map(|s| s.name.as_str()).collect();
            format!("{}.{}", prefix.join("."), name)
        }
    }

    fn visit(&mut self, node: Node, doc_owner: Option<(&str, &str)>) {
        let _ = doc_owner;
        match node.kind() {
            "class_definition" => self.visit_class(node),
            "function_definition" => self.visit_function(node),
            "decorated_definition" => self.visit_decorated(node),
            "import_statement" => self.visit_import(node),
            "import_from_statement" => self.visit_import_from(node),
            "call" => self.visit_call(node),
            _ => self.recurse(node),
        }
    }

    fn recurse(&mut self, node: Node) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child, None);
        }
    }

    fn decorator_names(&self, node: Node) -> Vec<String> {
        let mut out = vec![];
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "decorator" {
                if let Some(expr) = child.child(1) {
                    out.push(self.text(expr).to_string());
                }
            }
        }
        out
    }

    fn visit_decorated(&mut self, node: Node) {
        let decorators = self.decorator_names(node);
        if let Some(def) = node.child_by_field_name("definition") {
            match def.kind() {
                "class_definition" => self.visit_class_with_decorators(def, decorators),
                "function_definition" => self.visit_function_with_decorators(def, decorators),
                _ => self.visit(def, None),
            }
        }
    }

    fn visit_class(&mut self, node: Node) {
        self.visit_class_with_decorators(node, vec![]);
    }

    fn visit_class_with_decorators(&mut self, node: Node, decorators: Vec<String>) {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_default();
        let qual = self.qualify(&name);
        self.classes.push(qual.clone());

        let bases = node
            .child_by_field_name("superclasses")
            .map(|n| self.text(n).trim_start_matches('(').trim_end_matches(')').to_string())
            .unwrap_or_default();

        if self.emit_ast {
            let pos = node.start_position();
            let end = node.end_position();
            self.extras.push(json!({
                "kind": "ast.symbol",
                "path": self.rel_path,
                "symbol_kind": "class",
                "name": qual,
                "lineno": pos.row + 1,
                "end_lineno": end.row + 1,
                "bases": bases,
                "decorators": decorators,
            }));
            self.emit_docstring(node, &qual, "class");
        }

        self.scope_stack.push(Scope { kind: "class", name });
        if let Some(body) = node.child_by_field_name("body") {
            self.recurse(body);
        }
        self.scope_stack.pop();
    }

    fn visit_function(&mut self, node: Node) {
        self.visit_function_with_decorators(node, vec![]);
    }

    fn visit_function_with_decorators(&mut self, node: Node, decorators: Vec<String>) {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_default();
        let qual = self.qualify(&name);

        let is_method = self.scope_stack.last().map(|s| s.kind == "class").unwrap_or(false);
        if !is_method {
            self.functions.push(qual.clone());
        }

        let is_async = node
            .prev_sibling()
            .map(|s| s.kind() == "async")
            .unwrap_or(false);

        let pos = node.start_position();
        let end = node.end_position();

        if self.emit_ast {
            self.extras.push(json!({
                "kind": "ast.symbol",
                "path": self.rel_path,
                "symbol_kind": if is_method { "method" } else { "function" },
                "name": qual,
                "lineno": pos.row + 1,
                "end_lineno": end.row + 1,
                "bases": Value::Null,
                "decorators": decorators,
            }));
            self.emit_docstring(node, &qual, if is_method { "method" } else { "function" });

            let arg_count = node
                .child_by_field_name("parameters")
                .map(|p| p.named_child_count())
                .unwrap_or(0);
            self.extras.push(json!({
                "kind": "ast.symbol_metrics",
                "path": self.rel_path,
                "name": qual,
                "loc": end.row + 1 - pos.row,
                "arg_count": arg_count,
                "is_async": is_async,
            }));
        }

        self.scope_stack.push(Scope { kind: "function", name: qual });
        if let Some(body) = node.child_by_field_name("body") {
            self.recurse(body);
        }
        self.scope_stack.pop();
    }

    fn emit_docstring(&mut self, def_node: Node, owner: &str, owner_kind: &str) {
        let Some(body) = def_node.child_by_field_name("body") else {
            return;
        };
        let Some(first_stmt) = body.named_child(0) else {
            return;
        };
        if first_stmt.kind() != "expression_statement" {
            return;
        }
        let Some(expr) = first_stmt.named_child(0) else {
            return;
        };
        if expr.kind() != "string" {
            return;
        }
        let text = self.text(expr);
        self.extras.push(json!({
            "kind": "ast.docstring",
            "path": self.rel_path,
            "owner": owner,
            "owner_kind": owner_kind,
            "doc": text.trim_matches(|c| c == '"' || c == '\''),
        }));
    }

    fn visit_import(&mut self, node: Node) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "dotted_name" => {
                    let name = self.text(child).to_string();
                    self.record_import(&name, None, false);
                }
                "aliased_import" => {
                    if let Some(name_node) = child.child(0) {
                        let name = self.text(name_node).to_string();
                        let asname = child
                            .child_by_field_name("alias")
                            .map(|n| self.text(n).to_string());
                        self.record_import(&name, asname.as_deref(), false);
                    }
                }
                _ => {}
            }
        }
    }

    fn visit_import_from(&mut self, node: Node) {
        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        let base_module = self.text(module_node).to_string();

        let mut names: Vec<(String, Option<String>)> = vec![];
        let mut star = false;
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "wildcard_import" => star = true,
                "dotted_name" if child != module_node => {
                    names.push((self.text(child).to_string(), None));
                }
                "aliased_import" => {
                    if let Some(name_node) = child.child(0) {
                        let asname = child
                            .child_by_field_name("alias")
                            .map(|n| self.text(n).to_string());
                        names.push((self.text(name_node).to_string(), asname));
                    }
                }
                _ => {}
            }
        }

        if star {
            self.imports.push(format!("from {base_module} import *"));
            self.edges.push(json!({
                "kind": "graph.edge",
                "edge_type": "import",
                "src_path": self.rel_path,
                "dst_module": base_module,
            }));
            if self.emit_ast {
                self.extras.push(json!({
                    "kind": "ast.xref",
                    "path": self.rel_path,
                    "xref_kind": "import_from",
                    "module": base_module,
                    "name": "*",
                    "asname": Value::Null,
                    "level": 0,
                }));
            }
            return;
        }

        for (name, asname) in names {
            let dst_module = format!("{base_module}.{name}");
            self.imports
                .push(format!("from {base_module} import {name}"));
            self.edges.push(json!({
                "kind": "graph.edge",
                "edge_type": "import",
                "src_path": self.rel_path,
                "dst_module": dst_module,
            }));
            if self.emit_ast {
                self.extras.push(json!({
                    "kind": "ast.xref",
                    "path": self.rel_path,
                    "xref_kind": "import_from",
                    "module": base_module,
                    "name": name,
                    "asname": asname,
                    "level": 0,
                }));
            }
        }
    }

    fn record_import(&mut self, name: &str, asname: Option<&str>, _from: bool) {
        self.imports.push(format!("import {name}"));
        self.edges.push(json!({
            "kind": "graph.edge",
            "edge_type": "import",
            "src_path": self.rel_path,
            "dst_module": name,
        }));
        if self.emit_ast {
            self.extras.push(json!({
                "kind": "ast.xref",
                "path": self.rel_path,
                "xref_kind": "import",
                "module": name,
                "name": Value::Null,
                "asname": asname,
                "level": 0,
            }));
        }
    }

    fn visit_call(&mut self, node: Node) {
        if self.emit_ast {
            if let Some(func) = node.child_by_field_name("function") {
                let callee = self.text(func).to_string();
                let caller = self
                    .scope_stack
                    .last()
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| "<module>".to_string());
                self.extras.push(json!({
                    "kind": "ast.call",
                    "path": self.rel_path,
                    "caller_name": caller,
                    "callee": callee,
                }));
            }
        }
        self.recurse(node);
    }
}

pub fn first_or(result: Result<IndexOutput>) -> Result<IndexOutput> {
    result.map_err(|e| anyhow!(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn module_name_strips_init() {
        assert_eq!(module_name_from_rel("pkg/__init__.py"), "pkg");
        assert_eq!(module_name_from_rel("pkg/sub/mod.py"), "pkg.sub.mod");
        assert_eq!(module_name_from_rel("a.py"), "a");
    }

    #[test]
    fn indexes_imports_and_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        fs::write(&path, "import os\nfrom pkg.sub import f\n").unwrap();

        let out = index_file(&path, "m.py", false).unwrap();
        assert_eq!(out.import_edges.len(), 2);
        let dst_modules: Vec<_> = out
            .import_edges
            .iter()
            .map(|e| e["dst_module"].as_str().unwrap().to_string())
            .collect();
        println!("edges: {dst_modules:?}");
        assert_eq!(dst_modules, vec!["os", "pkg.sub.f"]);
    }

    #[test]
    fn indexes_classes_and_functions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        fs::write(
            &path,
            "class Foo:\n    def bar(self):\n        pass\n\ndef top():\n    pass\n",
        )
        .unwrap();

        let out = index_file(&path, "m.py", false).unwrap();
        let symbols = &out.module_record["symbols"];
        assert_eq!(symbols["classes"], json!(["Foo"]));
        assert_eq!(symbols["functions"], json!(["top"]));
    }

    #[test]
    fn syntax_error_yields_error_record_and_no_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.py");
        fs::write(&path, "def f(:\n").unwrap();

        let out = index_file(&path, "bad.py", false).unwrap();
        assert!(out.module_record.get("error").is_some());
        assert!(out.import_edges.is_empty());
    }
}
