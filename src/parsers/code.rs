use super::{EntityKind, EntityParser, ParseResult, ParsedEntity, extension};
use crate::error::ParseError;
use serde_json::json;
use std::path::Path;
use tree_sitter::{Language, Node, Parser};

/// Node kinds that play each structural role in one grammar
struct LanguageSpec {
    name: &'static str,
    extensions: &'static [&'static str],
    grammar: fn() -> Language,
    functions: &'static [&'static str],
    classes: &'static [&'static str],
    /// Callable kinds found inside a class body
    methods: &'static [&'static str],
    /// Blocks that attach methods to a type declared elsewhere (Rust `impl`)
    impls: &'static [&'static str],
    /// `(wrapper kind, field holding the real declaration)`
    wrappers: &'static [(&'static str, &'static str)],
    /// `(call kind, field holding the callee)`
    calls: &'static [(&'static str, &'static str)],
    imports: &'static [&'static str],
}

fn python() -> Language {
    tree_sitter_python::LANGUAGE.into()
}

fn rust() -> Language {
    tree_sitter_rust::LANGUAGE.into()
}

fn javascript() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}

fn typescript() -> Language {
    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
}

fn tsx() -> Language {
    tree_sitter_typescript::LANGUAGE_TSX.into()
}

fn go() -> Language {
    tree_sitter_go::LANGUAGE.into()
}

fn java() -> Language {
    tree_sitter_java::LANGUAGE.into()
}

const JS_FUNCTIONS: &[&str] = &["function_declaration", "generator_function_declaration"];
const JS_CALLS: &[(&str, &str)] = &[("call_expression", "function"), ("new_expression", "constructor")];
const TS_CLASSES: &[&str] = &[
    "class_declaration",
    "abstract_class_declaration",
    "interface_declaration",
];
const TS_METHODS: &[&str] = &[
    "method_definition",
    "method_signature",
    "abstract_method_signature",
];

static LANGUAGES: &[LanguageSpec] = &[
    LanguageSpec {
        name: "python",
        extensions: &["py", "pyi"],
        grammar: python,
        functions: &["function_definition"],
        classes: &["class_definition"],
        methods: &["function_definition"],
        impls: &[],
        wrappers: &[("decorated_definition", "definition")],
        calls: &[("call", "function")],
        imports: &["import_statement", "import_from_statement"],
    },
    LanguageSpec {
        name: "rust",
        extensions: &["rs"],
        grammar: rust,
        functions: &["function_item"],
        classes: &["struct_item", "enum_item", "trait_item", "union_item"],
        methods: &["function_item", "function_signature_item"],
        impls: &["impl_item"],
        wrappers: &[],
        calls: &[("call_expression", "function")],
        imports: &["use_declaration"],
    },
    LanguageSpec {
        name: "javascript",
        extensions: &["js", "mjs", "cjs", "jsx"],
        grammar: javascript,
        functions: JS_FUNCTIONS,
        classes: &["class_declaration"],
        methods: &["method_definition"],
        impls: &[],
        wrappers: &[("export_statement", "declaration")],
        calls: JS_CALLS,
        imports: &["import_statement"],
    },
    LanguageSpec {
        name: "typescript",
        extensions: &["ts", "mts", "cts"],
        grammar: typescript,
        functions: JS_FUNCTIONS,
        classes: TS_CLASSES,
        methods: TS_METHODS,
        impls: &[],
        wrappers: &[("export_statement", "declaration")],
        calls: JS_CALLS,
        imports: &["import_statement"],
    },
    LanguageSpec {
        name: "typescript",
        extensions: &["tsx"],
        grammar: tsx,
        functions: JS_FUNCTIONS,
        classes: TS_CLASSES,
        methods: TS_METHODS,
        impls: &[],
        wrappers: &[("export_statement", "declaration")],
        calls: JS_CALLS,
        imports: &["import_statement"],
    },
    LanguageSpec {
        name: "go",
        extensions: &["go"],
        grammar: go,
        functions: &["function_declaration"],
        classes: &["type_declaration"],
        methods: &[],
        impls: &[],
        wrappers: &[],
        calls: &[("call_expression", "function")],
        imports: &["import_spec"],
    },
    LanguageSpec {
        name: "java",
        extensions: &["java"],
        grammar: java,
        functions: &[],
        classes: &[
            "class_declaration",
            "interface_declaration",
            "enum_declaration",
            "record_declaration",
        ],
        methods: &["method_declaration", "constructor_declaration"],
        impls: &[],
        wrappers: &[],
        calls: &[("method_invocation", "name")],
        imports: &["import_declaration"],
    },
];

/// Tree-sitter based parser for source files.
///
/// Emits top-level functions and classes, plus methods with `parent` set to their
/// class. A file that does not parse cleanly yields no entities and one error.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodeParser;

impl CodeParser {
    pub fn new() -> Self {
        Self
    }

    fn spec_for(path: &Path) -> Option<&'static LanguageSpec> {
        let ext = extension(path)?;
        LANGUAGES
            .iter()
            .find(|spec| spec.extensions.contains(&ext.as_str()))
    }

    /// Language name for a path, if it is a supported source file
    pub fn language_of(path: &Path) -> Option<&'static str> {
        Self::spec_for(path).map(|spec| spec.name)
    }
}

impl EntityParser for CodeParser {
    fn name(&self) -> &'static str {
        "code"
    }

    fn can_parse(&self, path: &Path) -> bool {
        Self::spec_for(path).is_some()
    }

    fn parse(&self, content: &str, path: &str) -> ParseResult {
        match Self::spec_for(Path::new(path)) {
            Some(spec) => parse_with(spec, content, path),
            None => {
                let mut result = ParseResult::new(path, "unknown");
                result
                    .errors
                    .push(ParseError::Grammar(path.to_string()).to_string());
                result
            }
        }
    }
}

fn parse_with(spec: &'static LanguageSpec, content: &str, path: &str) -> ParseResult {
    let mut result = ParseResult::new(path, spec.name);

    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&(spec.grammar)()) {
        result
            .errors
            .push(ParseError::Grammar(format!("{}: {}", spec.name, e)).to_string());
        return result;
    }

    let Some(tree) = parser.parse(content, None) else {
        result.errors.push(
            ParseError::Syntax {
                line: 1,
                message: "parser produced no tree".to_string(),
            }
            .to_string(),
        );
        return result;
    };

    let root = tree.root_node();
    if root.has_error() {
        let (line, message) =
            first_error(root).unwrap_or((1, "invalid syntax".to_string()));
        result
            .errors
            .push(ParseError::Syntax { line, message }.to_string());
        return result;
    }

    let extractor = Extractor { spec, src: content };
    result.imports = extractor.imports(root);
    extractor.top_level(root, &mut result.entities);
    link_methods(&mut result.entities);
    result
}

/// Line and description of the first ERROR or MISSING node
fn first_error(node: Node) -> Option<(usize, String)> {
    if node.is_missing() {
        return Some((
            node.start_position().row + 1,
            format!("missing {}", node.kind()),
        ));
    }
    if node.is_error() {
        return Some((node.start_position().row + 1, "invalid syntax".to_string()));
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error()
            && let Some(found) = first_error(child)
        {
            return Some(found);
        }
    }
    None
}

/// Make sure every class lists the methods that name it as parent
fn link_methods(entities: &mut [ParsedEntity]) {
    let pairs: Vec<(String, String)> = entities
        .iter()
        .filter(|e| e.kind == EntityKind::Method)
        .filter_map(|e| e.parent.clone().map(|p| (p, e.name.clone())))
        .collect();

    for (parent, method) in pairs {
        if let Some(class) = entities
            .iter_mut()
            .find(|e| e.kind == EntityKind::Class && e.name == parent)
            && !class.children.contains(&method)
        {
            class.children.push(method);
        }
    }
}

struct Extractor<'a> {
    spec: &'static LanguageSpec,
    src: &'a str,
}

impl<'a> Extractor<'a> {
    fn text(&self, node: Node) -> &'a str {
        self.src.get(node.start_byte()..node.end_byte()).unwrap_or("")
    }

    fn is_lang(&self, name: &str) -> bool {
        self.spec.name == name
    }

    fn entity(&self, kind: EntityKind, name: String, span: Node) -> ParsedEntity {
        ParsedEntity::new(
            kind,
            name,
            self.text(span),
            span.start_position().row + 1,
            span.end_position().row + 1,
        )
    }

    /// Peel wrappers (decorators, `export`) and return `(outer, declaration)`
    fn unwrap<'t>(&self, node: Node<'t>) -> (Node<'t>, Node<'t>) {
        let mut inner = node;
        while let Some((_, field)) = self.spec.wrappers.iter().find(|(k, _)| *k == inner.kind()) {
            match inner.child_by_field_name(field) {
                Some(next) => inner = next,
                None => break,
            }
        }
        (node, inner)
    }

    fn top_level(&self, root: Node, out: &mut Vec<ParsedEntity>) {
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            let (outer, node) = self.unwrap(child);
            let kind = node.kind();

            if self.is_lang("go") && kind == "method_declaration" {
                out.extend(self.go_method(node));
            } else if self.is_lang("go") && kind == "type_declaration" {
                self.go_types(node, out);
            } else if self.spec.functions.contains(&kind) {
                out.extend(self.function(outer, node, None));
            } else if self.spec.classes.contains(&kind) {
                self.class(outer, node, out);
            } else if self.spec.impls.contains(&kind) {
                self.impl_block(node, out);
            } else if matches!(kind, "lexical_declaration" | "variable_declaration")
                && matches!(self.spec.name, "javascript" | "typescript")
            {
                self.bound_functions(outer, node, out);
            }
        }
    }

    fn function(&self, outer: Node, node: Node, parent: Option<&str>) -> Option<ParsedEntity> {
        let name = self.text(node.child_by_field_name("name")?).to_string();
        let kind = if parent.is_some() {
            EntityKind::Method
        } else {
            EntityKind::Function
        };

        let mut entity = self.entity(kind, name, outer);
        entity.signature = Some(self.signature(node, node.child_by_field_name("body")));
        entity.docstring = self.docstring(outer, node);
        entity.parent = parent.map(str::to_string);
        entity.calls = self.calls(node);
        Some(entity)
    }

    fn class(&self, outer: Node, node: Node, out: &mut Vec<ParsedEntity>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node).to_string();
        let body = node.child_by_field_name("body");

        let mut class = self.entity(EntityKind::Class, name.clone(), outer);
        class.signature = Some(self.signature(node, body));
        class.docstring = self.docstring(outer, node);
        let bases = self.bases(node);
        if !bases.is_empty() {
            class.metadata.insert("bases".to_string(), json!(bases));
        }

        let mut methods = Vec::new();
        if let Some(body) = body {
            self.methods_in(body, &name, &mut methods);
        }
        class.children = methods.iter().map(|m| m.name.clone()).collect();

        out.push(class);
        out.extend(methods);
    }

    fn methods_in(&self, body: Node, class_name: &str, out: &mut Vec<ParsedEntity>) {
        let mut cursor = body.walk();
        for child in body.named_children(&mut cursor) {
            let (outer, inner) = self.unwrap(child);
            let kind = inner.kind();
            if self.spec.methods.contains(&kind) {
                out.extend(self.function(outer, inner, Some(class_name)));
            } else if kind.ends_with("_declarations") {
                // Java enum bodies nest members one level deeper
                self.methods_in(inner, class_name, out);
            }
        }
    }

    fn impl_block(&self, node: Node, out: &mut Vec<ParsedEntity>) {
        let Some(ty) = node.child_by_field_name("type") else {
            return;
        };
        let type_name = type_name(self.text(ty));
        if let Some(body) = node.child_by_field_name("body") {
            self.methods_in(body, &type_name, out);
        }
    }

    fn go_method(&self, node: Node) -> Option<ParsedEntity> {
        let receiver = node
            .child_by_field_name("receiver")
            .and_then(|params| {
                let mut cursor = params.walk();
                let first = params.named_children(&mut cursor).next();
                first
            })
            .and_then(|param| param.child_by_field_name("type"))
            .map(|ty| type_name(self.text(ty)));
        self.function(node, node, receiver.as_deref())
    }

    fn go_types(&self, decl: Node, out: &mut Vec<ParsedEntity>) {
        let mut cursor = decl.walk();
        let specs: Vec<Node> = decl
            .named_children(&mut cursor)
            .filter(|n| matches!(n.kind(), "type_spec" | "type_alias"))
            .collect();
        let single = specs.len() == 1;

        for spec in specs {
            let Some(name_node) = spec.child_by_field_name("name") else {
                continue;
            };
            let span = if single { decl } else { spec };
            let mut class = self.entity(EntityKind::Class, self.text(name_node).to_string(), span);
            class.signature = Some(format!("type {}", self.signature(spec, None)));
            class.docstring = self.docstring(decl, spec);
            out.push(class);
        }
    }

    /// `const name = (..) => {..}` and friends
    fn bound_functions(&self, outer: Node, decl: Node, out: &mut Vec<ParsedEntity>) {
        let mut cursor = decl.walk();
        for declarator in decl.named_children(&mut cursor) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let (Some(name), Some(value)) = (
                declarator.child_by_field_name("name"),
                declarator.child_by_field_name("value"),
            ) else {
                continue;
            };
            if !matches!(
                value.kind(),
                "arrow_function" | "function_expression" | "function" | "generator_function"
            ) {
                continue;
            }

            let mut entity = self.entity(EntityKind::Function, self.text(name).to_string(), outer);
            let header = self.signature(declarator, value.child_by_field_name("body"));
            entity.signature = Some(header.trim_end_matches("=>").trim_end().to_string());
            entity.docstring = self.docstring(outer, decl);
            entity.calls = self.calls(value);
            out.push(entity);
        }
    }

    /// Declaration header: text from the node start to its body, whitespace collapsed
    fn signature(&self, node: Node, body: Option<Node>) -> String {
        let end = body.map(|b| b.start_byte()).unwrap_or(node.end_byte());
        let header = self.src.get(node.start_byte()..end).unwrap_or("");
        let header = match body {
            Some(_) => header,
            None => header.split('{').next().unwrap_or(header),
        };
        let collapsed = header.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed
            .trim_end_matches(|c: char| matches!(c, ':' | '{' | ';') || c.is_whitespace())
            .to_string()
    }

    fn docstring(&self, outer: Node, node: Node) -> Option<String> {
        if self.is_lang("python") {
            return self.python_docstring(node);
        }

        let mut lines = Vec::new();
        let mut next_row = outer.start_position().row;
        let mut current = outer.prev_sibling();
        while let Some(comment) = current {
            if !comment.kind().contains("comment") || comment.end_position().row + 1 < next_row {
                break;
            }
            lines.push(strip_comment(self.text(comment)));
            next_row = comment.start_position().row;
            current = comment.prev_sibling();
        }
        lines.reverse();

        let doc = lines.join("\n").trim().to_string();
        (!doc.is_empty()).then_some(doc)
    }

    fn python_docstring(&self, node: Node) -> Option<String> {
        let body = node.child_by_field_name("body")?;
        let mut cursor = body.walk();
        let first = body.named_children(&mut cursor).next()?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let mut cursor = first.walk();
        let literal = first.named_children(&mut cursor).next()?;
        if literal.kind() != "string" {
            return None;
        }
        let doc = unquote_python(self.text(literal));
        (!doc.is_empty()).then_some(doc)
    }

    fn bases(&self, node: Node) -> Vec<String> {
        let field = match self.spec.name {
            "python" => "superclasses",
            "java" => "superclass",
            _ => {
                let mut cursor = node.walk();
                let heritage = node
                    .children(&mut cursor)
                    .find(|c| c.kind() == "class_heritage");
                return heritage
                    .map(|h| {
                        self.text(h)
                            .trim_start_matches("extends")
                            .split(|c: char| c == '{' || c.is_whitespace())
                            .find(|s| !s.is_empty())
                            .map(|s| vec![s.to_string()])
                            .unwrap_or_default()
                    })
                    .unwrap_or_default();
            }
        };

        let Some(list) = node.child_by_field_name(field) else {
            return Vec::new();
        };
        let mut cursor = list.walk();
        list.named_children(&mut cursor)
            .map(|n| self.text(n).to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Callee names in source order, deduplicated
    fn calls(&self, node: Node) -> Vec<String> {
        let mut calls: Vec<String> = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if let Some((_, field)) = self.spec.calls.iter().find(|(k, _)| *k == current.kind())
                && let Some(callee) = current.child_by_field_name(field)
                && let Some(name) = last_identifier(self.text(callee))
                && !calls.contains(&name)
            {
                calls.push(name);
            }

            let mut cursor = current.walk();
            let children: Vec<Node> = current.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
        calls
    }

    fn imports(&self, root: Node) -> Vec<String> {
        let mut imports: Vec<String> = Vec::new();
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            if self.spec.imports.contains(&current.kind()) {
                for name in self.import_names(current) {
                    if !imports.contains(&name) {
                        imports.push(name);
                    }
                }
                continue;
            }
            let mut cursor = current.walk();
            let children: Vec<Node> = current.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
        imports
    }

    fn import_names(&self, node: Node) -> Vec<String> {
        let unquote = |s: &str| s.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string();

        match (self.spec.name, node.kind()) {
            ("python", "import_statement") => {
                let mut cursor = node.walk();
                node.children_by_field_name("name", &mut cursor)
                    .map(|n| self.python_import_target(n))
                    .collect()
            }
            ("python", "import_from_statement") => {
                let module = node
                    .child_by_field_name("module_name")
                    .map(|m| self.text(m))
                    .unwrap_or("");
                let mut cursor = node.walk();
                let mut names: Vec<String> = node
                    .children_by_field_name("name", &mut cursor)
                    .map(|n| format!("{}.{}", module, self.python_import_target(n)))
                    .collect();
                let mut cursor = node.walk();
                if node
                    .named_children(&mut cursor)
                    .any(|c| c.kind() == "wildcard_import")
                {
                    names.push(format!("{}.*", module));
                }
                names
            }
            ("rust", _) => node
                .child_by_field_name("argument")
                .map(|arg| vec![self.text(arg).split_whitespace().collect::<String>()])
                .unwrap_or_default(),
            ("go", _) => node
                .child_by_field_name("path")
                .map(|p| vec![unquote(self.text(p))])
                .unwrap_or_default(),
            ("java", _) => {
                let text = self
                    .text(node)
                    .trim_start_matches("import")
                    .trim_end_matches(';')
                    .trim();
                let text = text.strip_prefix("static").unwrap_or(text).trim();
                vec![text.split_whitespace().collect::<String>()]
            }
            _ => node
                .child_by_field_name("source")
                .map(|s| vec![unquote(self.text(s))])
                .unwrap_or_default(),
        }
    }

    fn python_import_target(&self, node: Node) -> String {
        if node.kind() == "aliased_import"
            && let Some(name) = node.child_by_field_name("name")
        {
            return self.text(name).to_string();
        }
        self.text(node).to_string()
    }
}

/// Bare type name: no pointer, reference, path or generic noise
fn type_name(text: &str) -> String {
    let trimmed = text.trim_start_matches(['*', '&']).trim();
    let base = trimmed.split('<').next().unwrap_or(trimmed);
    let base = base.split('[').next().unwrap_or(base);
    base.rsplit("::")
        .next()
        .unwrap_or(base)
        .rsplit('.')
        .next()
        .unwrap_or(base)
        .trim()
        .to_string()
}

/// Last identifier in a callee expression, ignoring generic arguments
fn last_identifier(text: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut cleaned = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => depth += 1,
            '>' if depth > 0 => depth -= 1,
            _ if depth == 0 => cleaned.push(c),
            _ => {}
        }
    }
    cleaned
        .rsplit(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn strip_comment(text: &str) -> String {
    text.lines()
        .map(|line| {
            let line = line.trim();
            let line = ["///", "//!", "//", "/**", "/*", "#"]
                .iter()
                .find_map(|p| line.strip_prefix(p))
                .unwrap_or(line);
            let line = line.strip_suffix("*/").unwrap_or(line);
            line.trim_start_matches('*').trim()
        })
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn unquote_python(literal: &str) -> String {
    let body = literal.trim_start_matches(|c: char| "rRbBuUfF".contains(c));
    let inner = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find(|q| body.len() >= 2 * q.len() && body.starts_with(**q) && body.ends_with(**q))
        .map(|q| &body[q.len()..body.len() - q.len()])
        .unwrap_or(body);
    inner
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests;
