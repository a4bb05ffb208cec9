use super::*;

fn parse(path: &str, src: &str) -> ParseResult {
    CodeParser::new().parse(src, path)
}

fn find<'r>(result: &'r ParseResult, name: &str) -> &'r ParsedEntity {
    result
        .entities
        .iter()
        .find(|e| e.name == name)
        .unwrap_or_else(|| panic!("no entity named {name}: {:?}", result.entities))
}

const PYTHON_SRC: &str = r#"import os
from typing import List, Optional as Opt

def f(x: int) -> int:
    """Add one."""
    return helper(x) + os.path.join("a")

class Greeter(Base):
    """Says hello."""

    def greet(self, name):
        print(name)

    async def wait(self):
        await self.sleep()
"#;

#[test]
fn test_python_entities_and_order() {
    let result = parse("pkg/a.py", PYTHON_SRC);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.language, "python");

    let names: Vec<&str> = result.entities.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["f", "Greeter", "greet", "wait"]);
}

#[test]
fn test_python_function_details() {
    let result = parse("a.py", PYTHON_SRC);
    let f = find(&result, "f");
    assert_eq!(f.kind, EntityKind::Function);
    assert_eq!(f.signature.as_deref(), Some("def f(x: int) -> int"));
    assert_eq!(f.docstring.as_deref(), Some("Add one."));
    assert_eq!(f.line_start, 4);
    assert!(f.line_end >= 6);
    assert!(f.calls.contains(&"helper".to_string()));
    assert!(f.calls.contains(&"join".to_string()));
    assert!(f.content.starts_with("def f"));
}

#[test]
fn test_python_class_and_methods() {
    let result = parse("a.py", PYTHON_SRC);
    let class = find(&result, "Greeter");
    assert_eq!(class.kind, EntityKind::Class);
    assert_eq!(class.signature.as_deref(), Some("class Greeter(Base)"));
    assert_eq!(class.docstring.as_deref(), Some("Says hello."));
    assert_eq!(class.children, vec!["greet", "wait"]);
    assert_eq!(class.metadata["bases"], serde_json::json!(["Base"]));

    let greet = find(&result, "greet");
    assert_eq!(greet.kind, EntityKind::Method);
    assert_eq!(greet.parent.as_deref(), Some("Greeter"));
    assert_eq!(greet.calls, vec!["print"]);

    let wait = find(&result, "wait");
    assert!(wait.signature.as_deref().unwrap().starts_with("async def wait"));
    assert_eq!(wait.calls, vec!["sleep"]);
}

#[test]
fn test_python_imports() {
    let result = parse("a.py", PYTHON_SRC);
    assert_eq!(
        result.imports,
        vec!["os", "typing.List", "typing.Optional"]
    );
}

#[test]
fn test_python_syntax_error_yields_no_entities() {
    let result = parse("broken.py", "def ok():\n    pass\n\ndef broken(:\n    pass\n");
    assert!(result.entities.is_empty());
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("Syntax error at line"));
}

#[test]
fn test_garbage_never_panics() {
    for src in ["\u{0}\u{1}{{{{", "class", ")))(((", "fn (", ""] {
        for path in ["x.py", "x.rs", "x.js", "x.ts", "x.go", "x.java"] {
            let result = parse(path, src);
            if !result.errors.is_empty() {
                assert!(result.entities.is_empty());
            }
        }
    }
}

#[test]
fn test_rust_struct_impl_and_function() {
    let src = r#"use std::collections::HashMap;

/// A point.
pub struct Point {
    x: f64,
}

impl Point {
    pub fn norm(&self) -> f64 {
        self.x.abs()
    }
}

fn main() {
    let p = Point { x: 1.0 };
    helper::run(p.norm());
}
"#;
    let result = parse("src/main.rs", src);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.imports, vec!["std::collections::HashMap"]);

    let point = find(&result, "Point");
    assert_eq!(point.kind, EntityKind::Class);
    assert_eq!(point.docstring.as_deref(), Some("A point."));
    assert_eq!(point.children, vec!["norm"]);
    assert_eq!(point.signature.as_deref(), Some("pub struct Point"));

    let norm = find(&result, "norm");
    assert_eq!(norm.kind, EntityKind::Method);
    assert_eq!(norm.parent.as_deref(), Some("Point"));
    assert_eq!(norm.signature.as_deref(), Some("pub fn norm(&self) -> f64"));

    let main = find(&result, "main");
    assert_eq!(main.kind, EntityKind::Function);
    assert!(main.calls.contains(&"run".to_string()));
    assert!(main.calls.contains(&"norm".to_string()));
}

#[test]
fn test_go_method_receiver_becomes_parent() {
    let src = r#"package main

import "fmt"

type Server struct {
	port int
}

// Start runs the server.
func (s *Server) Start() error {
	fmt.Println("start")
	return nil
}
"#;
    let result = parse("main.go", src);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.imports, vec!["fmt"]);

    let server = find(&result, "Server");
    assert_eq!(server.signature.as_deref(), Some("type Server struct"));
    assert_eq!(server.children, vec!["Start"]);

    let start = find(&result, "Start");
    assert_eq!(start.kind, EntityKind::Method);
    assert_eq!(start.parent.as_deref(), Some("Server"));
    assert_eq!(start.docstring.as_deref(), Some("Start runs the server."));
    assert_eq!(start.calls, vec!["Println"]);
}

#[test]
fn test_javascript_class_and_arrow_function() {
    let src = r#"import { readFile } from "fs";

export class Store extends Base {
  load(path) {
    return readFile(path);
  }
}

const handler = async (req) => {
  return new Response(req.body);
};
"#;
    let result = parse("web/store.js", src);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.imports, vec!["fs"]);

    let store = find(&result, "Store");
    assert_eq!(store.children, vec!["load"]);
    assert_eq!(store.metadata["bases"], serde_json::json!(["Base"]));
    assert_eq!(find(&result, "load").calls, vec!["readFile"]);

    let handler = find(&result, "handler");
    assert_eq!(handler.kind, EntityKind::Function);
    assert_eq!(handler.signature.as_deref(), Some("handler = async (req)"));
    assert!(handler.calls.contains(&"Response".to_string()));
}

#[test]
fn test_java_class_with_javadoc() {
    let src = r#"import java.util.List;

/** Repository of users. */
public class UserRepo extends Base {
    public UserRepo() {
        init();
    }

    public List<String> names() {
        return store.fetch();
    }
}
"#;
    let result = parse("UserRepo.java", src);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.imports, vec!["java.util.List"]);

    let repo = find(&result, "UserRepo");
    assert_eq!(repo.kind, EntityKind::Class);
    assert_eq!(repo.docstring.as_deref(), Some("Repository of users."));

    let names = result
        .entities
        .iter()
        .find(|e| e.name == "names")
        .unwrap();
    assert_eq!(names.parent.as_deref(), Some("UserRepo"));
    assert_eq!(names.calls, vec!["fetch"]);
}

#[test]
fn test_can_parse_by_extension() {
    let parser = CodeParser::new();
    assert!(parser.can_parse(Path::new("a.py")));
    assert!(parser.can_parse(Path::new("stubs/a.pyi")));
    assert!(parser.can_parse(Path::new("src/lib.rs")));
    assert!(parser.can_parse(Path::new("App.TSX")));
    assert!(!parser.can_parse(Path::new("README.md")));
    assert!(!parser.can_parse(Path::new("Makefile")));
    assert_eq!(CodeParser::language_of(Path::new("x.tsx")), Some("typescript"));
}

#[test]
fn test_unsupported_path_reports_error() {
    let result = parse("notes.txt", "hello");
    assert!(result.entities.is_empty());
    assert!(result.has_errors());
}

#[test]
fn test_last_identifier() {
    assert_eq!(last_identifier("self.client.get").as_deref(), Some("get"));
    assert_eq!(last_identifier("Vec::<u8>::new").as_deref(), Some("new"));
    assert_eq!(last_identifier("fmt.Println").as_deref(), Some("Println"));
    assert_eq!(last_identifier("()"), None);
}

#[test]
fn test_unquote_python() {
    assert_eq!(unquote_python("\"\"\"Doc\n    more\"\"\""), "Doc\nmore");
    assert_eq!(unquote_python("r'raw'"), "raw");
}
