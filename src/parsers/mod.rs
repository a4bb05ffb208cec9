//! Entity parsers: turn raw file content into structural entities.
//!
//! Parsers never fail. Malformed input is reported through [`ParseResult::errors`],
//! with whatever entities could be recovered.

mod code;
mod markdown;
mod metadata;

pub use code::CodeParser;
pub use markdown::MarkdownParser;
pub use metadata::{META_FILE_NAME, MetadataParser, MetadataRecord};

use crate::types::{Metadata, NodeType};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Kind of entity a parser can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Function,
    Method,
    Class,
    Section,
    Document,
    MetadataRecord,
}

impl EntityKind {
    /// Graph node type for this entity
    pub fn node_type(self) -> NodeType {
        match self {
            EntityKind::Function => NodeType::Function,
            EntityKind::Method => NodeType::Method,
            EntityKind::Class => NodeType::Class,
            EntityKind::Section => NodeType::Section,
            EntityKind::Document => NodeType::Document,
            EntityKind::MetadataRecord => NodeType::MetadataRecord,
        }
    }
}

/// An entity recovered from one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedEntity {
    pub kind: EntityKind,
    pub name: String,
    /// Full text span of the entity
    pub content: String,
    /// 1-based, inclusive
    pub line_start: usize,
    pub line_end: usize,
    pub docstring: Option<String>,
    pub signature: Option<String>,
    /// Enclosing class or heading
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub calls: Vec<String>,
    pub imports: Vec<String>,
    pub metadata: Metadata,
}

impl ParsedEntity {
    pub fn new(
        kind: EntityKind,
        name: impl Into<String>,
        content: impl Into<String>,
        line_start: usize,
        line_end: usize,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            content: content.into(),
            line_start,
            line_end,
            docstring: None,
            signature: None,
            parent: None,
            children: Vec::new(),
            calls: Vec::new(),
            imports: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    /// Name qualified by its parent, e.g. `Class.method`
    pub fn qualified_name(&self) -> String {
        match (&self.kind, &self.parent) {
            (EntityKind::Method, Some(parent)) => format!("{}.{}", parent, self.name),
            _ => self.name.clone(),
        }
    }
}

/// Output of parsing one file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub path: String,
    pub language: String,
    pub entities: Vec<ParsedEntity>,
    /// Module-level imports, best effort
    pub imports: Vec<String>,
    pub errors: Vec<String>,
}

impl ParseResult {
    pub fn new(path: &str, language: &str) -> Self {
        Self {
            path: path.to_string(),
            language: language.to_string(),
            ..Default::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A parser for one family of file formats
pub trait EntityParser: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Extension or file-name based check
    fn can_parse(&self, path: &Path) -> bool;

    /// Parse `content`; `path` is the repository-relative path used for naming
    fn parse(&self, content: &str, path: &str) -> ParseResult;
}

/// Parsers in priority order; the first one whose `can_parse` matches wins
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn EntityParser>>,
}

impl ParserRegistry {
    pub fn new(parsers: Vec<Arc<dyn EntityParser>>) -> Self {
        Self { parsers }
    }

    pub fn find(&self, path: &Path) -> Option<Arc<dyn EntityParser>> {
        self.parsers.iter().find(|p| p.can_parse(path)).cloned()
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new(vec![
            Arc::new(CodeParser::new()),
            Arc::new(MarkdownParser::new()),
            Arc::new(MetadataParser::new()),
        ])
    }
}

/// Last component of a `/`-separated path
pub(crate) fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Case-insensitive extension of `path`
pub(crate) fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
