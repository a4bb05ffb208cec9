use super::{EntityKind, EntityParser, ParseResult, ParsedEntity, extension, file_name};
use crate::error::ParseError;
use regex::Regex;
use serde_json::json;
use std::path::Path;
use std::sync::OnceLock;

static HEADING: OnceLock<Regex> = OnceLock::new();
static LINK: OnceLock<Regex> = OnceLock::new();

const HEADING_EXPRESSION: &str = r"^(#{1,6})\s+(.+)$";
const LINK_EXPRESSION: &str = r"\[([^\]]+)\]\(([^)]+)\)";

fn cached<'a>(lock: &'a OnceLock<Regex>, pattern: &str) -> &'a Regex {
    lock.get_or_init(|| Regex::new(pattern).expect("Invalid regex pattern"))
}

struct Heading {
    level: usize,
    title: String,
    /// 1-based
    line: usize,
}

/// Markdown parser: one `Section` per heading, or a single `Document` when there are none.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownParser;

impl MarkdownParser {
    pub fn new() -> Self {
        Self
    }

    /// `[text](target)` pairs in order of appearance
    pub fn links(text: &str) -> Vec<serde_json::Value> {
        cached(&LINK, LINK_EXPRESSION)
            .captures_iter(text)
            .map(|c| json!({ "text": &c[1], "url": &c[2] }))
            .collect()
    }
}

impl EntityParser for MarkdownParser {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn can_parse(&self, path: &Path) -> bool {
        matches!(extension(path).as_deref(), Some("md" | "markdown"))
    }

    fn parse(&self, content: &str, path: &str) -> ParseResult {
        let mut result = ParseResult::new(path, "markdown");
        let lines: Vec<&str> = content.lines().collect();
        let heading_re = cached(&HEADING, HEADING_EXPRESSION);

        let mut headings = Vec::new();
        let mut open_fence: Option<(usize, &str)> = None;
        for (i, line) in lines.iter().enumerate() {
            let trimmed = line.trim_start();
            let marker = if trimmed.starts_with("```") {
                Some("```")
            } else if trimmed.starts_with("~~~") {
                Some("~~~")
            } else {
                None
            };

            match (open_fence, marker) {
                (None, Some(m)) => {
                    open_fence = Some((i + 1, m));
                    continue;
                }
                (Some((_, open)), Some(m)) if open == m => {
                    open_fence = None;
                    continue;
                }
                (Some(_), _) => continue,
                (None, None) => {}
            }

            if let Some(caps) = heading_re.captures(line) {
                let title = caps[2].trim().trim_end_matches('#').trim();
                if title.is_empty() {
                    continue;
                }
                headings.push(Heading {
                    level: caps[1].len(),
                    title: title.to_string(),
                    line: i + 1,
                });
            }
        }

        if let Some((line, _)) = open_fence {
            result
                .errors
                .push(ParseError::UnterminatedFence(line).to_string());
        }

        for (i, heading) in headings.iter().enumerate() {
            let end_line = headings
                .get(i + 1)
                .map(|next| next.line - 1)
                .unwrap_or(lines.len());
            let text = lines[heading.line - 1..end_line].join("\n");

            let parent = headings[..i]
                .iter()
                .rev()
                .find(|h| h.level < heading.level)
                .map(|h| h.title.clone());

            let mut section = ParsedEntity::new(
                EntityKind::Section,
                heading.title.clone(),
                text,
                heading.line,
                end_line,
            );
            section.parent = parent;
            section
                .metadata
                .insert("level".to_string(), json!(heading.level));
            section
                .metadata
                .insert("links".to_string(), json!(Self::links(&section.content)));
            result.entities.push(section);
        }

        if result.entities.is_empty() {
            let mut document = ParsedEntity::new(
                EntityKind::Document,
                file_name(path),
                content,
                1,
                lines.len().max(1),
            );
            document
                .metadata
                .insert("links".to_string(), json!(Self::links(content)));
            result.entities.push(document);
        }

        // children: direct subsections, attached to the nearest earlier heading of that name
        let pairs: Vec<(usize, String)> = result
            .entities
            .iter()
            .enumerate()
            .filter_map(|(i, e)| {
                let parent = e.parent.as_deref()?;
                let owner = result.entities[..i].iter().rposition(|o| o.name == parent)?;
                Some((owner, e.name.clone()))
            })
            .collect();
        for (owner, child) in pairs {
            result.entities[owner].children.push(child);
        }

        result
    }
}
