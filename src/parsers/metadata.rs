use super::{EntityKind, EntityParser, ParseResult, ParsedEntity, extension, file_name};
use crate::error::ParseError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;

/// Canonical file name of a repository metadata record
pub const META_FILE_NAME: &str = "meta.yaml";

/// A declared dependency of the repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitionMetrics {
    #[serde(default)]
    pub complexity_score: Option<f64>,
    #[serde(default)]
    pub comprehension_baseline: Option<f64>,
    #[serde(default)]
    pub last_benchmark: Option<String>,
}

/// Repository metadata record (`meta.yaml`).
///
/// Every field is optional here; schema validation belongs to the tooling that
/// writes these files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(default, deserialize_with = "scalar_string")]
    pub schema_version: Option<String>,
    #[serde(default)]
    pub repository_role: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub semantic_scope: Option<String>,
    #[serde(default)]
    pub proficiency_level: Option<String>,
    #[serde(default)]
    pub ecosystem_links: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Entries are either plain names or single-key maps of name to details
    #[serde(default)]
    pub files: Vec<serde_yaml::Value>,
    #[serde(default)]
    pub cognition_metrics: Option<CognitionMetrics>,
}

impl MetadataRecord {
    /// Names declared under `files`
    pub fn file_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for entry in &self.files {
            match entry {
                serde_yaml::Value::String(name) => names.push(name.clone()),
                serde_yaml::Value::Mapping(map) => {
                    names.extend(map.keys().filter_map(|k| k.as_str().map(str::to_string)))
                }
                _ => {}
            }
        }
        names
    }
}

/// Accepts `2.0`, `"2.0"` or `2` for version-like fields
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_yaml::Value::String(s)) => Some(s),
        Some(serde_yaml::Value::Number(n)) => Some(n.to_string()),
        Some(serde_yaml::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// YAML parser. `meta.yaml` files (or any mapping with `schema_version`) become a
/// `MetadataRecord` entity; other documents become a generic `Document`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataParser;

impl MetadataParser {
    pub fn new() -> Self {
        Self
    }

    fn record_entity(
        record: &MetadataRecord,
        raw: serde_json::Value,
        content: &str,
        path: &str,
    ) -> ParsedEntity {
        let name = Path::new(path)
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("root");

        let mut entity = ParsedEntity::new(
            EntityKind::MetadataRecord,
            name,
            content,
            1,
            content.lines().count().max(1),
        );
        entity.docstring = record.description.clone();
        entity.children = record.file_names();

        let meta = &mut entity.metadata;
        meta.insert(
            "schema_version".to_string(),
            json!(record.schema_version.as_deref().unwrap_or("unknown")),
        );
        meta.insert("semantic_scope".to_string(), json!(record.semantic_scope));
        meta.insert(
            "proficiency_level".to_string(),
            json!(record.proficiency_level),
        );
        meta.insert("repository_role".to_string(), json!(record.repository_role));
        if let Some(description) = &record.description {
            meta.insert("description".to_string(), json!(description));
        }
        if !record.tags.is_empty() {
            meta.insert("tags".to_string(), json!(record.tags));
        }
        meta.insert("raw_data".to_string(), raw);
        entity
    }

    fn generic_entity(
        data: &serde_yaml::Value,
        raw: serde_json::Value,
        content: &str,
        path: &str,
    ) -> ParsedEntity {
        let mut entity = ParsedEntity::new(
            EntityKind::Document,
            file_name(path),
            content,
            1,
            content.lines().count().max(1),
        );
        if let serde_yaml::Value::Mapping(map) = data {
            entity.children = map
                .keys()
                .filter_map(|k| match k {
                    serde_yaml::Value::String(s) => Some(s.clone()),
                    serde_yaml::Value::Number(n) => Some(n.to_string()),
                    serde_yaml::Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                })
                .collect();
        }
        entity.metadata.insert("raw_data".to_string(), raw);
        entity
    }
}

impl EntityParser for MetadataParser {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn can_parse(&self, path: &Path) -> bool {
        matches!(extension(path).as_deref(), Some("yaml" | "yml"))
    }

    fn parse(&self, content: &str, path: &str) -> ParseResult {
        let mut result = ParseResult::new(path, "yaml");

        let data: serde_yaml::Value = match serde_yaml::from_str(content) {
            Ok(data) => data,
            Err(e) => {
                result
                    .errors
                    .push(ParseError::InvalidYaml(e.to_string()).to_string());
                return result;
            }
        };
        if data.is_null() {
            return result;
        }

        let raw = serde_json::to_value(&data).unwrap_or(serde_json::Value::Null);
        let is_meta = file_name(path) == META_FILE_NAME
            || data
                .as_mapping()
                .is_some_and(|m| m.contains_key("schema_version"));

        let entity = if is_meta {
            match serde_yaml::from_value::<MetadataRecord>(data.clone()) {
                Ok(record) => Self::record_entity(&record, raw, content, path),
                Err(e) => {
                    tracing::debug!("{} is not a metadata record: {}", path, e);
                    Self::generic_entity(&data, raw, content, path)
                }
            }
        } else {
            Self::generic_entity(&data, raw, content, path)
        };
        result.entities.push(entity);
        result
    }
}
