//! Repository walk: hidden entries, the built-in ignore set and configured
//! globs are skipped; every remaining file with a parser is returned.

use crate::error::IndexingError;
use crate::parsers::{EntityParser, ParserRegistry};
use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory names never descended into
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    "node_modules",
    "venv",
    ".venv",
    "target",
    "dist",
    "build",
];

/// A file selected for indexing together with the parser that claimed it
#[derive(Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Repository-relative, `/`-separated
    pub relative: String,
    pub parser: Arc<dyn EntityParser>,
}

impl std::fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFile")
            .field("relative", &self.relative)
            .field("parser", &self.parser.name())
            .finish()
    }
}

pub fn compile_excludes(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .with_context(|| format!("Invalid exclude pattern '{}'", pattern))?;
        builder.add(glob);
    }
    builder.build().context("Failed to compile exclude patterns")
}

/// True for entries in the built-in ignore set
pub fn is_ignored_name(name: &str) -> bool {
    IGNORED_DIRS.contains(&name) || name.ends_with(".egg-info")
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Files selected by a walk plus the entries that could not be read
#[derive(Debug, Default)]
pub struct WalkOutput {
    pub files: Vec<SourceFile>,
    pub errors: Vec<String>,
}

/// Walk `root` in file-name order and pair each eligible file with its parser.
///
/// An unreadable entry is logged and reported in [`WalkOutput::errors`]; the
/// walk carries on with its siblings.
pub fn collect_files(root: &Path, excludes: Arc<GlobSet>, parsers: &ParserRegistry) -> WalkOutput {
    let filter_root = root.to_path_buf();
    let walker = WalkBuilder::new(root)
        .hidden(true) // skip dotfiles and dot-directories
        .git_ignore(true)
        .git_exclude(true)
        .git_global(false)
        .require_git(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if is_ignored_name(&name) {
                return false;
            }
            !excludes.is_match(relative_path(&filter_root, entry.path()))
        })
        .build();

    let mut output = WalkOutput::default();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let err = IndexingError::WalkFailed(e.to_string());
                tracing::warn!("{}", err);
                output.errors.push(err.to_string());
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let path = entry.path();
        let Some(parser) = parsers.find(path) else {
            continue;
        };
        output.files.push(SourceFile {
            path: path.to_path_buf(),
            relative: relative_path(root, path),
            parser,
        });
    }

    tracing::info!(
        "Found {} files to index under {} ({} unreadable entries)",
        output.files.len(),
        root.display(),
        output.errors.len()
    );
    output
}
