//! Document source: turns files into page-ordered text.
//!
//! PDFs are extracted page by page with `pdf-extract` (page numbers start
//! at 0). Plain text and Markdown files are split into pages on form feed
//! characters; a file without any is a single page 0.
//!
//! Directory scans apply the `[documents]` include/exclude globs and are
//! sorted by path so repeated runs see documents in the same order.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::DocumentsConfig;

/// A loaded document: its locator plus the text of each page, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub source: String,
    pub pages: Vec<String>,
}

/// Find every document under `[documents].root` matching the globs.
pub fn scan(config: &DocumentsConfig) -> Result<Vec<PathBuf>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Document root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string()];
    excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        paths.push(path.to_path_buf());
    }

    paths.sort();
    Ok(paths)
}

/// Load the given files. Unreadable files are an error, not a skip.
pub fn load_paths(paths: &[PathBuf]) -> Result<Vec<SourceDocument>> {
    paths.iter().map(|p| load_document(p)).collect()
}

/// Scan the configured root and load everything found.
pub fn load_all(config: &DocumentsConfig) -> Result<Vec<SourceDocument>> {
    let paths = scan(config)?;
    tracing::debug!(count = paths.len(), root = %config.root.display(), "scanned documents");
    load_paths(&paths)
}

pub fn load_document(path: &Path) -> Result<SourceDocument> {
    let source = path.to_string_lossy().to_string();
    let is_pdf = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    let pages = if is_pdf {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        pdf_extract::extract_text_from_mem_by_pages(&bytes)
            .map_err(|e| anyhow::anyhow!("PDF extraction failed for {}: {}", path.display(), e))?
    } else {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        split_form_feeds(&text)
    };

    Ok(SourceDocument { source, pages })
}

fn split_form_feeds(text: &str) -> Vec<String> {
    text.split('\u{000C}').map(str::to_string).collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
