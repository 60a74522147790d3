//! Index maintenance commands: ingest, rebuild, delete-doc, sources.
//!
//! Each command opens the app, does one thing through the [`SyncEngine`],
//! prints a short `key: value` report, and closes the database.
//!
//! [`SyncEngine`]: crate::sync::SyncEngine

use anyhow::Result;
use std::path::PathBuf;

use crate::app::App;
use crate::config::Config;
use crate::documents::{self, SourceDocument};
use crate::error::Error;

fn load(config: &Config, paths: &[PathBuf]) -> Result<Vec<SourceDocument>> {
    if paths.is_empty() {
        documents::load_all(&config.documents)
    } else {
        documents::load_paths(paths)
    }
}

pub async fn run_ingest(config: Config, paths: Vec<PathBuf>) -> Result<()> {
    let app = App::open(config).await?;
    let docs = load(&app.config, &paths)?;
    let pages: usize = docs.iter().map(|d| d.pages.len()).sum();

    let result = app.sync.ingest(&docs, &app.config.chunking).await;
    app.close().await;

    let report = match result {
        Ok(report) => report,
        Err(Error::Ingestion { recovery, source }) => {
            tracing::warn!(recovery = recovery.as_str(), "ingestion failed");
            anyhow::bail!(
                "ingestion failed: {:#}\n  recovery: {} (the index was left unchanged)",
                source,
                recovery.as_str()
            );
        }
        Err(e) => return Err(e.into()),
    };

    println!("ingest");
    println!("  documents: {}", docs.len());
    println!("  pages: {}", pages);
    println!("  added: {}", report.added);
    println!("  skipped: {}", report.skipped);
    println!("ok");
    Ok(())
}

pub async fn run_rebuild(config: Config) -> Result<()> {
    let app = App::open(config).await?;
    let docs = load(&app.config, &[])?;
    let result = app.sync.rebuild(&docs, &app.config.chunking).await;
    app.close().await;
    let report = result?;

    println!("rebuild");
    println!("  documents: {}", docs.len());
    println!("  added: {}", report.added);
    println!("ok");
    Ok(())
}

pub async fn run_delete_doc(config: Config, source: &str) -> Result<()> {
    let app = App::open(config).await?;
    let result = app.sync.delete_source(source).await;
    app.close().await;
    let removed = result?;

    println!("delete-doc {}", source);
    println!("  removed: {}", removed);
    println!("ok");
    Ok(())
}

pub async fn run_sources(config: Config) -> Result<()> {
    let app = App::open(config).await?;
    let result = app.sync.list_sources().await;
    app.close().await;
    let sources = result?;

    if sources.is_empty() {
        println!("No documents indexed.");
        return Ok(());
    }

    println!("{:<60} FRAGMENTS", "SOURCE");
    for s in &sources {
        println!("{:<60} {}", s.source, s.fragments);
    }
    Ok(())
}
