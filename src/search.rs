//! `arena search`: show what the NaiveRAG backend would retrieve.

use anyhow::{bail, Result};

use crate::app::App;
use crate::config::Config;

pub async fn run_search(
    config: Config,
    query: &str,
    limit: Option<usize>,
    show_prompt: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }

    let app = App::open(config).await?;
    let k = limit.unwrap_or(app.config.retrieval.top_k);
    let result = app.assembler.assemble(query, k).await;
    app.close().await;
    let ctx = result?;

    if ctx.fragments.is_empty() {
        println!("No results.");
    }

    for (i, scored) in ctx.fragments.iter().enumerate() {
        let f = &scored.fragment;
        println!("{}. [{:.4}] {}", i + 1, scored.score, f.id);
        println!("    source: {}", f.source);
        println!("    page: {}", f.page);
        println!("    excerpt: \"{}\"", excerpt(&f.text, 160));
        println!();
    }

    if show_prompt {
        println!("--- Prompt ---");
        println!("{}", ctx.prompt);
    }
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let trimmed = flat.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
