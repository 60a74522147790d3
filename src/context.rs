//! Retrieval-augmented prompt assembly.
//!
//! Runs a similarity search for the user's question, joins the ranked
//! fragment texts into one context block, and fills the two-slot
//! question-answering template. An empty index produces an empty context
//! block and the template is filled as usual.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::models::ScoredFragment;
use crate::store::EmbeddingStore;

/// Separator placed between fragment texts in the context block.
pub const CONTEXT_DELIMITER: &str = "\n\n---\n\n";

pub const PROMPT_TEMPLATE: &str = "Answer the question based only on the following context:\n{context}\n---\nAnswer the question based on the above context: {question}";

pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    /// Retrieved fragments, most relevant first.
    pub fragments: Vec<ScoredFragment>,
    /// The filled template, ready to be sent as the user turn.
    pub prompt: String,
}

pub struct ContextAssembler {
    store: Arc<dyn EmbeddingStore>,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn EmbeddingStore>) -> Self {
        Self { store }
    }

    pub async fn assemble(&self, query: &str, k: usize) -> Result<AssembledContext> {
        let fragments = self.store.similarity_search(query, k).await?;
        let prompt = fill_template(&context_block(&fragments), query);
        Ok(AssembledContext { fragments, prompt })
    }
}

/// Join fragment texts in rank order.
pub fn context_block(fragments: &[ScoredFragment]) -> String {
    fragments
        .iter()
        .map(|f| f.fragment.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}

pub fn fill_template(context: &str, question: &str) -> String {
    // Single pass over the template: placeholders inside the substituted
    // context must not be expanded a second time.
    let (before_context, rest) = PROMPT_TEMPLATE
        .split_once("{context}")
        .unwrap_or((PROMPT_TEMPLATE, ""));
    let (between, after_question) = rest.split_once("{question}").unwrap_or((rest, ""));
    format!(
        "{}{}{}{}{}",
        before_context, context, between, question, after_question
    )
}
