//! In-memory [`EmbeddingStore`] implementation for tests and demos.
//!
//! Entries live in a `Vec` behind `std::sync::RwLock`, in insertion order.
//! Vector search is brute-force cosine distance over every entry.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::{cosine_distance, Embedder};
use crate::models::{Fragment, ScoredFragment};

use super::{check_batch, rank, EmbeddingStore, DEFAULT_COLLECTION};

struct StoredEntry {
    fragment: Fragment,
    vector: Vec<f32>,
}

pub struct InMemoryStore {
    collection: String,
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<StoredEntry>>,
}

impl InMemoryStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self::with_collection(DEFAULT_COLLECTION, embedder)
    }

    pub fn with_collection(collection: &str, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            collection: collection.to_string(),
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored text for `id`, if present.
    pub fn text_of(&self, id: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .find(|e| e.fragment.id == id)
            .map(|e| e.fragment.text.clone())
    }
}

#[async_trait]
impl EmbeddingStore for InMemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn existing_ids(&self) -> Result<HashSet<String>> {
        let entries = self.entries.read().unwrap();
        Ok(entries.iter().map(|e| e.fragment.id.clone()).collect())
    }

    async fn add(&self, fragments: &[Fragment], ids: &[String]) -> Result<()> {
        check_batch(fragments, ids)?;
        if fragments.is_empty() {
            return Ok(());
        }

        // Embed before taking the write lock so a failed embedding leaves nothing behind.
        let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
        let vectors = self.embedder.embed_texts(&texts).await?;
        if vectors.len() != fragments.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} fragments",
                vectors.len(),
                fragments.len()
            );
        }

        let mut entries = self.entries.write().unwrap();
        if let Some(dup) = ids
            .iter()
            .find(|id| entries.iter().any(|e| &e.fragment.id == *id))
        {
            anyhow::bail!("fragment id already stored: {}", dup);
        }
        for ((fragment, id), vector) in fragments.iter().zip(ids).zip(vectors) {
            let mut fragment = fragment.clone();
            fragment.id = id.clone();
            entries.push(StoredEntry { fragment, vector });
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut entries = self.entries.write().unwrap();
        entries.retain(|e| !doomed.contains(e.fragment.id.as_str()));
        Ok(())
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredFragment>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed_query(query).await?;

        let entries = self.entries.read().unwrap();
        let scored: Vec<ScoredFragment> = entries
            .iter()
            .map(|e| ScoredFragment {
                fragment: e.fragment.clone(),
                score: cosine_distance(&query_vec, &e.vector),
            })
            .collect();
        Ok(rank(scored, k))
    }
}
