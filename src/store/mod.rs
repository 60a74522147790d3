//! Fragment index abstraction.
//!
//! The [`EmbeddingStore`] trait is the only way the rest of the crate
//! touches the similarity index, enabling pluggable backends (SQLite,
//! in-memory). Vectors never leave the store: writers hand over fragments,
//! readers get fragments back with a distance.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`existing_ids`](EmbeddingStore::existing_ids) | All stored fragment IDs, no payload |
//! | [`add`](EmbeddingStore::add) | Embed and store a batch, all-or-nothing |
//! | [`delete`](EmbeddingStore::delete) | Remove fragments by ID |
//! | [`similarity_search`](EmbeddingStore::similarity_search) | Top-k by ascending distance |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

use crate::models::{Fragment, ScoredFragment};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Name of the collection used when the configuration does not name one.
pub const DEFAULT_COLLECTION: &str = "documents";

#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Name of the collection this store reads and writes.
    fn collection(&self) -> &str;

    /// Return the set of all fragment IDs currently stored.
    async fn existing_ids(&self) -> Result<HashSet<String>>;

    /// Embed and store `fragments` under `ids`.
    ///
    /// Must be atomic per call: on error, none of the batch is visible.
    /// Adding an ID that already exists is an error.
    async fn add(&self, fragments: &[Fragment], ids: &[String]) -> Result<()>;

    /// Delete fragments by ID. Unknown IDs are ignored.
    async fn delete(&self, ids: &[String]) -> Result<()>;

    /// Return up to `k` fragments ranked by ascending distance to `query`.
    ///
    /// An empty index yields an empty result, not an error.
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredFragment>>;
}

/// Check the `ids` argument of [`EmbeddingStore::add`] against the fragments.
pub(crate) fn check_batch(fragments: &[Fragment], ids: &[String]) -> Result<()> {
    if fragments.len() != ids.len() {
        anyhow::bail!(
            "add called with {} fragments but {} ids",
            fragments.len(),
            ids.len()
        );
    }
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            anyhow::bail!("duplicate fragment id in batch: {}", id);
        }
    }
    Ok(())
}

/// Order candidates by distance, ties broken by ID, and keep the top `k`.
pub(crate) fn rank(mut scored: Vec<ScoredFragment>, k: usize) -> Vec<ScoredFragment> {
    scored.sort_by(|a, b| {
        a.score
            .partial_cmp(&b.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.fragment.id.cmp(&b.fragment.id))
    });
    scored.truncate(k);
    scored
}
