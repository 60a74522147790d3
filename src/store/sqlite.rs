//! SQLite-backed [`EmbeddingStore`] implementation.
//!
//! Fragments and their vectors live in the `fragments` table, keyed by
//! `(collection, id)`. Vectors are little-endian `f32` BLOBs; search is a
//! brute-force cosine scan over the collection.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob, Embedder};
use crate::models::{Fragment, ScoredFragment};

use super::{check_batch, rank, EmbeddingStore, DEFAULT_COLLECTION};

/// Texts per embedder call while preparing a batch.
const EMBED_BATCH: usize = 64;

pub struct SqliteStore {
    pool: SqlitePool,
    collection: String,
    embedder: Arc<dyn Embedder>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn Embedder>) -> Self {
        Self::with_collection(pool, DEFAULT_COLLECTION, embedder)
    }

    pub fn with_collection(pool: SqlitePool, collection: &str, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            pool,
            collection: collection.to_string(),
            embedder,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl EmbeddingStore for SqliteStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn existing_ids(&self) -> Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM fragments WHERE collection = ?")
            .bind(&self.collection)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn add(&self, fragments: &[Fragment], ids: &[String]) -> Result<()> {
        check_batch(fragments, ids)?;
        if fragments.is_empty() {
            return Ok(());
        }

        // All vectors are computed before the transaction opens; an embedding
        // failure therefore never reaches the database.
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(fragments.len());
        for batch in fragments.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|f| f.text.clone()).collect();
            let embedded = self.embedder.embed_texts(&texts).await?;
            if embedded.len() != batch.len() {
                anyhow::bail!(
                    "embedder returned {} vectors for {} fragments",
                    embedded.len(),
                    batch.len()
                );
            }
            vectors.extend(embedded);
        }

        let now = chrono::Utc::now().timestamp();
        let model = self.embedder.model_name().to_string();
        let mut tx = self.pool.begin().await?;

        for ((fragment, id), vector) in fragments.iter().zip(ids).zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO fragments (collection, id, source, page, ordinal, text, embedding, dims, model, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&self.collection)
            .bind(id)
            .bind(&fragment.source)
            .bind(fragment.page)
            .bind(fragment.ordinal)
            .bind(&fragment.text)
            .bind(vec_to_blob(vector))
            .bind(vector.len() as i64)
            .bind(&model)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM fragments WHERE collection = ? AND id = ?")
                .bind(&self.collection)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredFragment>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, source, page, ordinal, text, embedding FROM fragments WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed_query(query).await?;

        let scored: Vec<ScoredFragment> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                ScoredFragment {
                    fragment: Fragment {
                        id: row.get("id"),
                        source: row.get("source"),
                        page: row.get("page"),
                        ordinal: row.get("ordinal"),
                        text: row.get("text"),
                    },
                    score: cosine_distance(&query_vec, &vector),
                }
            })
            .collect();

        Ok(rank(scored, k))
    }
}
