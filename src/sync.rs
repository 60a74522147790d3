//! Incremental index synchronization.
//!
//! Reconciles a freshly split fragment set against the IDs already in an
//! [`EmbeddingStore`] and writes only the missing ones:
//!
//! 1. Read the full set of existing IDs (no payload).
//! 2. Keep fragments whose ID is not in that set, in input order.
//! 3. Hand them to the store as a single batch, or do nothing.
//!
//! Existing IDs are never rewritten, even when the text behind them has
//! changed. A document whose content moved without changing its fragment
//! boundaries stays stale until it is deleted with [`SyncEngine::delete_source`]
//! and ingested again, or the whole index is rebuilt.
//!
//! The read-diff-write sequence runs under the engine's write lock, so two
//! syncs against the same collection cannot interleave. Build one engine
//! per collection and share it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::chunk::split_pages;
use crate::config::ChunkingConfig;
use crate::documents::SourceDocument;
use crate::error::{Error, RecoveryAction, Result};
use crate::fragment::{assign_ids, source_prefix};
use crate::models::Fragment;
use crate::store::EmbeddingStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub added: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub source: String,
    pub fragments: usize,
}

pub struct SyncEngine {
    store: Arc<dyn EmbeddingStore>,
    write_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn EmbeddingStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn EmbeddingStore> {
        &self.store
    }

    /// Add every fragment whose ID is not yet stored.
    pub async fn sync(&self, fragments: Vec<Fragment>) -> Result<SyncReport> {
        let _guard = self.write_lock.lock().await;
        self.sync_locked(fragments, RecoveryAction::Resync).await
    }

    /// Split, identify, and sync a set of documents.
    ///
    /// Each document is identified on its own, so fragments of different
    /// documents never share an ordinal counter.
    pub async fn ingest(
        &self,
        documents: &[SourceDocument],
        chunking: &ChunkingConfig,
    ) -> Result<SyncReport> {
        let fragments = fragment_documents(documents, chunking);
        self.sync(fragments).await
    }

    /// Delete every fragment of `source`. Returns how many were removed.
    pub async fn delete_source(&self, source: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let prefix = source_prefix(source);
        let doomed: Vec<String> = self
            .store
            .existing_ids()
            .await?
            .into_iter()
            .filter(|id| id.starts_with(&prefix) && parse_id(id).map(|p| p.0) == Some(source))
            .collect();
        self.store.delete(&doomed).await?;
        tracing::info!(source, removed = doomed.len(), "deleted document fragments");
        Ok(doomed.len())
    }

    /// Delete every fragment in the collection.
    pub async fn clear(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        self.clear_locked().await
    }

    /// Clear the collection and ingest `documents` from scratch.
    ///
    /// This is the recovery path for an [`Error::Ingestion`] that suggests
    /// [`RecoveryAction::Rebuild`].
    pub async fn rebuild(
        &self,
        documents: &[SourceDocument],
        chunking: &ChunkingConfig,
    ) -> Result<SyncReport> {
        let fragments = fragment_documents(documents, chunking);
        let _guard = self.write_lock.lock().await;
        self.clear_locked().await.map_err(|e| match e {
            Error::Store(source) => Error::Ingestion {
                recovery: RecoveryAction::Rebuild,
                source,
            },
            other => other,
        })?;
        // Once cleared, the only way back to a full index is another rebuild.
        self.sync_locked(fragments, RecoveryAction::Rebuild).await
    }

    /// Stored sources with their fragment counts, sorted by source.
    pub async fn list_sources(&self) -> Result<Vec<SourceSummary>> {
        let ids = self.store.existing_ids().await?;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for id in &ids {
            if let Some((source, _, _)) = parse_id(id) {
                *counts.entry(source.to_string()).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|(source, fragments)| SourceSummary { source, fragments })
            .collect())
    }

    async fn sync_locked(
        &self,
        fragments: Vec<Fragment>,
        recovery: RecoveryAction,
    ) -> Result<SyncReport> {
        let existing = self
            .store
            .existing_ids()
            .await
            .map_err(|source| Error::Ingestion { recovery, source })?;

        let total = fragments.len();
        let mut seen: HashSet<String> = HashSet::new();
        let new: Vec<Fragment> = fragments
            .into_iter()
            .filter(|f| !existing.contains(&f.id) && seen.insert(f.id.clone()))
            .collect();

        let report = SyncReport {
            added: new.len(),
            skipped: total - new.len(),
        };

        if new.is_empty() {
            tracing::info!(skipped = report.skipped, "no new fragments to add");
            return Ok(report);
        }

        let ids: Vec<String> = new.iter().map(|f| f.id.clone()).collect();
        self.store
            .add(&new, &ids)
            .await
            .map_err(|source| Error::Ingestion { recovery, source })?;

        tracing::info!(
            collection = self.store.collection(),
            existing = existing.len(),
            added = report.added,
            skipped = report.skipped,
            "sync complete"
        );
        Ok(report)
    }

    async fn clear_locked(&self) -> Result<usize> {
        let ids: Vec<String> = self.store.existing_ids().await?.into_iter().collect();
        self.store.delete(&ids).await?;
        tracing::info!(collection = self.store.collection(), removed = ids.len(), "cleared index");
        Ok(ids.len())
    }
}

/// Split each document and assign IDs document by document.
pub fn fragment_documents(documents: &[SourceDocument], chunking: &ChunkingConfig) -> Vec<Fragment> {
    documents
        .iter()
        .flat_map(|doc| assign_ids(split_pages(&doc.source, &doc.pages, chunking)))
        .collect()
}

/// Split a fragment ID into `(source, page, ordinal)`.
///
/// Sources may themselves contain `:`; page and ordinal never do.
pub fn parse_id(id: &str) -> Option<(&str, i64, i64)> {
    let mut parts = id.rsplitn(3, ':');
    let ordinal = parts.next()?.parse().ok()?;
    let page = parts.next()?.parse().ok()?;
    let source = parts.next()?;
    Some((source, page, ordinal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::{RawFragment, ScoredFragment};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine() -> (SyncEngine, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new(Arc::new(HashEmbedder::new(64))));
        (SyncEngine::new(store.clone()), store)
    }

    fn frags(source: &str, texts: &[&str]) -> Vec<Fragment> {
        assign_ids(
            texts
                .iter()
                .map(|t| RawFragment::new(source, 0, *t))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_second_sync_adds_nothing() {
        let (engine, store) = engine();
        let first = engine.sync(frags("a.pdf", &["one", "two", "three"])).await.unwrap();
        assert_eq!(first, SyncReport { added: 3, skipped: 0 });

        let second = engine.sync(frags("a.pdf", &["one", "two", "three"])).await.unwrap();
        assert_eq!(second, SyncReport { added: 0, skipped: 3 });
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_partial_overlap_keeps_stale_text() {
        let (engine, store) = engine();
        engine.sync(frags("a.pdf", &["old first", "old second"])).await.unwrap();

        let report = engine
            .sync(frags("a.pdf", &["new first", "new second", "brand new third"]))
            .await
            .unwrap();
        assert_eq!(report, SyncReport { added: 1, skipped: 2 });
        assert_eq!(store.text_of("a.pdf:0:0").as_deref(), Some("old first"));
        assert_eq!(store.text_of("a.pdf:0:2").as_deref(), Some("brand new third"));
    }

    #[tokio::test]
    async fn test_concurrent_overlapping_syncs_add_each_id_once() {
        let (engine, store) = engine();
        let engine = Arc::new(engine);
        let texts = ["one", "two", "three", "four", "five"];

        let handles: Vec<_> = (1..=texts.len())
            .map(|n| {
                let engine = engine.clone();
                let batch = frags("a.pdf", &texts[..n]);
                tokio::spawn(async move { engine.sync(batch).await })
            })
            .collect();

        let mut added = 0;
        for handle in handles {
            let report = handle.await.unwrap().unwrap();
            added += report.added;
        }
        assert_eq!(added, texts.len());
        assert_eq!(store.len(), texts.len());
    }

    #[tokio::test]
    async fn test_in_batch_duplicates_written_once() {
        let (engine, store) = engine();
        let mut batch = frags("a.pdf", &["one"]);
        batch.push(batch[0].clone());
        let report = engine.sync(batch).await.unwrap();
        assert_eq!(report, SyncReport { added: 1, skipped: 1 });
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_source_then_reingest_refreshes_text() {
        let (engine, store) = engine();
        engine.sync(frags("a.pdf", &["old"])).await.unwrap();
        engine.sync(frags("b.pdf", &["other"])).await.unwrap();

        assert_eq!(engine.delete_source("a.pdf").await.unwrap(), 1);
        engine.sync(frags("a.pdf", &["new"])).await.unwrap();

        assert_eq!(store.text_of("a.pdf:0:0").as_deref(), Some("new"));
        assert_eq!(store.text_of("b.pdf:0:0").as_deref(), Some("other"));
    }

    #[tokio::test]
    async fn test_delete_source_does_not_match_longer_names() {
        let (engine, store) = engine();
        engine.sync(frags("a", &["x"])).await.unwrap();
        engine.sync(frags("a:1", &["y"])).await.unwrap();

        assert_eq!(engine.delete_source("a").await.unwrap(), 1);
        assert_eq!(store.text_of("a:1:0:0").as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn test_list_sources_counts() {
        let (engine, _store) = engine();
        engine.sync(frags("b.pdf", &["1"])).await.unwrap();
        engine.sync(frags("a.pdf", &["1", "2"])).await.unwrap();
        let sources = engine.list_sources().await.unwrap();
        assert_eq!(
            sources,
            vec![
                SourceSummary { source: "a.pdf".into(), fragments: 2 },
                SourceSummary { source: "b.pdf".into(), fragments: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_ingest_identifies_each_document_separately() {
        let (engine, store) = engine();
        let docs = vec![
            SourceDocument {
                source: "a.txt".into(),
                pages: vec!["alpha".into()],
            },
            SourceDocument {
                source: "b.txt".into(),
                pages: vec!["beta".into()],
            },
        ];
        let chunking = ChunkingConfig::default();
        assert_eq!(engine.ingest(&docs, &chunking).await.unwrap().added, 2);
        assert_eq!(engine.ingest(&docs, &chunking).await.unwrap().added, 0);
        assert!(store.text_of("b.txt:0:0").is_some());
    }

    #[tokio::test]
    async fn test_rebuild_replaces_stale_text() {
        let (engine, store) = engine();
        engine.sync(frags("a.txt", &["stale"])).await.unwrap();
        let docs = vec![SourceDocument {
            source: "a.txt".into(),
            pages: vec!["fresh".into()],
        }];
        let report = engine.rebuild(&docs, &ChunkingConfig::default()).await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(store.text_of("a.txt:0:0").as_deref(), Some("fresh"));
    }

    #[test]
    fn test_parse_id_with_colon_in_source() {
        assert_eq!(parse_id("C:/docs/a.pdf:3:7"), Some(("C:/docs/a.pdf", 3, 7)));
        assert_eq!(parse_id("not-an-id"), None);
    }

    /// Store whose writes always fail, counting attempts.
    struct RejectingStore {
        adds: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingStore for RejectingStore {
        fn collection(&self) -> &str {
            "rejecting"
        }
        async fn existing_ids(&self) -> anyhow::Result<HashSet<String>> {
            Ok(HashSet::new())
        }
        async fn add(&self, _fragments: &[Fragment], _ids: &[String]) -> anyhow::Result<()> {
            self.adds.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("disk full")
        }
        async fn delete(&self, _ids: &[String]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn similarity_search(
            &self,
            _query: &str,
            _k: usize,
        ) -> anyhow::Result<Vec<ScoredFragment>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_rejected_batch_is_ingestion_error_without_retry() {
        let store = Arc::new(RejectingStore {
            adds: AtomicUsize::new(0),
        });
        let engine = SyncEngine::new(store.clone());
        let err = engine.sync(frags("a.pdf", &["one", "two"])).await.unwrap_err();
        match err {
            Error::Ingestion { recovery, .. } => assert_eq!(recovery, RecoveryAction::Resync),
            other => panic!("expected ingestion error, got {other:?}"),
        }
        assert_eq!(store.adds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rebuild_failure_suggests_rebuild() {
        let store = Arc::new(RejectingStore {
            adds: AtomicUsize::new(0),
        });
        let engine = SyncEngine::new(store);
        let docs = vec![SourceDocument {
            source: "a.txt".into(),
            pages: vec!["text".into()],
        }];
        let err = engine.rebuild(&docs, &ChunkingConfig::default()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Ingestion {
                recovery: RecoveryAction::Rebuild,
                ..
            }
        ));
    }
}
