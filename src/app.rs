//! Explicit construction of every long-lived component.
//!
//! [`App::open`] builds the pool, store, sync engine, assembler, backends
//! and conversation log from one [`Config`] and hands them out as owned
//! handles. Nothing is initialized at import time; dropping the `App`
//! (or calling [`App::close`]) releases the database.
//!
//! The log runs in arena mode when `[lightrag]` is configured and in
//! single-track NaiveRAG mode otherwise.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{LightRagBackend, NaiveRagBackend, RetrievalBackend};
use crate::chat::ChatService;
use crate::config::Config;
use crate::context::ContextAssembler;
use crate::conversation::{ConversationLog, LogMode};
use crate::db;
use crate::embedding::create_embedder;
use crate::generate::create_generator;
use crate::migrate::migrate_pool;
use crate::models::BackendTag;
use crate::store::{EmbeddingStore, SqliteStore};
use crate::sync::SyncEngine;

pub struct App {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub sync: Arc<SyncEngine>,
    pub assembler: Arc<ContextAssembler>,
    pub chat: Arc<ChatService>,
}

impl App {
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate_pool(&pool).await?;

        let embedder = create_embedder(&config.embedding)?;
        let store: Arc<dyn EmbeddingStore> = Arc::new(SqliteStore::new(pool.clone(), embedder));
        let sync = Arc::new(SyncEngine::new(store.clone()));
        let assembler = Arc::new(ContextAssembler::new(store));

        let generator = create_generator(&config.generation)?;
        let mut backends: Vec<Arc<dyn RetrievalBackend>> = vec![Arc::new(NaiveRagBackend::new(
            assembler.clone(),
            generator,
            config.retrieval.top_k,
            config.retrieval.history_turns,
            Duration::from_secs(config.generation.timeout_secs),
        ))];

        let mode = match &config.lightrag {
            Some(lightrag) => {
                backends.push(Arc::new(LightRagBackend::new(
                    lightrag,
                    config.retrieval.history_turns,
                )?));
                LogMode::arena()
            }
            None => LogMode::Single(BackendTag::NaiveRag),
        };
        tracing::debug!(?mode, backends = backends.len(), "opened app");

        let log = Arc::new(ConversationLog::new(pool.clone(), mode));
        let chat = Arc::new(ChatService::new(log, backends));

        Ok(Self {
            config: Arc::new(config),
            pool,
            sync,
            assembler,
            chat,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
