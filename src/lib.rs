//! # RAG Arena
//!
//! Incremental document indexing and side-by-side comparison of
//! retrieval-augmented chat backends.
//!
//! Documents are split into fragments whose IDs derive from their position
//! (`source:page:ordinal`), so re-ingesting the same files adds nothing and
//! only new fragments are ever embedded. Chat turns are answered by a naive
//! vector-similarity backend, a LightRAG knowledge-graph backend, or both at
//! once ("arena" mode), with every track logged append-only.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌────────────┐
//! │ Documents │──▶│ Split + IDs  │──▶│ SyncEngine │──▶ EmbeddingStore
//! └───────────┘   └──────────────┘   └────────────┘        │
//!                                                          ▼
//!   user turn ──▶ ChatService ──▶ NaiveRAG: ContextAssembler → window → Generator
//!                      │     └──▶ LightRAG: HTTP /query
//!                      ▼
//!               ConversationLog (one track per backend)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed errors for the write and generation paths |
//! | [`documents`] | Filesystem scan and page extraction |
//! | [`chunk`] | Recursive character splitter |
//! | [`fragment`] | Position-derived fragment IDs |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Embedding store trait, SQLite and in-memory stores |
//! | [`sync`] | Incremental index synchronization |
//! | [`context`] | Retrieval and prompt assembly |
//! | [`history`] | Conversation windowing |
//! | [`generate`] | Generative providers and reasoning split |
//! | [`backend`] | NaiveRAG and LightRAG backends |
//! | [`conversation`] | Append-only per-backend conversation log |
//! | [`chat`] | Turn orchestration, arena mode, retry |
//! | [`app`] | Component construction |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod ask;
pub mod backend;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod context;
pub mod conversation;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod fragment;
pub mod generate;
pub mod history;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
pub mod sessions;
pub mod store;
pub mod sync;
