//! Typed errors for the write path and the generation path.
//!
//! Command-level code keeps using `anyhow`; these variants exist where a
//! caller has to react differently depending on what failed.

use thiserror::Error;

use crate::models::BackendTag;

/// What a caller should do after an [`Error::Ingestion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Run the same sync again; the index was left untouched.
    Resync,
    /// Clear the index and ingest every document again.
    Rebuild,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::Resync => "resync",
            RecoveryAction::Rebuild => "rebuild",
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The embedding store rejected a batch. Nothing from the batch was written.
    #[error("ingestion failed ({} suggested): {source}", .recovery.as_str())]
    Ingestion {
        recovery: RecoveryAction,
        #[source]
        source: anyhow::Error,
    },

    /// The persisted track is not a prefix of the working history.
    #[error(
        "history corruption in session {session_id} ({tag}): {persisted} persisted messages, {working} in working history"
    )]
    HistoryCorruption {
        session_id: String,
        tag: BackendTag,
        persisted: i64,
        working: usize,
    },

    /// The generative backend failed or timed out. No assistant message was recorded.
    #[error("generation failed for {tag}: {message}")]
    Generation { tag: BackendTag, message: String },

    /// There is no pending user turn to regenerate.
    #[error("nothing to retry for session {session_id} ({tag})")]
    NothingToRetry { session_id: String, tag: BackendTag },

    /// One arena track still holds an unanswered user turn that the other
    /// track already recorded. Accepting a new message would make the two
    /// logs disagree.
    #[error("session {session_id} has a pending {tag} turn; retry it before sending a new message")]
    PendingTurn { session_id: String, tag: BackendTag },

    #[error("backend not configured: {0}")]
    BackendUnavailable(BackendTag),

    /// The session was deleted and cannot be written again.
    #[error("session {0} was deleted")]
    SessionDeleted(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// Short machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Ingestion { .. } => "ingestion_failed",
            Error::HistoryCorruption { .. } => "history_corruption",
            Error::Generation { .. } => "generation_failed",
            Error::NothingToRetry { .. } => "nothing_to_retry",
            Error::PendingTurn { .. } => "pending_turn",
            Error::BackendUnavailable(_) => "backend_unavailable",
            Error::SessionDeleted(_) => "session_deleted",
            Error::SessionNotFound(_) => "session_not_found",
            Error::Store(_) | Error::Database(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
