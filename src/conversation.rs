//! Append-only conversation log with per-backend tracks.
//!
//! Every message lives in the `messages` table keyed by
//! `(session_id, backend_tag, ordinal)`. A session in single-track mode
//! writes one track; in arena mode the same session id carries one track
//! per backend, sharing user turns and diverging on assistant turns.
//!
//! # Sync rule
//!
//! [`ConversationLog::append_and_sync`] receives the caller's full working
//! history and appends only the messages past the persisted count. The
//! persisted track is therefore always a prefix of the working history,
//! and calling it again with the same (or a longer) history never
//! duplicates rows. A persisted track that is *not* a prefix means two
//! writers raced; that is reported as [`Error::HistoryCorruption`] and left
//! for the caller to resolve.
//!
//! # Lifecycle
//!
//! A track is `New` until its first append, `Active` afterwards, and
//! `Deleted` once [`ConversationLog::delete_session`] has removed the
//! session. Deletion covers every track in one transaction and leaves a
//! tombstone, so a deleted session can never be written again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{BackendTag, ConversationSession, Message, Role, StoredMessage};

/// Which backend tracks a log accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Single(BackendTag),
    Arena { a: BackendTag, b: BackendTag },
}

impl LogMode {
    /// Arena over the two built-in backends.
    pub fn arena() -> Self {
        LogMode::Arena {
            a: BackendTag::NaiveRag,
            b: BackendTag::LightRag,
        }
    }

    pub fn tags(&self) -> Vec<BackendTag> {
        match *self {
            LogMode::Single(tag) => vec![tag],
            LogMode::Arena { a, b } => vec![a, b],
        }
    }

    pub fn accepts(&self, tag: BackendTag) -> bool {
        self.tags().contains(&tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackState {
    New,
    Active,
    Deleted,
}

pub struct ConversationLog {
    pool: SqlitePool,
    mode: LogMode,
    write_lock: Mutex<()>,
}

impl ConversationLog {
    pub fn new(pool: SqlitePool, mode: LogMode) -> Self {
        Self {
            pool,
            mode,
            write_lock: Mutex::new(()),
        }
    }

    pub fn mode(&self) -> LogMode {
        self.mode
    }

    pub async fn persisted_message_count(&self, session_id: &str, tag: BackendTag) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE session_id = ? AND backend_tag = ?",
        )
        .bind(session_id)
        .bind(tag.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn state(&self, session_id: &str, tag: BackendTag) -> Result<TrackState> {
        if self.is_deleted(session_id).await? {
            return Ok(TrackState::Deleted);
        }
        if self.persisted_message_count(session_id, tag).await? > 0 {
            Ok(TrackState::Active)
        } else {
            Ok(TrackState::New)
        }
    }

    /// Persist the part of `working` that is not yet stored.
    ///
    /// Returns the number of messages appended (0 when already in sync).
    pub async fn append_and_sync(
        &self,
        session_id: &str,
        tag: BackendTag,
        working: &[Message],
    ) -> Result<usize> {
        if !self.mode.accepts(tag) {
            return Err(Error::BackendUnavailable(tag));
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let deleted: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM deleted_sessions WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&mut *tx)
                .await?;
        if deleted > 0 {
            return Err(Error::SessionDeleted(session_id.to_string()));
        }

        let row = sqlx::query(
            "SELECT COUNT(*) AS n, COALESCE(MAX(ordinal), -1) AS last FROM messages WHERE session_id = ? AND backend_tag = ?",
        )
        .bind(session_id)
        .bind(tag.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let existing: i64 = row.get("n");
        let last_ordinal: i64 = row.get("last");

        let corruption = || Error::HistoryCorruption {
            session_id: session_id.to_string(),
            tag,
            persisted: existing,
            working: working.len(),
        };

        if existing as usize > working.len() || last_ordinal != existing - 1 {
            return Err(corruption());
        }

        if existing > 0 {
            let tail = sqlx::query(
                "SELECT role, content FROM messages WHERE session_id = ? AND backend_tag = ? AND ordinal = ?",
            )
            .bind(session_id)
            .bind(tag.as_str())
            .bind(last_ordinal)
            .fetch_one(&mut *tx)
            .await?;
            let role: String = tail.get("role");
            let content: String = tail.get("content");
            let expected = &working[existing as usize - 1];
            if role != expected.role.as_str() || content != expected.content {
                return Err(corruption());
            }
        }

        let pending = &working[existing as usize..];
        if pending.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().timestamp();
        for (offset, message) in pending.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO messages (session_id, backend_tag, ordinal, role, content, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(session_id)
            .bind(tag.as_str())
            .bind(existing + offset as i64)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(session_id, %tag, appended = pending.len(), "conversation log synced");
        Ok(pending.len())
    }

    /// Messages of one track, in append order.
    pub async fn load(&self, session_id: &str, tag: BackendTag) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT ordinal, role, content, created_at FROM messages
            WHERE session_id = ? AND backend_tag = ?
            ORDER BY ordinal ASC
            "#,
        )
        .bind(session_id)
        .bind(tag.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<StoredMessage> {
                let role: String = row.get("role");
                Ok(StoredMessage {
                    session_id: session_id.to_string(),
                    backend_tag: tag,
                    ordinal: row.get("ordinal"),
                    role: role.parse::<Role>()?,
                    content: row.get("content"),
                    created_at: from_ts(row.get("created_at")),
                })
            })
            .collect()
    }

    /// All sessions, most recently active first.
    pub async fn list_sessions(&self) -> Result<Vec<ConversationSession>> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, backend_tag, COUNT(*) AS n,
                   MIN(created_at) AS first_at, MAX(created_at) AS last_at
            FROM messages
            GROUP BY session_id, backend_tag
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut sessions: BTreeMap<String, ConversationSession> = BTreeMap::new();
        for row in &rows {
            let session_id: String = row.get("session_id");
            let tag_name: String = row.get("backend_tag");
            let tag: BackendTag = tag_name.parse()?;
            let first_at = from_ts(row.get("first_at"));
            let last_at = from_ts(row.get("last_at"));

            let entry = sessions
                .entry(session_id.clone())
                .or_insert_with(|| ConversationSession {
                    session_id,
                    created_at: first_at,
                    updated_at: last_at,
                    tracks: Vec::new(),
                });
            entry.created_at = entry.created_at.min(first_at);
            entry.updated_at = entry.updated_at.max(last_at);
            entry.tracks.push((tag, row.get("n")));
        }

        let mut out: Vec<ConversationSession> = sessions.into_values().collect();
        for s in &mut out {
            s.tracks.sort();
        }
        out.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(out)
    }

    /// Remove every track of a session in one transaction.
    ///
    /// Returns the number of messages removed.
    pub async fn delete_session(&self, session_id: &str) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            "INSERT INTO deleted_sessions (session_id, deleted_at) VALUES (?, ?) ON CONFLICT(session_id) DO NOTHING",
        )
        .bind(session_id)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(session_id, removed, "deleted session");
        Ok(removed)
    }

    async fn is_deleted(&self, session_id: &str) -> Result<bool> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deleted_sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n > 0)
    }
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}
