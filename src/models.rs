//! Core data models used throughout rag-arena.
//!
//! These types represent the fragments, messages, and sessions that flow
//! through the ingestion, retrieval, and conversation logging pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A piece of page text produced by the document splitter, before it
/// has been assigned an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFragment {
    /// Locator of the source document (usually its path).
    pub source: String,
    /// Zero-based page number within the source.
    pub page: i64,
    pub text: String,
}

impl RawFragment {
    pub fn new(source: impl Into<String>, page: i64, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            page,
            text: text.into(),
        }
    }
}

/// A fragment with its position-derived identifier.
///
/// `id` is always `"{source}:{page}:{ordinal}"` and is only ever computed
/// by [`crate::fragment::assign_ids`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fragment {
    pub id: String,
    pub source: String,
    pub page: i64,
    /// Zero-based position of the fragment within its page run.
    pub ordinal: i64,
    pub text: String,
}

/// A fragment returned from a similarity search, with its distance.
///
/// Lower scores are more relevant.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredFragment {
    pub fragment: Fragment,
    pub score: f64,
}

/// Identifies which retrieval backend produced a conversation track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendTag {
    /// Vector-similarity retrieval over the fragment index (backend A).
    #[serde(rename = "NaiveRAG")]
    NaiveRag,
    /// Knowledge-graph retrieval served by LightRAG (backend B).
    #[serde(rename = "LightRAG")]
    LightRag,
}

impl BackendTag {
    pub const ALL: [BackendTag; 2] = [BackendTag::NaiveRag, BackendTag::LightRag];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendTag::NaiveRag => "NaiveRAG",
            BackendTag::LightRag => "LightRAG",
        }
    }
}

impl fmt::Display for BackendTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendTag {
    type Err = anyhow::Error;

    /// Accepts the stored tag names as well as the short CLI aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "naiverag" | "naive" | "a" => Ok(BackendTag::NaiveRag),
            "lightrag" | "light" | "b" => Ok(BackendTag::LightRag),
            _ => anyhow::bail!("Unknown backend: '{}'. Use NaiveRAG or LightRAG.", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => anyhow::bail!("Unknown message role: '{}'", s),
        }
    }
}

/// A single chat message, as exchanged with a generative backend.
///
/// Session, tag and ordinal are implied by where the message lives
/// (a working history or a persisted track).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A message row as persisted in the conversation log.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub session_id: String,
    pub backend_tag: BackendTag,
    pub ordinal: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Summary of one logged session, across all of its backend tracks.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Persisted message count per backend track present in the log.
    pub tracks: Vec<(BackendTag, i64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_tag_parse_aliases() {
        assert_eq!("NaiveRAG".parse::<BackendTag>().unwrap(), BackendTag::NaiveRag);
        assert_eq!("light".parse::<BackendTag>().unwrap(), BackendTag::LightRag);
        assert_eq!("B".parse::<BackendTag>().unwrap(), BackendTag::LightRag);
        assert!("graph".parse::<BackendTag>().is_err());
    }

    #[test]
    fn test_backend_tag_wire_names() {
        assert_eq!(
            serde_json::to_string(&BackendTag::NaiveRag).unwrap(),
            "\"NaiveRAG\""
        );
        assert_eq!(BackendTag::LightRag.to_string(), "LightRAG");
    }

    #[test]
    fn test_role_roundtrip_names() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!(Role::Assistant.as_str(), "assistant");
        assert!("system".parse::<Role>().is_err());
    }
}
