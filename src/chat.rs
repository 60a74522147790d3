//! Turn orchestration over backends and the conversation log.
//!
//! [`ChatService`] owns the in-memory working history of every active
//! track and drives one turn at a time per track:
//!
//! 1. Append the user message to the working history.
//! 2. Ask the backend for a reply.
//! 3. Append the assistant message and sync the track to the log.
//!
//! The log only ever sees complete turns. When generation fails the user
//! message stays in the working history as a pending turn, nothing is
//! written, and [`ChatService::retry`] can regenerate it. Sending a new
//! message instead replaces the pending one.
//!
//! In arena mode the user message is placed on both tracks before either
//! backend runs, so both logs record the same text for that turn. The two
//! backends then run concurrently and fail independently. While only one
//! track holds a pending turn, a new arena message is refused with
//! [`Error::PendingTurn`] until that track is retried.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::backend::RetrievalBackend;
use crate::conversation::{ConversationLog, LogMode, TrackState};
use crate::error::{Error, Result};
use crate::models::{BackendTag, Message, Role, ScoredFragment, StoredMessage};

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub session_id: String,
    pub backend_tag: BackendTag,
    pub context_fragments: Vec<ScoredFragment>,
    pub assistant_message: Message,
    pub reasoning: Vec<String>,
}

/// Outcome of one track in an arena turn.
#[derive(Debug, Serialize)]
pub struct TrackOutcome {
    pub backend_tag: BackendTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<Answer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TrackError>,
}

#[derive(Debug, Serialize)]
pub struct TrackError {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ArenaAnswer {
    pub session_id: String,
    pub user_message: String,
    pub tracks: Vec<TrackOutcome>,
}

#[derive(Default)]
struct Track {
    messages: Vec<Message>,
    loaded: bool,
}

impl Track {
    fn pending(&self) -> bool {
        matches!(self.messages.last(), Some(m) if m.role == Role::User)
    }
}

type TrackKey = (String, BackendTag);

pub struct ChatService {
    log: Arc<ConversationLog>,
    backends: BTreeMap<BackendTag, Arc<dyn RetrievalBackend>>,
    tracks: Mutex<HashMap<TrackKey, Arc<Mutex<Track>>>>,
}

impl ChatService {
    pub fn new(log: Arc<ConversationLog>, backends: Vec<Arc<dyn RetrievalBackend>>) -> Self {
        let backends = backends.into_iter().map(|b| (b.tag(), b)).collect();
        Self {
            log,
            backends,
            tracks: Mutex::new(HashMap::new()),
        }
    }

    pub fn log(&self) -> &Arc<ConversationLog> {
        &self.log
    }

    pub fn new_session(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Run one turn on a single track.
    pub async fn answer(&self, session_id: &str, tag: BackendTag, user_message: &str) -> Result<Answer> {
        let backend = self.backend(tag)?;
        let mut track = self.open_track(session_id, tag).await?;
        if track.pending() {
            track.messages.pop();
        }
        track.messages.push(Message::user(user_message));
        self.complete(session_id, backend, &mut track).await
    }

    /// Run one turn on every track the log accepts.
    pub async fn answer_arena(&self, session_id: &str, user_message: &str) -> Result<ArenaAnswer> {
        let user = Message::user(user_message);

        let results = match self.log.mode() {
            LogMode::Single(tag) => {
                vec![(tag, self.answer(session_id, tag, user_message).await)]
            }
            LogMode::Arena { a, b } => {
                let (backend_a, backend_b) = (self.backend(a)?, self.backend(b)?);
                let mut track_a = self.open_track(session_id, a).await?;
                let mut track_b = self.open_track(session_id, b).await?;
                // A turn pending on both tracks was recorded by neither, so it
                // can be replaced. Pending on one only means the other log
                // already holds it.
                let lagging = match (track_a.pending(), track_b.pending()) {
                    (true, false) => Some(a),
                    (false, true) => Some(b),
                    _ => None,
                };
                if let Some(tag) = lagging {
                    return Err(Error::PendingTurn {
                        session_id: session_id.to_string(),
                        tag,
                    });
                }
                for track in [&mut track_a, &mut track_b] {
                    if track.pending() {
                        track.messages.pop();
                    }
                    track.messages.push(user.clone());
                }

                let (result_a, result_b) = tokio::join!(
                    self.complete(session_id, backend_a, &mut track_a),
                    self.complete(session_id, backend_b, &mut track_b),
                );
                vec![(a, result_a), (b, result_b)]
            }
        };

        let tracks = results
            .into_iter()
            .map(|(tag, result)| match result {
                Ok(answer) => TrackOutcome {
                    backend_tag: tag,
                    answer: Some(answer),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(session_id, %tag, error = %e, "arena track failed");
                    TrackOutcome {
                        backend_tag: tag,
                        answer: None,
                        error: Some(TrackError {
                            code: e.code(),
                            message: e.to_string(),
                        }),
                    }
                }
            })
            .collect();

        Ok(ArenaAnswer {
            session_id: session_id.to_string(),
            user_message: user.content,
            tracks,
        })
    }

    /// Regenerate the reply to a pending user turn.
    pub async fn retry(&self, session_id: &str, tag: BackendTag) -> Result<Answer> {
        let backend = self.backend(tag)?;
        let mut track = self.open_track(session_id, tag).await?;
        if !track.pending() {
            return Err(Error::NothingToRetry {
                session_id: session_id.to_string(),
                tag,
            });
        }
        self.complete(session_id, backend, &mut track).await
    }

    /// Persisted tracks of a session, for every tag the log accepts.
    pub async fn load_session(&self, session_id: &str) -> Result<Vec<(BackendTag, Vec<StoredMessage>)>> {
        let mut out = Vec::new();
        for tag in self.log.mode().tags() {
            out.push((tag, self.log.load(session_id, tag).await?));
        }
        if out.iter().all(|(_, messages)| messages.is_empty()) {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        Ok(out)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<u64> {
        let removed = self.log.delete_session(session_id).await?;
        self.tracks.lock().await.retain(|(s, _), _| s != session_id);
        Ok(removed)
    }

    fn backend(&self, tag: BackendTag) -> Result<Arc<dyn RetrievalBackend>> {
        self.backends
            .get(&tag)
            .cloned()
            .ok_or(Error::BackendUnavailable(tag))
    }

    /// Lock a track for the duration of a turn, loading it from the log on first use.
    async fn open_track(&self, session_id: &str, tag: BackendTag) -> Result<OwnedMutexGuard<Track>> {
        let cell = {
            let mut tracks = self.tracks.lock().await;
            tracks
                .entry((session_id.to_string(), tag))
                .or_default()
                .clone()
        };
        let mut track = cell.lock_owned().await;

        if !track.loaded {
            if self.log.state(session_id, tag).await? == TrackState::Deleted {
                return Err(Error::SessionDeleted(session_id.to_string()));
            }
            track.messages = self
                .log
                .load(session_id, tag)
                .await?
                .iter()
                .map(StoredMessage::to_message)
                .collect();
            track.loaded = true;
        }
        Ok(track)
    }

    async fn complete(
        &self,
        session_id: &str,
        backend: Arc<dyn RetrievalBackend>,
        track: &mut Track,
    ) -> Result<Answer> {
        let tag = backend.tag();
        let (user, history) = match track.messages.split_last() {
            Some((user, history)) if user.role == Role::User => (user, history),
            _ => {
                return Err(Error::NothingToRetry {
                    session_id: session_id.to_string(),
                    tag,
                })
            }
        };

        let reply = backend
            .respond(history, &user.content)
            .await
            .map_err(|e| Error::Generation {
                tag,
                message: format!("{:#}", e),
            })?;

        let assistant = Message::assistant(reply.content);
        let mut candidate = track.messages.clone();
        candidate.push(assistant.clone());

        if let Err(e) = self.log.append_and_sync(session_id, tag, &candidate).await {
            // The persisted track no longer matches; reload it on the next turn.
            if matches!(e, Error::HistoryCorruption { .. }) {
                track.loaded = false;
            }
            return Err(e);
        }
        track.messages = candidate;

        Ok(Answer {
            session_id: session_id.to_string(),
            backend_tag: tag,
            context_fragments: reply.context_fragments,
            assistant_message: assistant,
            reasoning: reply.reasoning,
        })
    }
}
