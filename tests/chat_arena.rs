//! Chat service behaviour against scripted backends and an on-disk log.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use rag_arena::backend::{BackendReply, RetrievalBackend};
use rag_arena::chat::ChatService;
use rag_arena::conversation::{ConversationLog, LogMode};
use rag_arena::db;
use rag_arena::error::Error;
use rag_arena::migrate::migrate_pool;
use rag_arena::models::{BackendTag, Message, Role};

/// Replies from a queue; an `Err` entry simulates a failed generation.
struct Scripted {
    tag: BackendTag,
    replies: Mutex<VecDeque<Result<String, String>>>,
    seen: Mutex<Vec<(Vec<Message>, String)>>,
}

impl Scripted {
    fn new(tag: BackendTag, replies: Vec<Result<&str, &str>>) -> Arc<Self> {
        Arc::new(Self {
            tag,
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RetrievalBackend for Scripted {
    fn tag(&self) -> BackendTag {
        self.tag
    }

    async fn respond(&self, history: &[Message], user_message: &str) -> anyhow::Result<BackendReply> {
        self.seen
            .lock()
            .unwrap()
            .push((history.to_vec(), user_message.to_string()));
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(content)) => Ok(BackendReply {
                context_fragments: Vec::new(),
                content,
                reasoning: Vec::new(),
            }),
            Some(Err(e)) => anyhow::bail!(e),
            None => anyhow::bail!("script exhausted"),
        }
    }
}

fn backends(list: Vec<Arc<Scripted>>) -> Vec<Arc<dyn RetrievalBackend>> {
    list.into_iter()
        .map(|b| b as Arc<dyn RetrievalBackend>)
        .collect()
}

async fn open_log(tmp: &TempDir, mode: LogMode) -> Arc<ConversationLog> {
    let pool = db::connect_path(&tmp.path().join("arena.sqlite")).await.unwrap();
    migrate_pool(&pool).await.unwrap();
    Arc::new(ConversationLog::new(pool, mode))
}

#[tokio::test]
async fn test_arena_turn_records_identical_user_message_on_both_tracks() {
    let tmp = TempDir::new().unwrap();
    let log = open_log(&tmp, LogMode::arena()).await;
    let naive = Scripted::new(BackendTag::NaiveRag, vec![Ok("vector answer")]);
    let light = Scripted::new(BackendTag::LightRag, vec![Ok("graph answer")]);
    let chat = ChatService::new(log.clone(), backends(vec![naive, light]));

    let session = chat.new_session();
    let arena = chat
        .answer_arena(&session, "How does the pump work?")
        .await
        .unwrap();
    assert_eq!(arena.tracks.len(), 2);
    assert!(arena.tracks.iter().all(|t| t.answer.is_some()));

    assert_eq!(log.persisted_message_count(&session, BackendTag::NaiveRag).await.unwrap(), 2);
    assert_eq!(log.persisted_message_count(&session, BackendTag::LightRag).await.unwrap(), 2);

    let a = log.load(&session, BackendTag::NaiveRag).await.unwrap();
    let b = log.load(&session, BackendTag::LightRag).await.unwrap();
    assert_eq!(a[0].content.as_bytes(), b[0].content.as_bytes());
    assert_eq!(a[0].role, Role::User);
    assert_eq!(a[1].content, "vector answer");
    assert_eq!(b[1].content, "graph answer");
}

#[tokio::test]
async fn test_arena_tracks_fail_independently() {
    let tmp = TempDir::new().unwrap();
    let log = open_log(&tmp, LogMode::arena()).await;
    let naive = Scripted::new(BackendTag::NaiveRag, vec![Ok("fine")]);
    let light = Scripted::new(BackendTag::LightRag, vec![Err("server down"), Ok("recovered")]);
    let chat = ChatService::new(log.clone(), backends(vec![naive, light]));

    let arena = chat.answer_arena("s", "question").await.unwrap();
    let failed = arena
        .tracks
        .iter()
        .find(|t| t.backend_tag == BackendTag::LightRag)
        .unwrap();
    assert_eq!(failed.error.as_ref().unwrap().code, "generation_failed");

    assert_eq!(log.persisted_message_count("s", BackendTag::NaiveRag).await.unwrap(), 2);
    assert_eq!(log.persisted_message_count("s", BackendTag::LightRag).await.unwrap(), 0);

    let retried = chat.retry("s", BackendTag::LightRag).await.unwrap();
    assert_eq!(retried.assistant_message.content, "recovered");

    let a = log.load("s", BackendTag::NaiveRag).await.unwrap();
    let b = log.load("s", BackendTag::LightRag).await.unwrap();
    assert_eq!(b.len(), 2);
    assert_eq!(a[0].content, b[0].content);
}

#[tokio::test]
async fn test_arena_refuses_new_message_while_one_track_is_pending() {
    let tmp = TempDir::new().unwrap();
    let log = open_log(&tmp, LogMode::arena()).await;
    let naive = Scripted::new(BackendTag::NaiveRag, vec![Ok("n1"), Ok("n2")]);
    let light = Scripted::new(BackendTag::LightRag, vec![Err("down"), Ok("l1"), Ok("l2")]);
    let chat = ChatService::new(log.clone(), backends(vec![naive, light]));

    chat.answer_arena("s", "first").await.unwrap();
    let err = chat.answer_arena("s", "second").await.unwrap_err();
    assert!(matches!(
        err,
        Error::PendingTurn { tag: BackendTag::LightRag, .. }
    ));
    assert_eq!(err.code(), "pending_turn");
    assert_eq!(log.persisted_message_count("s", BackendTag::NaiveRag).await.unwrap(), 2);
    assert_eq!(log.persisted_message_count("s", BackendTag::LightRag).await.unwrap(), 0);

    chat.retry("s", BackendTag::LightRag).await.unwrap();
    let arena = chat.answer_arena("s", "second").await.unwrap();
    assert!(arena.tracks.iter().all(|t| t.answer.is_some()));

    let user_turns = |messages: Vec<rag_arena::models::StoredMessage>| -> Vec<String> {
        messages
            .into_iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content)
            .collect()
    };
    let a = user_turns(log.load("s", BackendTag::NaiveRag).await.unwrap());
    let b = user_turns(log.load("s", BackendTag::LightRag).await.unwrap());
    assert_eq!(a, vec!["first", "second"]);
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_arena_replaces_turn_pending_on_both_tracks() {
    let tmp = TempDir::new().unwrap();
    let log = open_log(&tmp, LogMode::arena()).await;
    let naive = Scripted::new(BackendTag::NaiveRag, vec![Err("down"), Ok("n")]);
    let light = Scripted::new(BackendTag::LightRag, vec![Err("down"), Ok("l")]);
    let chat = ChatService::new(log.clone(), backends(vec![naive, light]));

    let failed = chat.answer_arena("s", "lost").await.unwrap();
    assert!(failed.tracks.iter().all(|t| t.error.is_some()));
    chat.answer_arena("s", "kept").await.unwrap();

    for tag in BackendTag::ALL {
        let stored = log.load("s", tag).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].content, "kept");
    }
}

#[tokio::test]
async fn test_generation_failure_writes_nothing_and_retry_needs_pending_turn() {
    let tmp = TempDir::new().unwrap();
    let log = open_log(&tmp, LogMode::Single(BackendTag::NaiveRag)).await;
    let naive = Scripted::new(BackendTag::NaiveRag, vec![Ok("first"), Err("timeout")]);
    let chat = ChatService::new(log.clone(), backends(vec![naive.clone()]));

    chat.answer("s", BackendTag::NaiveRag, "one").await.unwrap();
    let err = chat.answer("s", BackendTag::NaiveRag, "two").await.unwrap_err();
    assert!(matches!(err, Error::Generation { tag: BackendTag::NaiveRag, .. }));
    assert_eq!(log.persisted_message_count("s", BackendTag::NaiveRag).await.unwrap(), 2);

    // Script is exhausted, so the retry fails again and still writes nothing.
    assert!(chat.retry("s", BackendTag::NaiveRag).await.is_err());
    assert_eq!(log.persisted_message_count("s", BackendTag::NaiveRag).await.unwrap(), 2);

    let seen = naive.seen.lock().unwrap();
    assert_eq!(seen[1].1, "two");
    assert_eq!(seen[2].1, "two");
    assert_eq!(seen[2].0.len(), 2);
}

#[tokio::test]
async fn test_retry_without_pending_turn() {
    let tmp = TempDir::new().unwrap();
    let log = open_log(&tmp, LogMode::Single(BackendTag::NaiveRag)).await;
    let chat = ChatService::new(
        log,
        backends(vec![Scripted::new(BackendTag::NaiveRag, vec![Ok("a")])]),
    );

    assert!(matches!(
        chat.retry("s", BackendTag::NaiveRag).await.unwrap_err(),
        Error::NothingToRetry { .. }
    ));
    chat.answer("s", BackendTag::NaiveRag, "q").await.unwrap();
    assert!(matches!(
        chat.retry("s", BackendTag::NaiveRag).await.unwrap_err(),
        Error::NothingToRetry { .. }
    ));
}

#[tokio::test]
async fn test_new_message_replaces_pending_turn() {
    let tmp = TempDir::new().unwrap();
    let log = open_log(&tmp, LogMode::Single(BackendTag::NaiveRag)).await;
    let naive = Scripted::new(BackendTag::NaiveRag, vec![Err("down"), Ok("answer")]);
    let chat = ChatService::new(log.clone(), backends(vec![naive]));

    assert!(chat.answer("s", BackendTag::NaiveRag, "lost").await.is_err());
    chat.answer("s", BackendTag::NaiveRag, "kept").await.unwrap();

    let stored = log.load("s", BackendTag::NaiveRag).await.unwrap();
    let contents: Vec<&str> = stored.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["kept", "answer"]);
}

#[tokio::test]
async fn test_history_is_reloaded_from_log() {
    let tmp = TempDir::new().unwrap();
    let log = open_log(&tmp, LogMode::Single(BackendTag::NaiveRag)).await;
    {
        let chat = ChatService::new(
            log.clone(),
            backends(vec![Scripted::new(BackendTag::NaiveRag, vec![Ok("a1")])]),
        );
        chat.answer("s", BackendTag::NaiveRag, "q1").await.unwrap();
    }

    let naive = Scripted::new(BackendTag::NaiveRag, vec![Ok("a2")]);
    let chat = ChatService::new(log.clone(), backends(vec![naive.clone()]));
    chat.answer("s", BackendTag::NaiveRag, "q2").await.unwrap();

    assert_eq!(log.persisted_message_count("s", BackendTag::NaiveRag).await.unwrap(), 4);
    let seen = naive.seen.lock().unwrap();
    assert_eq!(seen[0].0, vec![Message::user("q1"), Message::assistant("a1")]);
}

#[tokio::test]
async fn test_delete_session_clears_both_tracks() {
    let tmp = TempDir::new().unwrap();
    let log = open_log(&tmp, LogMode::arena()).await;
    let chat = ChatService::new(
        log.clone(),
        backends(vec![
            Scripted::new(BackendTag::NaiveRag, vec![Ok("a")]),
            Scripted::new(BackendTag::LightRag, vec![Ok("b")]),
        ]),
    );

    chat.answer_arena("s", "q").await.unwrap();
    assert_eq!(chat.delete_session("s").await.unwrap(), 4);
    for tag in BackendTag::ALL {
        assert_eq!(log.persisted_message_count("s", tag).await.unwrap(), 0);
    }
    assert!(matches!(
        chat.answer("s", BackendTag::NaiveRag, "again").await.unwrap_err(),
        Error::SessionDeleted(_)
    ));
    assert!(matches!(
        chat.load_session("s").await.unwrap_err(),
        Error::SessionNotFound(_)
    ));
}

#[tokio::test]
async fn test_concurrent_sessions_do_not_interleave() {
    let tmp = TempDir::new().unwrap();
    let log = open_log(&tmp, LogMode::Single(BackendTag::NaiveRag)).await;
    let replies = (0..8).map(|_| Ok("ok")).collect();
    let chat = Arc::new(ChatService::new(
        log.clone(),
        backends(vec![Scripted::new(BackendTag::NaiveRag, replies)]),
    ));

    let mut handles = Vec::new();
    for i in 0..8 {
        let chat = chat.clone();
        handles.push(tokio::spawn(async move {
            chat.answer(&format!("s{}", i), BackendTag::NaiveRag, "hi").await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let sessions = log.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 8);
    assert!(sessions.iter().all(|s| s.tracks == vec![(BackendTag::NaiveRag, 2)]));
}
