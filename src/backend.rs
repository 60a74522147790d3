//! Retrieval backends compared in arena mode.
//!
//! Both backends take the working history *before* the new user turn plus
//! the new user text, and return one assistant reply:
//!
//! - [`NaiveRagBackend`] (NaiveRAG): similarity search over the fragment
//!   index, template fill, history window, local generator.
//! - [`LightRagBackend`] (LightRAG): delegates retrieval and generation to
//!   a LightRAG server over HTTP, passing the windowed history along.
//!
//! Every call is bounded by a timeout. A reply only exists once the
//! backend has fully returned; nothing partial is handed back.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LightRagConfig;
use crate::context::ContextAssembler;
use crate::generate::{split_reasoning, Generator};
use crate::history::window;
use crate::models::{BackendTag, Message, ScoredFragment};

#[derive(Debug, Clone, Serialize)]
pub struct BackendReply {
    /// Fragments the reply was grounded on. Empty for LightRAG, which
    /// does not expose its retrieval set.
    pub context_fragments: Vec<ScoredFragment>,
    pub content: String,
    pub reasoning: Vec<String>,
}

#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    fn tag(&self) -> BackendTag;

    async fn respond(&self, history: &[Message], user_message: &str) -> Result<BackendReply>;
}

pub struct NaiveRagBackend {
    assembler: Arc<ContextAssembler>,
    generator: Arc<dyn Generator>,
    top_k: usize,
    history_turns: usize,
    timeout: Duration,
}

impl NaiveRagBackend {
    pub fn new(
        assembler: Arc<ContextAssembler>,
        generator: Arc<dyn Generator>,
        top_k: usize,
        history_turns: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            assembler,
            generator,
            top_k,
            history_turns,
            timeout,
        }
    }
}

#[async_trait]
impl RetrievalBackend for NaiveRagBackend {
    fn tag(&self) -> BackendTag {
        BackendTag::NaiveRag
    }

    async fn respond(&self, history: &[Message], user_message: &str) -> Result<BackendReply> {
        let ctx = self.assembler.assemble(user_message, self.top_k).await?;
        let messages = window(history, &ctx.prompt, self.history_turns);

        tracing::debug!(
            fragments = ctx.fragments.len(),
            messages = messages.len(),
            model = self.generator.model_name(),
            "generating naive rag reply"
        );

        let raw = match tokio::time::timeout(self.timeout, self.generator.generate(&messages)).await {
            Ok(reply) => reply?,
            Err(_) => bail!("generation timed out after {:?}", self.timeout),
        };

        let (content, reasoning) = split_reasoning(&raw);
        Ok(BackendReply {
            context_fragments: ctx.fragments,
            content,
            reasoning,
        })
    }
}

pub struct LightRagBackend {
    url: String,
    mode: String,
    history_turns: usize,
    client: reqwest::Client,
}

impl LightRagBackend {
    pub fn new(config: &LightRagConfig, history_turns: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            mode: config.mode.clone(),
            history_turns,
            client,
        })
    }
}

#[async_trait]
impl RetrievalBackend for LightRagBackend {
    fn tag(&self) -> BackendTag {
        BackendTag::LightRag
    }

    async fn respond(&self, history: &[Message], user_message: &str) -> Result<BackendReply> {
        let mut windowed = window(history, user_message, self.history_turns);
        // The query travels separately from the conversation history.
        windowed.pop();

        let body = serde_json::json!({
            "query": user_message,
            "mode": self.mode,
            "conversation_history": windowed,
        });

        let response = self
            .client
            .post(format!("{}/query", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("LightRAG request timed out: {}", e)
                } else {
                    anyhow::anyhow!("LightRAG connection error (is it running at {}?): {}", self.url, e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("LightRAG API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let raw = parse_query_response(&json)?;
        let (content, reasoning) = split_reasoning(&raw);
        Ok(BackendReply {
            context_fragments: Vec::new(),
            content,
            reasoning,
        })
    }
}

fn parse_query_response(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid LightRAG response: missing response field"))
}
