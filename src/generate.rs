//! Generative backends for the naive RAG track.
//!
//! A [`Generator`] turns a windowed chat history into one assistant reply.
//! Providers:
//! - **[`DisabledGenerator`]**: always errors; the default until `[generation]` is set.
//! - **[`EchoGenerator`]**: replies with the last user message; offline and deterministic.
//! - **[`OllamaGenerator`]**: `POST /api/chat` on a local Ollama, non-streaming.
//!
//! Reasoning models wrap their chain of thought in `<think>` blocks.
//! [`split_reasoning`] separates those from the answer so the log only
//! stores what the user should see.

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::models::{Message, Role};

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce the assistant reply for `messages`. The last message is the user turn.
    async fn generate(&self, messages: &[Message]) -> Result<String>;
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "echo" => Ok(Arc::new(EchoGenerator)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _messages: &[Message]) -> Result<String> {
        bail!("Generation provider is disabled. Set [generation] provider in config.")
    }
}

pub struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, messages: &[Message]) -> Result<String> {
        let last = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .ok_or_else(|| anyhow::anyhow!("No user message to answer"))?;
        Ok(last.content.clone())
    }
}

pub struct OllamaGenerator {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            url: config.url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[Message]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
}

fn think_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("think regex must compile"))
}

/// Split `<think>` blocks out of a reply.
///
/// Returns the answer with every block removed, plus the trimmed content
/// of each block in order. Empty blocks are dropped.
pub fn split_reasoning(reply: &str) -> (String, Vec<String>) {
    let re = think_block();
    let reasoning = re
        .captures_iter(reply)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let answer = re.replace_all(reply, "").trim().to_string();
    (answer, reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_reasoning() {
        let (answer, reasoning) =
            split_reasoning("<think>\nthe user wants x\n</think>\n\nThe answer is x.");
        assert_eq!(answer, "The answer is x.");
        assert_eq!(reasoning, vec!["the user wants x".to_string()]);
    }

    #[test]
    fn test_split_reasoning_without_blocks() {
        let (answer, reasoning) = split_reasoning("  plain  ");
        assert_eq!(answer, "plain");
        assert!(reasoning.is_empty());
    }

    #[test]
    fn test_split_reasoning_multiple_blocks() {
        let (answer, reasoning) = split_reasoning("<think>a</think>one <think></think>two");
        assert_eq!(answer, "one two");
        assert_eq!(reasoning, vec!["a".to_string()]);
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({"message": {"role": "assistant", "content": "hi"}, "done": true});
        assert_eq!(parse_chat_response(&json).unwrap(), "hi");
        assert!(parse_chat_response(&serde_json::json!({"done": true})).is_err());
    }

    #[tokio::test]
    async fn test_echo_generator_answers_last_user_turn() {
        let out = EchoGenerator
            .generate(&[
                Message::user("first"),
                Message::assistant("reply"),
                Message::user("second"),
            ])
            .await
            .unwrap();
        assert_eq!(out, "second");
    }

    #[tokio::test]
    async fn test_disabled_generator_errors() {
        assert!(DisabledGenerator.generate(&[Message::user("q")]).await.is_err());
    }

    #[test]
    fn test_create_generator_by_provider() {
        let mut config = GenerationConfig::default();
        assert_eq!(create_generator(&config).unwrap().model_name(), "disabled");
        config.provider = "echo".into();
        assert_eq!(create_generator(&config).unwrap().model_name(), "echo");
        config.provider = "ollama".into();
        assert!(create_generator(&config).is_err());
    }
}
