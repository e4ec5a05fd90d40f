//! OpenAI-compatible chat-completions client used for note generation and
//! grounded question answering.

use async_trait::async_trait;
use pagenotes_core::config::RemoteConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chat::{Answerer, ChatMessage, Role};
use crate::pipeline::{GenerationFailure, TextGenerator};

const ANSWER_TEMPERATURE: f32 = 0.5;
const ANSWER_MAX_TOKENS: u32 = 1000;
const MAX_ERROR_BODY_CHARS: usize = 200;

pub const ANSWER_PROMPT: &str = "You answer questions about a document in the simplest language \
possible. Use the reference text below; if the answer is not in it, say so before using general \
knowledge. Format answers as HTML bullet lists (<ul><li>) with <strong> for key terms, give a short \
example for every concept you explain, and never leave out relevant details from the reference.";

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct RemoteClient {
    http: reqwest::Client,
    config: RemoteConfig,
}

impl RemoteClient {
    /// Returns `None` when no credential is configured.
    pub fn new(config: RemoteConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        Some(Self {
            http: reqwest::Client::new(),
            config,
        })
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, GenerationFailure> {
        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        let request = CompletionRequest {
            model,
            messages,
            temperature,
            max_tokens,
        };
        debug!(model, messages = messages.len(), "sending completion request");

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationFailure::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let payload: CompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerationFailure::Malformed(e.to_string()))?;
        extract_content(payload)
    }
}

fn extract_content(payload: CompletionResponse) -> Result<String, GenerationFailure> {
    payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| GenerationFailure::Malformed("response contained no message".to_string()))
}

pub fn notes_messages(prompt: &str, source_text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::new(Role::System, prompt),
        ChatMessage::new(
            Role::User,
            format!("Please convert this text into well-formatted notes:\n\n{source_text}"),
        ),
    ]
}

pub fn answer_messages(question: &str, grounding: &str, history: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::new(
        Role::System,
        format!("{ANSWER_PROMPT}\n\nReference text:\n{grounding}"),
    ));
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::new(Role::User, question.trim()));
    messages
}

#[async_trait]
impl TextGenerator for RemoteClient {
    async fn generate(
        &self,
        prompt: &str,
        source_text: &str,
    ) -> Result<String, GenerationFailure> {
        let messages = notes_messages(prompt, source_text);
        self.complete(
            &self.config.notes_model,
            &messages,
            self.config.temperature,
            self.config.max_tokens,
        )
        .await
    }
}

#[async_trait]
impl Answerer for RemoteClient {
    async fn answer(
        &self,
        question: &str,
        grounding: &str,
        history: &[ChatMessage],
    ) -> Result<String, GenerationFailure> {
        let messages = answer_messages(question, grounding, history);
        self.complete(
            &self.config.answer_model,
            &messages,
            ANSWER_TEMPERATURE,
            ANSWER_MAX_TOKENS,
        )
        .await
    }
}
