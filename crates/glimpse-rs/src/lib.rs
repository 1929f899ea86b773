//! Per-page research orchestrator: infer what the reader wants to know, then
//! search, scrape, and keep a running summary up to date.
//!
//! `glimpse-rs` watches "observed pages" (browser tabs, documents, anything
//! with a location and visible text). For each page it keeps one research
//! [`Session`](session::Session) and drives a loop on top of any
//! OpenAI-compatible chat completions endpoint:
//!
//! 1. fetch the page through a [`ContentProvider`](content::ContentProvider),
//! 2. infer the reader's intent,
//! 3. plan the next web search,
//! 4. run it through the [`SearchExecutor`](search::SearchExecutor)
//!    (results page → admission filter → bounded parallel scrape),
//! 5. fold the new material into the running summary,
//!
//! until the planner says "enough" or the search cap is reached. Navigating,
//! switching, or closing a page cancels in-flight work without letting stale
//! results leak back into the session.
//!
//! # Getting started
//!
//! ```ignore
//! use glimpse_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ResearchError> {
//!     let config = ResearchConfig::default().with_model("qwen3-8b");
//!     let pages = HttpPageSource::new(&config)?;
//!     pages.set_location(&SessionId::from("tab-1"), "https://example.com/article");
//!
//!     let orchestrator = Orchestrator::builder(config)
//!         .with_page_source(pages)
//!         .with_observer(LoggingObserver)
//!         .build()?;
//!
//!     let outcome = orchestrator
//!         .run(&SessionId::from("tab-1"), Some("https://example.com/article".into()))
//!         .await;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **The state machine:** [`session::orchestrator::Orchestrator`] with
//!   `start` / `reset` / `interrupt` / `destroy`, and
//!   [`session::focus::FocusController`] for tab-style event wiring.
//! - **Observing progress:** implement
//!   [`ResearchObserver`](session::events::ResearchObserver), or use
//!   [`LoggingObserver`](session::events::LoggingObserver).
//! - **Model calls:** [`ChatBackend`] is the seam; [`ChatClient`] is the HTTP
//!   implementation. Streaming lives in [`api::streaming`].
//! - **Web search:** [`search`] with its admission filter, render contexts,
//!   and results-page parsing.
//! - **Prompts and structured output:** [`agent`].

pub mod agent;
pub mod api;
pub mod config;
pub mod content;
pub mod error;
pub mod prelude;
pub mod search;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

use crate::api::reasoning::ReasoningFilter;
use crate::config::ResearchConfig;
use crate::error::{ResearchError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

/// Default OpenAI-compatible endpoint (LM Studio's local server).
pub const DEFAULT_BASE_URL: &str = "http://localhost:1234/v1";

/// Default model identifier understood by local servers.
pub const DEFAULT_MODEL: &str = "local-model";

/// Bearer token sent when no API key is configured.
pub const DEFAULT_API_KEY: &str = "lm-studio";

const COMPLETIONS_PATH: &str = "/chat/completions";

/// Boxed future used by the crate's dyn-compatible async traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Callback receiving the accumulated, reasoning-stripped text of a
/// streaming response after every chunk.
pub type PartialSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` for a type that implements
/// `schemars::JsonSchema`. Used to show the model the exact shape a
/// JSON-only answer must take.
///
/// ```
/// use glimpse_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct Guess {
///     intent: String,
/// }
///
/// let schema = json_schema_for::<Guess>();
/// assert_eq!(schema["type"], "object");
/// ```
pub fn json_schema_for<T: schemars::JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A chat message.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

// ── Prompt types ───────────────────────────────────────────────────

/// How the model is expected to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// A single JSON object and nothing else.
    Json,
    /// Free text (markdown allowed).
    Text,
}

/// A one-shot system + user prompt.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub mode: ResponseMode,
}

impl Prompt {
    pub fn json(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            mode: ResponseMode::Json,
        }
    }

    pub fn text(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            mode: ResponseMode::Text,
        }
    }

    fn messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }
}

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body for an OpenAI-compatible endpoint.
#[derive(Serialize, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

/// JSON output format type.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ResponseFormatType {
    #[serde(rename = "json_object")]
    JsonObject,
}

/// JSON output mode.
#[derive(Serialize, Debug)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub fmt_type: ResponseFormatType,
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

/// `error` may be an object with a `message` or a bare string depending on
/// the server.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ApiErrorBody {
    Object { message: String },
    Text(String),
}

impl ApiErrorBody {
    fn message(self) -> String {
        match self {
            ApiErrorBody::Object { message } | ApiErrorBody::Text(message) => message,
        }
    }
}

#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    error: Option<ApiErrorBody>,
}

/// Build the user-facing message for a non-2xx response: the backend's
/// structured `error.message` when present, else the status text.
pub(crate) fn api_error_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error)
        .map(ApiErrorBody::message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string())
        })
}

// ── Backend seam ───────────────────────────────────────────────────

/// A chat-completion capability.
///
/// Every planner, summarizer, and intent call goes through this trait, so
/// tests can script answers and callers can swap transports. Implementations
/// must strip the reasoning preamble and honor the cancellation token.
pub trait ChatBackend: Send + Sync {
    /// Run a prompt to completion and return the cleaned answer.
    fn complete<'a>(
        &'a self,
        prompt: &'a Prompt,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String>>;

    /// Run a prompt, pushing the accumulated cleaned text to `on_partial`
    /// while it is produced. Backends without streaming deliver the final
    /// text once.
    fn complete_streaming<'a>(
        &'a self,
        prompt: &'a Prompt,
        cancel: &'a CancellationToken,
        on_partial: PartialSink<'a>,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let text = self.complete(prompt, cancel).await?;
            on_partial(&text);
            Ok(text)
        })
    }
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for an OpenAI-compatible chat completions endpoint.
pub struct ChatClient {
    pub(crate) client: reqwest::Client,
    pub(crate) endpoint: String,
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) filter: ReasoningFilter,
    pub(crate) streaming: bool,
    pub(crate) json_response_format: bool,
    pub(crate) temperature: Option<f32>,
}

impl ChatClient {
    /// Create a client with default settings for the given endpoint.
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let config = ResearchConfig {
            base_url: base_url.to_string(),
            api_key: Some(api_key.into()),
            model: model.into(),
            ..Default::default()
        };
        Self::from_config(&config)
    }

    /// Create a client from a [`ResearchConfig`].
    pub fn from_config(config: &ResearchConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(ResearchError::Config("base URL is not set".into()));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("glimpse-rs/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ResearchError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: completions_endpoint(&config.base_url),
            api_key: config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| DEFAULT_API_KEY.to_string()),
            model: config.model.clone(),
            filter: config.reasoning.clone(),
            streaming: config.streaming,
            json_response_format: config.json_response_format,
            temperature: config.temperature,
        })
    }

    /// The resolved `…/chat/completions` URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) fn request_body(&self, prompt: &Prompt, stream: bool) -> ChatRequest {
        let response_format = (self.json_response_format && prompt.mode == ResponseMode::Json)
            .then_some(ResponseFormat {
                fmt_type: ResponseFormatType::JsonObject,
            });
        ChatRequest {
            model: self.model.clone(),
            messages: prompt.messages(),
            stream,
            temperature: self.temperature,
            max_tokens: None,
            response_format,
        }
    }

    /// Send a non-streaming chat completion request.
    pub async fn chat(&self, prompt: &Prompt, cancel: &CancellationToken) -> Result<String> {
        let body = self.request_body(prompt, false);
        debug!(
            "LLM request: model={}, mode={:?}, system={} chars, user={} chars",
            body.model,
            prompt.mode,
            prompt.system.len(),
            prompt.user.len(),
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(&body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let send = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(ResearchError::Cancelled),
            r = send => r?,
        };

        let status = resp.status();
        let text = tokio::select! {
            _ = cancel.cancelled() => return Err(ResearchError::Cancelled),
            t = resp.text() => t.map_err(|e| ResearchError::Transport(format!("failed to read response: {e}")))?,
        };

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(ResearchError::Api(api_error_message(status, &text)));
        }

        let parsed: RawChatResponse = serde_json::from_str(&text)
            .map_err(|e| ResearchError::Transport(format!("failed to parse response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(ResearchError::Api(err.message()));
        }

        let content = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content)
            .ok_or_else(|| ResearchError::Api("response contained no choices".into()))?;

        Ok(self.filter.strip(&content))
    }
}

impl ChatBackend for ChatClient {
    fn complete<'a>(
        &'a self,
        prompt: &'a Prompt,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.chat(prompt, cancel))
    }

    fn complete_streaming<'a>(
        &'a self,
        prompt: &'a Prompt,
        cancel: &'a CancellationToken,
        on_partial: PartialSink<'a>,
    ) -> BoxFuture<'a, Result<String>> {
        if self.streaming {
            Box::pin(self.chat_stream(prompt, cancel, on_partial))
        } else {
            Box::pin(async move {
                let text = self.chat(prompt, cancel).await?;
                on_partial(&text);
                Ok(text)
            })
        }
    }
}

/// Append `/chat/completions` to a base URL unless it is already there.
pub fn completions_endpoint(base_url: &str) -> String {
    let base = base_url.trim();
    if base.ends_with(COMPLETIONS_PATH) {
        return base.to_string();
    }
    format!("{}{COMPLETIONS_PATH}", base.trim_end_matches('/'))
}
