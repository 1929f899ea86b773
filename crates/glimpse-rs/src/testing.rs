//! Scripted collaborators for unit tests: chat backends, a page source,
//! and a web search.

use crate::content::{CaptureError, PageContent, PageSource};
use crate::error::{ResearchError, Result};
use crate::search::{ItemStatus, SearchItem, SearchOutcome, WebSearch, format_outcome_text};
use crate::session::SessionId;
use crate::{BoxFuture, ChatBackend, PartialSink, Prompt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Which research prompt a request is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PromptKind {
    Intent,
    Plan,
    Merge,
}

impl PromptKind {
    pub(crate) fn of(prompt: &Prompt) -> Self {
        if prompt.system.contains("Guess what they will want to know") {
            PromptKind::Intent
        } else if prompt.system.contains("autonomous researcher") {
            PromptKind::Plan
        } else {
            PromptKind::Merge
        }
    }
}

/// Answers from a fixed queue; streams answers word by word.
pub(crate) struct ScriptedBackend {
    answers: Mutex<VecDeque<Result<String>>>,
    pub(crate) prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedBackend {
    pub(crate) fn new<S: Into<String>>(answers: impl IntoIterator<Item = Result<S>>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().map(|a| a.map(Into::into)).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn next(&self, prompt: &Prompt) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ResearchError::Api("script exhausted".into())))
    }
}

impl ChatBackend for ScriptedBackend {
    fn complete<'a>(
        &'a self,
        prompt: &'a Prompt,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(ResearchError::Cancelled);
            }
            self.next(prompt)
        })
    }

    fn complete_streaming<'a>(
        &'a self,
        prompt: &'a Prompt,
        cancel: &'a CancellationToken,
        on_partial: PartialSink<'a>,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let text = self.complete(prompt, cancel).await?;
            let mut acc = String::new();
            for word in text.split_inclusive(' ') {
                acc.push_str(word);
                on_partial(&acc);
            }
            Ok(text)
        })
    }
}

type Responder = dyn Fn(PromptKind, &Prompt) -> BoxFuture<'static, Result<String>> + Send + Sync;

/// Answers through a closure keyed on the prompt kind. Every call races the
/// cancellation token, like a real transport.
pub(crate) struct FnBackend {
    respond: Box<Responder>,
    pub(crate) calls: Mutex<Vec<PromptKind>>,
}

impl FnBackend {
    pub(crate) fn new(
        respond: impl Fn(PromptKind, &Prompt) -> BoxFuture<'static, Result<String>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn count(&self, kind: PromptKind) -> usize {
        self.calls.lock().unwrap().iter().filter(|k| **k == kind).count()
    }
}

impl ChatBackend for FnBackend {
    fn complete<'a>(
        &'a self,
        prompt: &'a Prompt,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String>> {
        let kind = PromptKind::of(prompt);
        self.calls.lock().unwrap().push(kind);
        let answer = (self.respond)(kind, prompt);
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ResearchError::Cancelled),
                a = answer => a,
            }
        })
    }
}

// ── Pages and search ──

/// Serves one page per session id and counts captures.
#[derive(Default)]
pub(crate) struct Pages {
    pub(crate) pages: Mutex<HashMap<SessionId, PageContent>>,
    pub(crate) captures: AtomicUsize,
}

impl Pages {
    pub(crate) fn with(self, id: &str, location: &str, title: &str) -> Self {
        self.set(id, location, title);
        self
    }

    /// Point `id` at a new page (a navigation).
    pub(crate) fn set(&self, id: &str, location: &str, title: &str) {
        self.pages.lock().unwrap().insert(
            SessionId::from(id),
            PageContent {
                content: format!("Body of {title}"),
                title: title.into(),
                description: String::new(),
                location: location.into(),
            },
        );
    }
}

impl PageSource for Pages {
    fn location<'a>(
        &'a self,
        id: &'a SessionId,
    ) -> BoxFuture<'a, std::result::Result<String, CaptureError>> {
        Box::pin(async move {
            self.pages
                .lock()
                .unwrap()
                .get(id)
                .map(|p| p.location.clone())
                .ok_or(CaptureError::NotFound)
        })
    }

    fn capture<'a>(
        &'a self,
        id: &'a SessionId,
    ) -> BoxFuture<'a, std::result::Result<PageContent, CaptureError>> {
        Box::pin(async move {
            self.captures.fetch_add(1, Ordering::SeqCst);
            self.pages
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or(CaptureError::NotFound)
        })
    }
}

/// Every query yields a shared source, a per-query source, and a skipped
/// download. With a gate set, each call waits for a permit (or cancellation).
#[derive(Default)]
pub(crate) struct Web {
    pub(crate) queries: Mutex<Vec<String>>,
    pub(crate) gate: Option<Arc<Notify>>,
    pub(crate) entered: Arc<Notify>,
}

impl WebSearch for Web {
    fn search<'a>(
        &'a self,
        query: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<SearchOutcome>> {
        Box::pin(async move {
            self.queries.lock().unwrap().push(query.to_string());
            self.entered.notify_one();
            if let Some(gate) = &self.gate {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ResearchError::Cancelled),
                    _ = gate.notified() => {}
                }
            }
            let items = vec![
                SearchItem {
                    title: "Shared".into(),
                    url: "https://shared.test/".into(),
                    status: ItemStatus::Scraped("shared text".into()),
                },
                SearchItem {
                    title: format!("About {query}"),
                    url: format!("https://{}.test/", query.replace(' ', "-")),
                    status: ItemStatus::Scraped(format!("text for {query}")),
                },
                SearchItem {
                    title: "Report".into(),
                    url: "https://files.test/report.pdf".into(),
                    status: ItemStatus::Skipped("downloadable".into()),
                },
            ];
            Ok(SearchOutcome {
                query: query.to_string(),
                text: format_outcome_text(query, &items),
                items,
            })
        })
    }
}

pub(crate) fn ready(answer: impl Into<String>) -> BoxFuture<'static, Result<String>> {
    let answer = answer.into();
    Box::pin(async move { Ok(answer) })
}

/// Intent with a pending query; planner always wants one more search;
/// merges report the prompt size.
pub(crate) fn eager_backend() -> FnBackend {
    FnBackend::new(|kind, prompt| match kind {
        PromptKind::Intent => ready(r#"{"intent": "learn tokio", "query": "tokio basics"}"#),
        PromptKind::Plan => {
            let n = prompt.user.matches("tokio").count();
            ready(format!(r#"{{"shouldSearch": true, "query": "tokio topic {n}"}}"#))
        }
        PromptKind::Merge => ready(format!("summary after merge of {} chars", prompt.user.len())),
    })
}
