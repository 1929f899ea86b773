//! Progress events emitted by the [`Orchestrator`](super::orchestrator::Orchestrator).
//!
//! Observers see every state transition a session goes through, so a UI can
//! render the streaming summary and status line without polling. Events are
//! only emitted for changes that were actually committed; a stale loop never
//! produces events.
//!
//! | Observer | Use case |
//! |----------|----------|
//! | [`NoopObserver`] | Tests or headless runs |
//! | [`LoggingObserver`] | Structured logging via `tracing` |
//! | [`FnObserver`] | Quick closures |
//! | [`CompositeObserver`] | Several observers in order |

use super::{SessionId, SessionStatus};
use tracing::{debug, info, trace, warn};

// ── Events ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ResearchEvent<'a> {
    /// Status line changed.
    Status {
        id: &'a SessionId,
        status: SessionStatus,
        message: &'a str,
    },
    /// Intent inference finished.
    IntentInferred {
        id: &'a SessionId,
        intent: &'a str,
        query: Option<&'a str>,
    },
    /// A search is about to run.
    SearchStarted {
        id: &'a SessionId,
        query: &'a str,
        number: u32,
        max: u32,
    },
    /// A search finished and was recorded.
    SearchCompleted {
        id: &'a SessionId,
        query: &'a str,
        scraped: usize,
        skipped: usize,
        failed: usize,
    },
    /// New sources were added to the reference list.
    ReferencesAdded {
        id: &'a SessionId,
        added: usize,
        total: usize,
    },
    /// Accumulated summary text while the summarizer streams.
    SummaryPartial { id: &'a SessionId, text: &'a str },
    /// The merged summary was committed.
    SummaryUpdated { id: &'a SessionId, summary: &'a str },
    /// The planner decided no further search is needed.
    Completed { id: &'a SessionId, searches: u32 },
    /// The search cap stopped the loop.
    CapReached { id: &'a SessionId, max: u32 },
    /// The page cannot be analyzed.
    NotAnalyzable { id: &'a SessionId, message: &'a str },
    /// The loop failed.
    Failed { id: &'a SessionId, error: &'a str },
    /// The session was paused by focus moving elsewhere.
    Interrupted { id: &'a SessionId },
    /// The session was reset (navigation).
    Reset { id: &'a SessionId },
    /// The session was destroyed (page closed).
    Destroyed { id: &'a SessionId },
}

impl ResearchEvent<'_> {
    /// The session the event belongs to.
    pub fn session_id(&self) -> &SessionId {
        match self {
            ResearchEvent::Status { id, .. }
            | ResearchEvent::IntentInferred { id, .. }
            | ResearchEvent::SearchStarted { id, .. }
            | ResearchEvent::SearchCompleted { id, .. }
            | ResearchEvent::ReferencesAdded { id, .. }
            | ResearchEvent::SummaryPartial { id, .. }
            | ResearchEvent::SummaryUpdated { id, .. }
            | ResearchEvent::Completed { id, .. }
            | ResearchEvent::CapReached { id, .. }
            | ResearchEvent::NotAnalyzable { id, .. }
            | ResearchEvent::Failed { id, .. }
            | ResearchEvent::Interrupted { id }
            | ResearchEvent::Reset { id }
            | ResearchEvent::Destroyed { id } => *id,
        }
    }
}

// ── Observers ──────────────────────────────────────────────────────

/// Receives research events. Called synchronously from the loop; keep it
/// cheap and never block.
pub trait ResearchObserver: Send + Sync {
    fn on_event(&self, event: &ResearchEvent<'_>) {
        let _ = event;
    }
}

pub struct NoopObserver;
impl ResearchObserver for NoopObserver {}

/// An observer backed by a closure.
///
/// ```ignore
/// let observer = FnObserver::new(|event| {
///     if let ResearchEvent::SummaryPartial { text, .. } = event {
///         eprint!("\r{text}");
///     }
/// });
/// ```
pub struct FnObserver<F>(F)
where
    F: Fn(&ResearchEvent<'_>) + Send + Sync;

impl<F> FnObserver<F>
where
    F: Fn(&ResearchEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ResearchObserver for FnObserver<F>
where
    F: Fn(&ResearchEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &ResearchEvent<'_>) {
        (self.0)(event);
    }
}

/// Dispatches to several observers in registration order.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Box<dyn ResearchObserver>>,
}

impl CompositeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: impl ResearchObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Add an observer only when `condition` holds.
    pub fn with_if(self, condition: bool, observer: impl ResearchObserver + 'static) -> Self {
        if condition { self.with(observer) } else { self }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl ResearchObserver for CompositeObserver {
    fn on_event(&self, event: &ResearchEvent<'_>) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

/// Logs events via `tracing`.
pub struct LoggingObserver;

impl ResearchObserver for LoggingObserver {
    fn on_event(&self, event: &ResearchEvent<'_>) {
        match event {
            ResearchEvent::Status {
                id,
                status,
                message,
            } => {
                debug!("[{id}] {status:?}: {message}");
            }
            ResearchEvent::IntentInferred { id, intent, query } => {
                info!("[{id}] Intent: {intent}");
                if let Some(query) = query {
                    debug!("[{id}] Suggested first query: {query}");
                }
            }
            ResearchEvent::SearchStarted {
                id,
                query,
                number,
                max,
            } => {
                info!("[{id}] Search {number}/{max}: {query}");
            }
            ResearchEvent::SearchCompleted {
                id,
                query,
                scraped,
                skipped,
                failed,
            } => {
                debug!(
                    "[{id}] Search '{query}' done: {scraped} scraped, {skipped} skipped, {failed} failed"
                );
            }
            ResearchEvent::ReferencesAdded { id, added, total } => {
                debug!("[{id}] {added} new reference(s), {total} total");
            }
            ResearchEvent::SummaryPartial { id, text } => {
                trace!("[{id}] Summary partial: {} chars", text.len());
            }
            ResearchEvent::SummaryUpdated { id, summary } => {
                let preview: String = summary.chars().take(200).collect();
                debug!(
                    "[{id}] Summary updated: {preview}{}",
                    if summary.chars().count() > 200 { "..." } else { "" }
                );
            }
            ResearchEvent::Completed { id, searches } => {
                info!("[{id}] Research complete after {searches} search(es)");
            }
            ResearchEvent::CapReached { id, max } => {
                info!("[{id}] Search cap reached ({max})");
            }
            ResearchEvent::NotAnalyzable { id, message } => {
                info!("[{id}] {message}");
            }
            ResearchEvent::Failed { id, error } => {
                warn!("[{id}] Research failed: {error}");
            }
            ResearchEvent::Interrupted { id } => {
                debug!("[{id}] Interrupted");
            }
            ResearchEvent::Reset { id } => {
                debug!("[{id}] Reset");
            }
            ResearchEvent::Destroyed { id } => {
                debug!("[{id}] Destroyed");
            }
        }
    }
}
