//! The research loop and the session lifecycle around it.
//!
//! [`Orchestrator`] owns the [`SessionStore`] and every collaborator the loop
//! needs. One loop per session:
//!
//! 1. If the session has no intent yet: fetch the page, infer the intent.
//! 2. Until the planner says stop or the search cap is reached: pick the
//!    next query (pending query from intent inference, else the intent
//!    itself for the very first search, else ask the planner), search,
//!    record history and references, merge the results into the summary.
//!
//! Every write goes through [`SessionStore::commit`] with the loop's
//! [`RunTicket`], so a loop whose session was reset, interrupted, or
//! destroyed can finish its network call but never writes its result.

use crate::agent::{intent, planner, summarizer};
use crate::config::ResearchConfig;
use crate::content::{ContentProvider, PageSource};
use crate::error::{ResearchError, Result};
use crate::search::{
    ContentTypeProbe, HttpContentTypeProbe, HttpRenderer, Renderer, SearchExecutor, WebSearch,
};
use crate::session::events::{CompositeObserver, ResearchEvent, ResearchObserver};
use crate::session::pacing::{SearchPacer, pacer_for};
use crate::session::store::{Claim, RunTicket, SessionStore};
use crate::session::{Session, SessionId, SessionStatus};
use crate::{ChatBackend, ChatClient};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How a call to [`Orchestrator::run`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The planner decided no further search was needed.
    Completed,
    /// The search cap stopped the loop.
    CapReached,
    /// The page cannot be analyzed; reported quietly.
    NotAnalyzable,
    /// The loop failed; the session shows the error.
    Failed(String),
    /// The session was interrupted while the loop ran.
    Cancelled,
    /// The session was reset or destroyed while the loop ran.
    Stale,
    /// Another loop already owns the session.
    AlreadyRunning,
}

/// Why the loop stopped without finishing.
enum Halt {
    /// A commit was refused: the ticket no longer owns the session.
    Stale,
    Failed(ResearchError),
}

impl From<ResearchError> for Halt {
    fn from(e: ResearchError) -> Self {
        Halt::Failed(e)
    }
}

enum Finish {
    Completed,
    CapReached,
}

// ── Builder ────────────────────────────────────────────────────────

/// Builder for [`Orchestrator`].
///
/// Only the page source is required. The chat backend defaults to a
/// [`ChatClient`] for the configured endpoint, search to a
/// [`SearchExecutor`] over [`HttpRenderer`] and [`HttpContentTypeProbe`],
/// pacing to the configured rate limit.
pub struct OrchestratorBuilder {
    config: ResearchConfig,
    backend: Option<Arc<dyn ChatBackend>>,
    page_source: Option<Arc<dyn PageSource>>,
    content: Option<ContentProvider>,
    renderer: Option<Arc<dyn Renderer>>,
    probe: Option<Arc<dyn ContentTypeProbe>>,
    search: Option<Arc<dyn WebSearch>>,
    pacer: Option<Arc<dyn SearchPacer>>,
    observer: CompositeObserver,
}

impl OrchestratorBuilder {
    pub fn with_backend(self, backend: impl ChatBackend + 'static) -> Self {
        self.with_shared_backend(Arc::new(backend))
    }

    pub fn with_shared_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_page_source(self, source: impl PageSource + 'static) -> Self {
        self.with_shared_page_source(Arc::new(source))
    }

    /// Use a page source the caller keeps a handle to.
    pub fn with_shared_page_source(mut self, source: Arc<dyn PageSource>) -> Self {
        self.page_source = Some(source);
        self
    }

    /// Use a fully configured content provider (custom retry policy).
    pub fn with_content_provider(mut self, content: ContentProvider) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    pub fn with_probe(mut self, probe: impl ContentTypeProbe + 'static) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    /// Replace the whole search step.
    pub fn with_search(mut self, search: impl WebSearch + 'static) -> Self {
        self.search = Some(Arc::new(search));
        self
    }

    pub fn with_pacer(mut self, pacer: impl SearchPacer + 'static) -> Self {
        self.pacer = Some(Arc::new(pacer));
        self
    }

    /// Add an observer. Observers are called in registration order.
    pub fn with_observer(mut self, observer: impl ResearchObserver + 'static) -> Self {
        self.observer = self.observer.with(observer);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let config = self.config;
        config.validate()?;

        let content = match (self.content, self.page_source) {
            (Some(content), _) => content,
            (None, Some(source)) => ContentProvider::new(source, &config),
            (None, None) => {
                return Err(ResearchError::Config("no page source configured".into()));
            }
        };
        let backend: Arc<dyn ChatBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(ChatClient::from_config(&config)?),
        };
        let search: Arc<dyn WebSearch> = match self.search {
            Some(search) => search,
            None => {
                let renderer: Arc<dyn Renderer> = match self.renderer {
                    Some(r) => r,
                    None => Arc::new(HttpRenderer::new()?),
                };
                let probe: Arc<dyn ContentTypeProbe> = match self.probe {
                    Some(p) => p,
                    None => Arc::new(HttpContentTypeProbe::from_config(&config)?),
                };
                Arc::new(SearchExecutor::new(&config, renderer, probe))
            }
        };
        let pacer: Arc<dyn SearchPacer> = self
            .pacer
            .unwrap_or_else(|| Arc::from(pacer_for(config.rate_limit.as_ref())));

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                config,
                store: SessionStore::new(),
                backend,
                content,
                search,
                pacer,
                observer: self.observer,
            }),
        })
    }
}

// ── Orchestrator ───────────────────────────────────────────────────

/// Owns every research session. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: ResearchConfig,
    store: SessionStore,
    backend: Arc<dyn ChatBackend>,
    content: ContentProvider,
    search: Arc<dyn WebSearch>,
    pacer: Arc<dyn SearchPacer>,
    observer: CompositeObserver,
}

impl Orchestrator {
    pub fn builder(config: ResearchConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            backend: None,
            page_source: None,
            content: None,
            renderer: None,
            probe: None,
            search: None,
            pacer: None,
            observer: CompositeObserver::new(),
        }
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    /// Start (or resume) the loop for `id` on the runtime.
    pub fn start(&self, id: &SessionId, expected_location: Option<String>) -> JoinHandle<RunOutcome> {
        let this = self.clone();
        let id = id.clone();
        tokio::spawn(async move { this.run(&id, expected_location).await })
    }

    /// Run the loop for `id` to completion on the current task.
    ///
    /// Creates the session if missing. Returns
    /// [`RunOutcome::AlreadyRunning`] without doing anything when a live loop
    /// owns the session. A session with an intent resumes without
    /// refetching the page.
    pub async fn run(&self, id: &SessionId, expected_location: Option<String>) -> RunOutcome {
        let ticket = match self.inner.store.claim(id) {
            Claim::Granted(ticket) => ticket,
            Claim::Busy => {
                debug!("[{id}] Loop already running");
                return RunOutcome::AlreadyRunning;
            }
        };
        debug!(
            "[{id}] Loop started (generation {}, run {})",
            ticket.generation, ticket.run_id
        );
        let result = self.inner.research(&ticket, expected_location.as_deref()).await;
        let outcome = self.inner.finish(&ticket, result);
        self.inner.store.release(&ticket);
        debug!("[{id}] Loop ended: {outcome:?}");
        outcome
    }

    /// Discard everything learned for `id` (the page navigated). Any running
    /// loop becomes stale.
    pub fn reset(&self, id: &SessionId) {
        self.inner.store.reset(id);
        self.inner.emit(&ResearchEvent::Reset { id });
    }

    /// Pause `id`, keeping what it has learned. Returns `false` for unknown
    /// ids.
    pub fn interrupt(&self, id: &SessionId) -> bool {
        let known = self.inner.store.interrupt(id);
        if known {
            self.inner.emit(&ResearchEvent::Interrupted { id });
        }
        known
    }

    /// Drop `id` (the page closed). Any running loop becomes stale.
    pub fn destroy(&self, id: &SessionId) -> bool {
        let removed = self.inner.store.remove(id).is_some();
        if removed {
            self.inner.emit(&ResearchEvent::Destroyed { id });
        }
        removed
    }

    pub fn snapshot(&self, id: &SessionId) -> Option<Session> {
        self.inner.store.snapshot(id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.store.ids()
    }

    /// Whether a live loop currently owns `id`.
    pub fn is_running(&self, id: &SessionId) -> bool {
        self.inner
            .store
            .snapshot(id)
            .is_some_and(|s| s.is_running())
    }
}

impl Inner {
    fn emit(&self, event: &ResearchEvent<'_>) {
        self.observer.on_event(event);
    }

    fn commit<R>(&self, ticket: &RunTicket, f: impl FnOnce(&mut Session) -> R) -> Result<R, Halt> {
        self.store.commit(ticket, f).ok_or(Halt::Stale)
    }

    fn set_status(
        &self,
        ticket: &RunTicket,
        status: SessionStatus,
        message: Option<String>,
    ) -> Result<(), Halt> {
        let message = message.unwrap_or_else(|| status.label().to_string());
        self.commit(ticket, |s| s.set_status_message(status, message.clone()))?;
        self.emit(&ResearchEvent::Status {
            id: &ticket.id,
            status,
            message: &message,
        });
        Ok(())
    }

    async fn research(&self, ticket: &RunTicket, expected_location: Option<&str>) -> Result<Finish, Halt> {
        let id = &ticket.id;
        let cancel = &ticket.cancel;
        let max = self.config.max_searches;

        let has_intent = self.commit(ticket, |s| !s.intent.is_empty())?;
        if !has_intent {
            self.set_status(ticket, SessionStatus::FetchingPage, None)?;
            let page = self.content.fetch(id, expected_location, cancel).await?;

            self.set_status(ticket, SessionStatus::InferringIntent, None)?;
            let guess = intent::infer(self.backend.as_ref(), &page, &self.config, cancel).await?;
            self.commit(ticket, |s| {
                s.intent = guess.intent.clone();
                s.pending_query = guess.query.clone();
            })?;
            self.emit(&ResearchEvent::IntentInferred {
                id,
                intent: &guess.intent,
                query: guess.query.as_deref(),
            });
        } else {
            debug!("[{id}] Resuming with existing intent");
        }

        loop {
            let (intent, summary, history, count, pending) = self.commit(ticket, |s| {
                (
                    s.intent.clone(),
                    s.summary.clone(),
                    s.search_history.clone(),
                    s.search_count,
                    s.pending_query.clone(),
                )
            })?;

            if count >= max {
                self.set_status(
                    ticket,
                    SessionStatus::Complete,
                    Some(format!("{} ({max} searches)", SessionStatus::Complete.label())),
                )?;
                self.emit(&ResearchEvent::CapReached { id, max });
                return Ok(Finish::CapReached);
            }

            let query = match pending {
                Some(query) => query,
                None if history.is_empty() && summary.is_empty() => intent.clone(),
                None => {
                    self.set_status(ticket, SessionStatus::Planning, None)?;
                    let decision = planner::decide(
                        self.backend.as_ref(),
                        &intent,
                        &summary,
                        &history,
                        &self.config,
                        cancel,
                    )
                    .await?;
                    match decision.next_query() {
                        Some(query) => query.to_string(),
                        None => {
                            self.set_status(ticket, SessionStatus::Complete, None)?;
                            self.emit(&ResearchEvent::Completed { id, searches: count });
                            return Ok(Finish::Completed);
                        }
                    }
                }
            };

            self.pacer.acquire(cancel).await?;
            self.set_status(
                ticket,
                SessionStatus::Searching,
                Some(format!("{}: {query}", SessionStatus::Searching.label())),
            )?;
            self.emit(&ResearchEvent::SearchStarted {
                id,
                query: &query,
                number: count + 1,
                max,
            });

            let outcome = self.search.search(&query, cancel).await?;
            let sources = outcome.sources();
            let (added, total) = self.commit(ticket, |s| {
                s.pending_query = None;
                s.search_history.push(query.clone());
                s.search_count += 1;
                let added = s.references.extend(sources);
                (added, s.references.len())
            })?;
            let (scraped, skipped, failed) = outcome.counts();
            self.emit(&ResearchEvent::SearchCompleted {
                id,
                query: &query,
                scraped,
                skipped,
                failed,
            });
            if added > 0 {
                self.emit(&ResearchEvent::ReferencesAdded { id, added, total });
            }

            self.set_status(ticket, SessionStatus::Summarizing, None)?;
            let on_partial = |text: &str| {
                let committed = self
                    .store
                    .commit(ticket, |s| s.streaming_summary = Some(text.to_string()));
                if committed.is_some() {
                    self.emit(&ResearchEvent::SummaryPartial { id, text });
                }
            };
            let merged = summarizer::merge(
                self.backend.as_ref(),
                &summary,
                &outcome.text,
                &intent,
                &self.config,
                cancel,
                &on_partial,
            )
            .await;
            let merged = match merged {
                Ok(merged) => merged,
                Err(e) => {
                    self.store.commit(ticket, |s| s.streaming_summary = None);
                    return Err(e.into());
                }
            };
            self.commit(ticket, |s| {
                s.summary = merged.clone();
                s.streaming_summary = None;
            })?;
            self.emit(&ResearchEvent::SummaryUpdated {
                id,
                summary: &merged,
            });
        }
    }

    /// Turn the loop result into session state and an outcome.
    fn finish(&self, ticket: &RunTicket, result: Result<Finish, Halt>) -> RunOutcome {
        let id = &ticket.id;
        let error = match result {
            Ok(Finish::Completed) => return RunOutcome::Completed,
            Ok(Finish::CapReached) => return RunOutcome::CapReached,
            Err(Halt::Stale) => return self.abandoned(ticket),
            Err(Halt::Failed(e)) if e.is_cancelled() => return self.abandoned(ticket),
            Err(Halt::Failed(e)) => e,
        };

        let message = error.to_string();
        if error.is_not_analyzable() {
            let committed = self.store.commit(ticket, |s| {
                s.set_status_message(SessionStatus::Idle, message.clone());
                s.error = None;
                s.not_analyzable = true;
                s.streaming_summary = None;
            });
            if committed.is_none() {
                return self.abandoned(ticket);
            }
            info!("[{id}] {message}");
            self.emit(&ResearchEvent::NotAnalyzable {
                id,
                message: &message,
            });
            return RunOutcome::NotAnalyzable;
        }

        let committed = self.store.commit(ticket, |s| {
            s.set_status_message(SessionStatus::Error, message.clone());
            s.error = Some(message.clone());
            s.streaming_summary = None;
        });
        if committed.is_none() {
            return self.abandoned(ticket);
        }
        warn!("[{id}] Research failed: {message}");
        self.emit(&ResearchEvent::Failed {
            id,
            error: &message,
        });
        RunOutcome::Failed(message)
    }

    /// Classify a loop that lost ownership: same generation means it was
    /// interrupted, anything else means reset or destroyed.
    fn abandoned(&self, ticket: &RunTicket) -> RunOutcome {
        let same_generation = self
            .store
            .snapshot(&ticket.id)
            .is_some_and(|s| s.generation == ticket.generation);
        if same_generation {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Stale
        }
    }
}
