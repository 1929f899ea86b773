//! Web search: results page, admission filter, bounded parallel scrape.
//!
//! [`SearchExecutor::search`] turns one query into a text block the
//! summarizer can read plus a per-link record of what happened:
//!
//! ```text
//! --- Query: tokio cancellation ---
//!
//! --- Page Start ---
//! Title: Graceful shutdown | Tokio
//! SourceURL: https://tokio.rs/tokio/topics/shutdown
//! Content: Tokio programs ... (truncated to max_page_bytes)
//!
//! --- Page Start ---
//! Title: report.pdf
//! SourceURL: https://example.com/report.pdf
//! Content: (Skipped: downloadable)
//! ```
//!
//! Single-page problems never fail a search; they become inline markers.
//! Only the results page itself can fail it.

pub mod admission;
pub mod render;
pub mod results;

pub use admission::{Admission, ContentTypeProbe, HttpContentTypeProbe, ProbeResponse};
pub use render::{HttpRenderer, RenderError, RenderedPage, Renderer};
pub use results::ResultLink;

use crate::BoxFuture;
use crate::api::retry::{AttemptError, RetryConfig, Step, attempt};
use crate::config::ResearchConfig;
use crate::content::html;
use crate::error::{ResearchError, Result};
use crate::session::Reference;
use futures::StreamExt;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Text used when the results page had no usable links.
pub const NO_RESULTS_TEXT: &str = "No search results";

/// Marker for an admitted page that produced no text.
pub const EMPTY_CONTENT_MARKER: &str = "(Failed to retrieve content)";

// ── Outcome types ──────────────────────────────────────────────────

/// What happened to one result link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    /// Rendered and extracted; carries the (truncated) text.
    Scraped(String),
    /// Refused by the admission filter.
    Skipped(String),
    /// Rendering or extraction failed, or the scrape was cancelled.
    Failed(String),
    /// Rendered, but no text was found.
    Empty,
}

/// One result link and its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchItem {
    pub title: String,
    pub url: String,
    pub status: ItemStatus,
}

impl SearchItem {
    /// The `Content:` value for this item's block.
    pub fn content_line(&self) -> String {
        match &self.status {
            ItemStatus::Scraped(text) => text.clone(),
            ItemStatus::Skipped(reason) => format!("(Skipped: {reason})"),
            ItemStatus::Failed(reason) => format!("(Error: {reason})"),
            ItemStatus::Empty => EMPTY_CONTENT_MARKER.to_string(),
        }
    }
}

/// Result of one search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    pub query: String,
    /// Concatenated page blocks, ready for the summarizer.
    pub text: String,
    /// Every result link, in result order.
    pub items: Vec<SearchItem>,
}

impl SearchOutcome {
    /// Sources whose content actually reached the text.
    pub fn sources(&self) -> Vec<Reference> {
        self.items
            .iter()
            .filter(|item| matches!(item.status, ItemStatus::Scraped(_)))
            .map(|item| Reference {
                title: item.title.clone(),
                url: item.url.clone(),
            })
            .collect()
    }

    /// `(scraped, skipped, failed)` counts. Empty pages count as failed.
    pub fn counts(&self) -> (usize, usize, usize) {
        self.items
            .iter()
            .fold((0, 0, 0), |(ok, skip, fail), item| match item.status {
                ItemStatus::Scraped(_) => (ok + 1, skip, fail),
                ItemStatus::Skipped(_) => (ok, skip + 1, fail),
                ItemStatus::Failed(_) | ItemStatus::Empty => (ok, skip, fail + 1),
            })
    }
}

/// Format the summarizer input for a query.
pub fn format_outcome_text(query: &str, items: &[SearchItem]) -> String {
    if items.is_empty() {
        return NO_RESULTS_TEXT.to_string();
    }
    let mut text = format!("--- Query: {query} ---\n");
    for item in items {
        let _ = write!(
            text,
            "\n--- Page Start ---\nTitle: {}\nSourceURL: {}\nContent: {}\n",
            item.title,
            item.url,
            item.content_line()
        );
    }
    text
}

// ── Executor ───────────────────────────────────────────────────────

/// A web search capability. [`SearchExecutor`] is the real one.
pub trait WebSearch: Send + Sync {
    fn search<'a>(
        &'a self,
        query: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<SearchOutcome>>;
}

/// Runs searches with a [`Renderer`] and a [`ContentTypeProbe`].
#[derive(Clone)]
pub struct SearchExecutor {
    renderer: Arc<dyn Renderer>,
    probe: Arc<dyn ContentTypeProbe>,
    config: Arc<ResearchConfig>,
}

impl SearchExecutor {
    pub fn new(
        config: &ResearchConfig,
        renderer: Arc<dyn Renderer>,
        probe: Arc<dyn ContentTypeProbe>,
    ) -> Self {
        Self {
            renderer,
            probe,
            config: Arc::new(config.clone()),
        }
    }

    /// Executor over plain HTTP ([`HttpRenderer`] + [`HttpContentTypeProbe`]).
    pub fn from_config(config: &ResearchConfig) -> Result<Self> {
        Ok(Self::new(
            config,
            Arc::new(HttpRenderer::new()?),
            Arc::new(HttpContentTypeProbe::from_config(config)?),
        ))
    }

    /// Run one search.
    ///
    /// Fails only if the results page cannot be opened or loaded in time, or
    /// the token is revoked.
    pub async fn search(&self, query: &str, cancel: &CancellationToken) -> Result<SearchOutcome> {
        let search_url = self.config.search_url_for(query);
        info!("Searching: {query}");
        debug!("Results page: {search_url}");

        let links = self.result_links(&search_url, cancel).await?;
        if links.is_empty() {
            debug!("No result links for '{query}'");
            return Ok(SearchOutcome {
                query: query.to_string(),
                text: NO_RESULTS_TEXT.to_string(),
                items: Vec::new(),
            });
        }

        let concurrency = self.config.scrape_concurrency.max(1);
        let items: Vec<SearchItem> = futures::stream::iter(links)
            .map(|link| self.process_link(link, cancel))
            .buffered(concurrency)
            .collect()
            .await;
        if cancel.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }

        let text = format_outcome_text(query, &items);
        Ok(SearchOutcome {
            query: query.to_string(),
            text,
            items,
        })
    }

    async fn result_links(
        &self,
        search_url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResultLink>> {
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResearchError::Cancelled),
            p = self.renderer.open(search_url) => p.map_err(|e| ResearchError::Search(e.to_string()))?,
        };
        let links = self.read_results(page.as_ref(), cancel).await;
        page.close().await;
        links
    }

    async fn read_results(
        &self,
        page: &dyn RenderedPage,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResultLink>> {
        let timeout = self.config.search_timeout;
        wait_loaded(page, timeout, cancel)
            .await
            .map_err(|e| match e {
                AttemptError::TimedOut => ResearchError::Search(format!(
                    "results page did not load within {}s",
                    timeout.as_secs()
                )),
                other => other.into_research(ResearchError::Search),
            })?;
        let markup = tokio::select! {
            _ = cancel.cancelled() => return Err(ResearchError::Cancelled),
            h = page.html() => h.map_err(|e| ResearchError::Search(e.to_string()))?,
        };
        Ok(results::extract_links(&markup, self.config.max_results))
    }

    /// Admission, then scrape. Never fails; problems become the item status.
    async fn process_link(&self, link: ResultLink, cancel: &CancellationToken) -> SearchItem {
        let status = match admission::admit(&link.url, self.probe.as_ref(), cancel).await {
            Err(_) => ItemStatus::Failed("cancelled".into()),
            Ok(Admission::Skip(reason)) => ItemStatus::Skipped(reason),
            Ok(Admission::Admit) => self.scrape(&link.url, cancel).await,
        };
        trace!("{} -> {:?}", link.url, status_label(&status));
        SearchItem {
            title: link.title,
            url: link.url,
            status,
        }
    }

    async fn scrape(&self, url: &str, cancel: &CancellationToken) -> ItemStatus {
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ItemStatus::Failed("cancelled".into()),
            p = self.renderer.open(url) => match p {
                Ok(page) => page,
                Err(e) => return ItemStatus::Failed(e.to_string()),
            },
        };
        let status = self.extract(page.as_ref(), cancel).await;
        page.close().await;
        status
    }

    async fn extract(&self, page: &dyn RenderedPage, cancel: &CancellationToken) -> ItemStatus {
        // Best-effort: a slow page is still read once the wait expires.
        match wait_loaded(page, self.config.page_load_timeout, cancel).await {
            Ok(()) | Err(AttemptError::TimedOut) => {}
            Err(AttemptError::Cancelled) => return ItemStatus::Failed("cancelled".into()),
            Err(AttemptError::Exhausted(e) | AttemptError::Aborted(e)) => {
                return ItemStatus::Failed(e.to_string());
            }
        }
        let markup = tokio::select! {
            _ = cancel.cancelled() => return ItemStatus::Failed("cancelled".into()),
            h = page.html() => match h {
                Ok(markup) => markup,
                Err(e) => return ItemStatus::Failed(e.to_string()),
            },
        };
        let text = html::visible_text(&markup);
        let text = html::truncate(&text, self.config.max_page_bytes);
        if text.is_empty() {
            ItemStatus::Empty
        } else {
            ItemStatus::Scraped(text.to_string())
        }
    }
}

impl WebSearch for SearchExecutor {
    fn search<'a>(
        &'a self,
        query: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<SearchOutcome>> {
        Box::pin(SearchExecutor::search(self, query, cancel))
    }
}

/// Bound a page's load wait with the shared attempt primitive.
async fn wait_loaded(
    page: &dyn RenderedPage,
    timeout: Duration,
    cancel: &CancellationToken,
) -> std::result::Result<(), AttemptError<RenderError>> {
    let retry = RetryConfig::once_within(timeout);
    attempt(&retry, cancel, move |_| async move {
        page.loaded().await.map_err(Step::Abort)
    })
    .await
}

fn status_label(status: &ItemStatus) -> &'static str {
    match status {
        ItemStatus::Scraped(_) => "scraped",
        ItemStatus::Skipped(_) => "skipped",
        ItemStatus::Failed(_) => "failed",
        ItemStatus::Empty => "empty",
    }
}
