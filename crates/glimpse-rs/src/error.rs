//! Error taxonomy for a research session.
//!
//! Only loop-level failures become a [`ResearchError`]. Single-page scrape
//! failures are annotated inline in the search text and malformed model
//! output is handled by a per-caller fallback, so neither shows up here.

use thiserror::Error;

/// Errors surfaced at the research-loop boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResearchError {
    /// The observed page cannot be analyzed (restricted location, missing
    /// host permission, invalidated context). Shown as a quiet status, never
    /// as a hard error.
    #[error("{0}")]
    NotAnalyzable(String),

    /// The operation's cancellation token was revoked.
    #[error("operation cancelled")]
    Cancelled,

    /// The model backend rejected the request.
    #[error("API error: {0}")]
    Api(String),

    /// The request never produced a usable response (connect, read, decode).
    #[error("request failed: {0}")]
    Transport(String),

    /// The Content Provider could not produce the expected page.
    #[error("page fetch failed: {0}")]
    Fetch(String),

    /// The search results page could not be loaded or read.
    #[error("search failed: {0}")]
    Search(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ResearchError {
    /// Whether this error is a revoked cancellation token rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResearchError::Cancelled)
    }

    /// Whether this error means "this page is not applicable", which the
    /// session reports quietly.
    pub fn is_not_analyzable(&self) -> bool {
        matches!(self, ResearchError::NotAnalyzable(_))
    }
}

impl From<reqwest::Error> for ResearchError {
    fn from(e: reqwest::Error) -> Self {
        ResearchError::Transport(e.to_string())
    }
}

pub type Result<T, E = ResearchError> = std::result::Result<T, E>;
