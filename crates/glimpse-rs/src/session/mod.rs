//! Per-page research sessions.
//!
//! A [`Session`] holds everything the research loop learns about one observed
//! page. Sessions live in a [`SessionStore`](store::SessionStore) and are
//! driven by the [`Orchestrator`](orchestrator::Orchestrator).

pub mod events;
pub mod focus;
pub mod orchestrator;
pub mod pacing;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use tokio_util::sync::CancellationToken;

// ── SessionId ──────────────────────────────────────────────────────

/// Opaque key of an observed page (a browser tab id, a document path, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── SessionStatus ──────────────────────────────────────────────────

/// Where the research loop currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    FetchingPage,
    InferringIntent,
    Planning,
    Searching,
    Summarizing,
    Complete,
    Error,
    Interrupted,
}

impl SessionStatus {
    /// Default human-readable message for a status.
    pub fn label(self) -> &'static str {
        match self {
            SessionStatus::Idle => "Waiting",
            SessionStatus::FetchingPage => "Reading page",
            SessionStatus::InferringIntent => "Analyzing intent",
            SessionStatus::Planning => "Planning next search",
            SessionStatus::Searching => "Searching",
            SessionStatus::Summarizing => "Updating summary",
            SessionStatus::Complete => "Research complete",
            SessionStatus::Error => "Error",
            SessionStatus::Interrupted => "Paused",
        }
    }

    /// Whether a loop is (or should be) doing work in this status.
    pub fn is_working(self) -> bool {
        matches!(
            self,
            SessionStatus::FetchingPage
                | SessionStatus::InferringIntent
                | SessionStatus::Planning
                | SessionStatus::Searching
                | SessionStatus::Summarizing
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── References ─────────────────────────────────────────────────────

/// A source page used in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub title: String,
    pub url: String,
}

/// Insertion-ordered references, unique by url. The first title seen for a
/// url wins and entries are never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSet {
    items: Vec<Reference>,
    urls: HashSet<String>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference. Returns `false` if the url was already present.
    pub fn insert(&mut self, title: impl Into<String>, url: impl Into<String>) -> bool {
        let url = url.into();
        if self.urls.contains(&url) {
            return false;
        }
        self.urls.insert(url.clone());
        self.items.push(Reference {
            title: title.into(),
            url,
        });
        true
    }

    /// Union in a batch; returns how many were new.
    pub fn extend<I>(&mut self, refs: I) -> usize
    where
        I: IntoIterator<Item = Reference>,
    {
        refs.into_iter()
            .filter(|r| self.insert(r.title.clone(), r.url.clone()))
            .count()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Reference> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Reference] {
        &self.items
    }
}

impl Serialize for ReferenceSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

impl<'a> IntoIterator for &'a ReferenceSet {
    type Item = &'a Reference;
    type IntoIter = std::slice::Iter<'a, Reference>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

// ── Session ────────────────────────────────────────────────────────

/// Research state for one observed page.
///
/// Only the loop holding the current generation and run id may mutate it;
/// see [`SessionStore::commit`](store::SessionStore::commit).
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: SessionId,
    /// Bumped on reset and destroy; drawn from a store-wide counter.
    pub generation: u64,
    #[serde(skip)]
    pub cancel: CancellationToken,
    /// Empty until intent inference completes.
    pub intent: String,
    /// Last committed summary.
    pub summary: String,
    /// Partial summary while the summarizer streams.
    pub streaming_summary: Option<String>,
    pub search_history: Vec<String>,
    pub references: ReferenceSet,
    pub search_count: u32,
    pub status: SessionStatus,
    pub status_message: String,
    pub error: Option<String>,
    /// The last run found the page cannot be analyzed. Cleared by reset.
    pub not_analyzable: bool,
    /// Query proposed by intent inference, consumed by the first iteration.
    pub pending_query: Option<String>,
    #[serde(skip)]
    pub active_run: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, generation: u64) -> Self {
        Self {
            id,
            generation,
            cancel: CancellationToken::new(),
            intent: String::new(),
            summary: String::new(),
            streaming_summary: None,
            search_history: Vec::new(),
            references: ReferenceSet::new(),
            search_count: 0,
            status: SessionStatus::Idle,
            status_message: SessionStatus::Idle.label().to_string(),
            error: None,
            not_analyzable: false,
            pending_query: None,
            active_run: None,
            updated_at: Utc::now(),
        }
    }

    /// Set status with its default message.
    pub fn set_status(&mut self, status: SessionStatus) {
        self.set_status_message(status, status.label());
    }

    pub fn set_status_message(&mut self, status: SessionStatus, message: impl Into<String>) {
        self.status = status;
        self.status_message = message.into();
        self.updated_at = Utc::now();
    }

    /// The text a viewer should show: the streaming partial if one is in
    /// progress, otherwise the committed summary.
    pub fn display_summary(&self) -> &str {
        self.streaming_summary.as_deref().unwrap_or(&self.summary)
    }

    /// Whether a loop currently owns this session.
    pub fn is_running(&self) -> bool {
        self.active_run.is_some() && !self.cancel.is_cancelled()
    }
}
