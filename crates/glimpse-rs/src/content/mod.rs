//! Reading the observed page.
//!
//! A [`PageSource`] knows where each observed page currently is and can
//! capture its visible text. The [`ContentProvider`] wraps a source with the
//! rules every research loop needs: restricted locations are refused up
//! front, and capture is retried until the page reports the location the
//! caller expects (the page may still be navigating when the loop starts).

pub mod html;
pub mod http;

pub use http::HttpPageSource;

use crate::BoxFuture;
use crate::api::retry::{AttemptError, RetryConfig, Step, attempt};
use crate::config::ResearchConfig;
use crate::error::{ResearchError, Result};
use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Shown when a page can never be analyzed.
pub const NOT_ANALYZABLE_MESSAGE: &str = "This page cannot be analyzed.";

/// Shown when the browser refuses access to a page's contents.
pub const RESTRICTED_DOMAIN_MESSAGE: &str = "Cannot access contents: restricted domain";

/// Location schemes that never expose page contents.
const RESTRICTED_PREFIXES: &[&str] = &[
    "chrome://",
    "edge://",
    "about:",
    "chrome-extension://",
    "moz-extension://",
    "view-source:",
];

/// Extension galleries refuse scripting.
const RESTRICTED_HOSTS: &[&str] = &["addons.mozilla.org", "chromewebstore.google.com"];

/// Text captured from an observed page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContent {
    /// Visible text, whitespace-collapsed.
    pub content: String,
    pub title: String,
    /// `<meta name="description">`, empty when absent.
    pub description: String,
    /// Location the page reported at capture time.
    pub location: String,
}

/// Why a [`PageSource`] could not capture a page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The page id is unknown to the source.
    #[error("page not found")]
    NotFound,
    /// Access is refused for good (host permission, extension gallery).
    #[error("{0}")]
    Restricted(String),
    /// A failure that may clear up on retry (page still loading, network).
    #[error("{0}")]
    Transient(String),
}

/// Capture collaborator: browser bridge, headless renderer, or plain HTTP.
pub trait PageSource: Send + Sync {
    /// Where the page currently is.
    fn location<'a>(
        &'a self,
        id: &'a SessionId,
    ) -> BoxFuture<'a, std::result::Result<String, CaptureError>>;

    /// Capture the page as it is right now.
    fn capture<'a>(
        &'a self,
        id: &'a SessionId,
    ) -> BoxFuture<'a, std::result::Result<PageContent, CaptureError>>;
}

/// Whether a location can never be analyzed.
pub fn is_restricted_location(location: &str) -> bool {
    let location = location.trim();
    if location.is_empty() {
        return true;
    }
    let lower = location.to_ascii_lowercase();
    if RESTRICTED_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return true;
    }
    match url::Url::parse(location) {
        Ok(url) => match url.host_str() {
            Some(host) if RESTRICTED_HOSTS.contains(&host) => true,
            Some("chrome.google.com") => url.path().starts_with("/webstore"),
            _ => false,
        },
        Err(_) => false,
    }
}

/// Whether a captured location satisfies the caller's expectation: exact
/// match or prefix match. No expectation accepts anything.
pub fn location_matches(expected: Option<&str>, actual: &str) -> bool {
    match expected {
        None => true,
        Some(expected) => actual == expected || actual.starts_with(expected),
    }
}

/// Restricted-location check plus retrying capture on top of a [`PageSource`].
#[derive(Clone)]
pub struct ContentProvider {
    source: Arc<dyn PageSource>,
    retry: RetryConfig,
}

impl ContentProvider {
    pub fn new(source: Arc<dyn PageSource>, config: &ResearchConfig) -> Self {
        Self {
            source,
            retry: config.fetch_retry(),
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The underlying page source.
    pub fn source(&self) -> &Arc<dyn PageSource> {
        &self.source
    }

    /// Fetch the page for `id`, waiting until it reports `expected_location`.
    ///
    /// Restricted locations and refused access become
    /// [`ResearchError::NotAnalyzable`]; running out of attempts becomes
    /// [`ResearchError::Fetch`].
    pub async fn fetch(
        &self,
        id: &SessionId,
        expected_location: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<PageContent> {
        let location = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResearchError::Cancelled),
            l = self.source.location(id) => l.map_err(capture_to_research)?,
        };
        if is_restricted_location(&location) {
            debug!("Refusing restricted location for {id}: {location}");
            return Err(ResearchError::NotAnalyzable(NOT_ANALYZABLE_MESSAGE.into()));
        }

        let source = &self.source;
        let outcome = attempt(&self.retry, cancel, move |n| async move {
            match source.capture(id).await {
                Ok(page) if location_matches(expected_location, &page.location) => Ok(page),
                Ok(page) => {
                    trace!(
                        "Capture {} for {id}: location {} does not match yet",
                        n + 1,
                        page.location
                    );
                    Err(Step::Retry(CaptureError::Transient(format!(
                        "location mismatch: {}",
                        page.location
                    ))))
                }
                Err(e @ CaptureError::Transient(_)) => {
                    trace!("Capture {} for {id} failed, retrying: {e}", n + 1);
                    Err(Step::Retry(e))
                }
                Err(e) => Err(Step::Abort(e)),
            }
        })
        .await;

        outcome.map_err(|e| match e {
            AttemptError::Aborted(err) => capture_to_research(err),
            AttemptError::Exhausted(err) => ResearchError::Fetch(format!(
                "page did not finish loading ({err})"
            )),
            other => other.into_research(ResearchError::Fetch),
        })
    }
}

fn capture_to_research(err: CaptureError) -> ResearchError {
    match err {
        CaptureError::Restricted(_) => {
            ResearchError::NotAnalyzable(RESTRICTED_DOMAIN_MESSAGE.into())
        }
        other => ResearchError::Fetch(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Replays scripted captures; the last one repeats.
    struct ScriptedSource {
        location: String,
        captures: Mutex<VecDeque<std::result::Result<PageContent, CaptureError>>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(
            location: &str,
            captures: Vec<std::result::Result<PageContent, CaptureError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                location: location.into(),
                captures: Mutex::new(captures.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    impl PageSource for ScriptedSource {
        fn location<'a>(
            &'a self,
            _id: &'a SessionId,
        ) -> BoxFuture<'a, std::result::Result<String, CaptureError>> {
            Box::pin(async move { Ok(self.location.clone()) })
        }

        fn capture<'a>(
            &'a self,
            _id: &'a SessionId,
        ) -> BoxFuture<'a, std::result::Result<PageContent, CaptureError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let mut queue = self.captures.lock().unwrap();
                if queue.len() > 1 {
                    queue.pop_front().unwrap()
                } else {
                    queue.front().cloned().unwrap()
                }
            })
        }
    }

    fn page(location: &str) -> PageContent {
        PageContent {
            content: "body text".into(),
            title: "Title".into(),
            description: String::new(),
            location: location.into(),
        }
    }

    fn provider(source: Arc<ScriptedSource>) -> ContentProvider {
        ContentProvider::new(source, &ResearchConfig::default())
            .with_retry(RetryConfig::fixed(4, Duration::from_millis(1)))
    }

    #[test]
    fn restricted_locations() {
        for loc in [
            "chrome://settings",
            "edge://flags",
            "about:blank",
            "chrome-extension://abc/popup.html",
            "moz-extension://abc/page.html",
            "view-source:https://example.com",
            "https://addons.mozilla.org/en-US/firefox/",
            "https://chromewebstore.google.com/detail/x",
            "https://chrome.google.com/webstore/detail/x",
            "",
        ] {
            assert!(is_restricted_location(loc), "{loc} should be restricted");
        }
        assert!(!is_restricted_location("https://example.com/about:me"));
        assert!(!is_restricted_location("https://chrome.google.com/other"));
    }

    #[test]
    fn location_matching() {
        assert!(location_matches(None, "https://a.com"));
        assert!(location_matches(Some("https://a.com/x"), "https://a.com/x"));
        assert!(location_matches(Some("https://a.com/x"), "https://a.com/x#frag"));
        assert!(!location_matches(Some("https://a.com/x"), "https://a.com/"));
    }

    #[tokio::test]
    async fn restricted_location_is_not_analyzable_without_capture() {
        let source = ScriptedSource::new("chrome://newtab", vec![Ok(page("chrome://newtab"))]);
        let err = provider(source.clone())
            .fetch(&"t".into(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_analyzable());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retries_until_location_matches() {
        let source = ScriptedSource::new(
            "https://a.com/new",
            vec![
                Ok(page("https://a.com/old")),
                Err(CaptureError::Transient("still loading".into())),
                Ok(page("https://a.com/new?ref=1")),
            ],
        );
        let got = provider(source.clone())
            .fetch(&"t".into(), Some("https://a.com/new"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(got.location, "https://a.com/new?ref=1");
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn mismatch_exhausts_into_fetch_error() {
        let source = ScriptedSource::new("https://a.com/new", vec![Ok(page("https://a.com/old"))]);
        let err = provider(source.clone())
            .fetch(&"t".into(), Some("https://a.com/new"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::Fetch(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn refused_access_is_not_analyzable_and_not_retried() {
        let source = ScriptedSource::new(
            "https://a.com",
            vec![Err(CaptureError::Restricted("missing host permission".into()))],
        );
        let err = provider(source.clone())
            .fetch(&"t".into(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ResearchError::NotAnalyzable(RESTRICTED_DOMAIN_MESSAGE.into())
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_fetch() {
        let source = ScriptedSource::new("https://a.com", vec![Ok(page("https://a.com"))]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = provider(source)
            .fetch(&"t".into(), None, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
