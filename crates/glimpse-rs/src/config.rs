//! Configuration for the research orchestrator.
//!
//! [`ResearchConfig`] is a flat, read-only set of options. Every field has a
//! working default aimed at a local OpenAI-compatible server, so the minimal
//! setup is `ResearchConfig::default()`.
//!
//! ```ignore
//! let config = ResearchConfig::default()
//!     .with_base_url("http://localhost:11434/v1")
//!     .with_model("qwen3:8b")
//!     .with_max_searches(5)
//!     .with_rate_limit(RateLimitConfig::default());
//! ```

use crate::api::reasoning::ReasoningFilter;
use crate::api::retry::RetryConfig;
use crate::error::{ResearchError, Result};
use crate::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use std::time::Duration;

/// Default search engine URL template. `{query}` is replaced with the
/// percent-encoded query.
pub const DEFAULT_SEARCH_URL: &str = "https://www.google.com/search?q={query}";

/// Optional search pacing. When absent, searches run back to back.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Minimum time between two searches.
    pub min_interval: Duration,
    /// Maximum searches allowed inside one sliding window.
    pub max_per_window: u32,
    /// Length of the sliding window.
    pub window: Duration,
    /// Extra wait imposed once the window is full.
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(2),
            max_per_window: 10,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Configuration for a research [`Orchestrator`](crate::session::orchestrator::Orchestrator).
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    // ── Model backend ──
    /// Base URL of the OpenAI-compatible API. `/chat/completions` is
    /// appended unless already present. Default: `http://localhost:1234/v1`.
    pub base_url: String,
    /// Bearer token. `None` sends a placeholder accepted by local servers.
    pub api_key: Option<String>,
    /// Model identifier. Default: `local-model`.
    pub model: String,
    /// Optional sampling temperature (omitted from requests when `None`).
    pub temperature: Option<f32>,
    /// Send `response_format: json_object` for JSON-only calls. Off by
    /// default; many local servers reject it.
    pub json_response_format: bool,
    /// Stream summarizer output. Default: `true`.
    pub streaming: bool,
    /// Reasoning preamble sentinels. Default: `<think>` / `</think>`.
    pub reasoning: ReasoningFilter,
    /// Whole-request timeout for model calls.
    pub request_timeout: Duration,
    /// Language the summary and intent should be written in. `None` lets the
    /// model follow the page.
    pub language: Option<String>,

    // ── Loop limits ──
    /// Searches per session before the loop stops. Default: 3.
    pub max_searches: u32,
    /// Maximum characters of page content sent to intent inference.
    /// Default: 10 000.
    pub max_context_chars: usize,

    // ── Search / scrape ──
    /// Search engine URL template containing `{query}`.
    pub search_url: String,
    /// Result links taken from the results page. Default: 3.
    pub max_results: usize,
    /// Per-page scraped text limit in bytes. Default: 8192.
    pub max_page_bytes: usize,
    /// Pages scraped concurrently within one search. Default: 3.
    pub scrape_concurrency: usize,
    /// Limit for the results page to finish loading. Default: 20 s.
    pub search_timeout: Duration,
    /// Content-type probe timeout. Default: 2 s.
    pub probe_timeout: Duration,
    /// Best-effort load wait for each scraped page. Default: 10 s.
    pub page_load_timeout: Duration,
    /// Optional search pacing.
    pub rate_limit: Option<RateLimitConfig>,

    // ── Content provider ──
    /// Attempts to read the observed page before giving up. Default: 10.
    pub fetch_attempts: u32,
    /// Fixed delay between content fetch attempts. Default: 500 ms.
    pub fetch_backoff: Duration,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            json_response_format: false,
            streaming: true,
            reasoning: ReasoningFilter::default(),
            request_timeout: Duration::from_secs(300),
            language: None,
            max_searches: 3,
            max_context_chars: 10_000,
            search_url: DEFAULT_SEARCH_URL.to_string(),
            max_results: 3,
            max_page_bytes: 8192,
            scrape_concurrency: 3,
            search_timeout: Duration::from_secs(20),
            probe_timeout: Duration::from_secs(2),
            page_load_timeout: Duration::from_secs(10),
            rate_limit: None,
            fetch_attempts: 10,
            fetch_backoff: Duration::from_millis(500),
        }
    }
}

impl ResearchConfig {
    /// Set the API base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Enable or disable summarizer streaming.
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    /// Set the output language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the per-session search cap.
    pub fn with_max_searches(mut self, max: u32) -> Self {
        self.max_searches = max;
        self
    }

    /// Set the number of result links taken per query.
    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Set the per-page scrape limit in bytes.
    pub fn with_max_page_bytes(mut self, max: usize) -> Self {
        self.max_page_bytes = max;
        self
    }

    /// Set scrape parallelism within one search.
    pub fn with_scrape_concurrency(mut self, n: usize) -> Self {
        self.scrape_concurrency = n;
        self
    }

    /// Set the search engine URL template (must contain `{query}`).
    pub fn with_search_url(mut self, template: impl Into<String>) -> Self {
        self.search_url = template.into();
        self
    }

    /// Enable search pacing.
    pub fn with_rate_limit(mut self, limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    /// Set the reasoning sentinels.
    pub fn with_reasoning(mut self, filter: ReasoningFilter) -> Self {
        self.reasoning = filter;
        self
    }

    /// Reject combinations the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ResearchError::Config("base URL is not set".into()));
        }
        if !self.search_url.contains("{query}") {
            return Err(ResearchError::Config(
                "search URL template must contain {query}".into(),
            ));
        }
        if self.max_results == 0 {
            return Err(ResearchError::Config("max_results must be at least 1".into()));
        }
        if self.scrape_concurrency == 0 {
            return Err(ResearchError::Config(
                "scrape_concurrency must be at least 1".into(),
            ));
        }
        if self.fetch_attempts == 0 {
            return Err(ResearchError::Config("fetch_attempts must be at least 1".into()));
        }
        if let Some(limit) = &self.rate_limit
            && limit.max_per_window == 0
        {
            return Err(ResearchError::Config(
                "rate limit max_per_window must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Retry policy for the content provider's location-match loop.
    pub fn fetch_retry(&self) -> RetryConfig {
        RetryConfig::fixed(self.fetch_attempts, self.fetch_backoff)
    }

    /// Search URL for a query.
    pub fn search_url_for(&self, query: &str) -> String {
        self.search_url
            .replace("{query}", &urlencoding::encode(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_local_server_setup() {
        let config = ResearchConfig::default();
        assert_eq!(config.base_url, "http://localhost:1234/v1");
        assert_eq!(config.model, "local-model");
        assert_eq!(config.max_searches, 3);
        assert_eq!(config.max_results, 3);
        assert_eq!(config.max_page_bytes, 8192);
        assert_eq!(config.fetch_attempts, 10);
        assert_eq!(config.fetch_backoff, Duration::from_millis(500));
        assert!(config.rate_limit.is_none());
        assert!(config.streaming);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builders_chain() {
        let config = ResearchConfig::default()
            .with_model("qwen3")
            .with_max_searches(5)
            .with_language("Japanese")
            .with_rate_limit(RateLimitConfig::default());
        assert_eq!(config.model, "qwen3");
        assert_eq!(config.max_searches, 5);
        assert_eq!(config.language.as_deref(), Some("Japanese"));
        assert!(config.rate_limit.is_some());
    }

    #[test]
    fn validate_rejects_bad_search_template() {
        let config = ResearchConfig::default().with_search_url("https://example.com/search");
        assert!(matches!(config.validate(), Err(ResearchError::Config(_))));
    }

    #[test]
    fn validate_rejects_zero_limits() {
        assert!(ResearchConfig::default().with_max_results(0).validate().is_err());
        assert!(
            ResearchConfig::default()
                .with_scrape_concurrency(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn search_url_encodes_query() {
        let config = ResearchConfig::default();
        assert_eq!(
            config.search_url_for("rust async & cancel"),
            "https://www.google.com/search?q=rust%20async%20%26%20cancel"
        );
    }

    #[test]
    fn fetch_retry_is_fixed_backoff() {
        let retry = ResearchConfig::default().fetch_retry();
        assert_eq!(retry.max_attempts, 10);
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(500));
    }
}
