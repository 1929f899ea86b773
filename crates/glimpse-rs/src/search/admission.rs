//! Admission filter: decide whether a result link is safe to render.
//!
//! Two gates, in order. A link that looks like a file download (by extension
//! or bulk-download url pattern) is skipped outright. Otherwise a `HEAD`
//! probe must answer 2xx with a textual content type within a short timeout.
//! The probe fails closed: any error skips the page.

use crate::BoxFuture;
use crate::api::retry::{AttemptError, RetryConfig, Step, attempt};
use crate::config::ResearchConfig;
use crate::error::{ResearchError, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// File extensions that are never rendered.
const BLOCKED_EXTENSIONS: &[&str] = &[
    "pdf", "zip", "exe", "dmg", "msi", "pkg", "deb", "rpm", "tar", "gz", "tgz", "bz2", "xz", "7z",
    "rar", "iso", "apk", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "mp3", "mp4", "avi", "mov",
    "mkv", "wav", "flac", "png", "jpg", "jpeg", "gif", "webp", "bmp", "bin", "img",
];

/// Url fragments that indicate a bulk download endpoint.
const DOWNLOAD_PATTERNS: &[&str] = &[
    "/download/",
    "download=",
    "/releases/download/",
    "attachment",
    "export?format=",
    "/dl/",
];

/// Content types a page may be rendered with.
const ALLOWED_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml", "text/plain"];

/// Outcome of the admission filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admit,
    /// Skip with the reason shown in the `(Skipped: …)` marker.
    Skip(String),
}

/// What a `HEAD` probe saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub content_type: Option<String>,
}

/// Content-type pre-check collaborator.
pub trait ContentTypeProbe: Send + Sync {
    /// Probe `url` with a `HEAD` request.
    fn probe<'a>(
        &'a self,
        url: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, std::result::Result<ProbeResponse, ProbeError>>;
}

/// Why a probe produced no response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

/// Whether a url looks like a file download.
pub fn is_downloadable(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    if DOWNLOAD_PATTERNS.iter().any(|p| lower.contains(p)) {
        return true;
    }
    let path = url::Url::parse(&lower)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| lower.split(['?', '#']).next().unwrap_or_default().to_string());
    let last = path.rsplit('/').next().unwrap_or_default();
    match last.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => BLOCKED_EXTENSIONS.contains(&ext),
        _ => false,
    }
}

/// Judge a probe response.
pub fn judge(response: &ProbeResponse) -> Admission {
    if !(200..300).contains(&response.status) {
        return Admission::Skip(format!("HTTP {}", response.status));
    }
    match response.content_type.as_deref() {
        Some(ct) if is_allowed_content_type(ct) => Admission::Admit,
        Some(ct) => Admission::Skip(format!("Invalid Content-Type {ct}")),
        None => Admission::Skip("Invalid Content-Type unknown".into()),
    }
}

fn is_allowed_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    ALLOWED_CONTENT_TYPES.iter().any(|t| lower.contains(t))
}

/// Run both gates for one link.
pub async fn admit(
    url: &str,
    probe: &dyn ContentTypeProbe,
    cancel: &CancellationToken,
) -> Result<Admission> {
    if is_downloadable(url) {
        trace!("Skipping downloadable link {url}");
        return Ok(Admission::Skip("downloadable".into()));
    }
    match probe.probe(url, cancel).await {
        Ok(response) => {
            let verdict = judge(&response);
            if let Admission::Skip(reason) = &verdict {
                debug!("Skipping {url}: {reason}");
            }
            Ok(verdict)
        }
        Err(ProbeError::Cancelled) => Err(ResearchError::Cancelled),
        Err(ProbeError::Failed(reason)) => {
            debug!("Pre-check failed for {url}: {reason}");
            Ok(Admission::Skip(format!("Pre-check failed - {reason}")))
        }
    }
}

// ── HTTP probe ─────────────────────────────────────────────────────

/// `HEAD` probe over reqwest with a single bounded attempt.
pub struct HttpContentTypeProbe {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpContentTypeProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("glimpse-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ResearchError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            retry: RetryConfig::once_within(timeout),
        })
    }

    pub fn from_config(config: &ResearchConfig) -> Result<Self> {
        Self::new(config.probe_timeout)
    }
}

impl ContentTypeProbe for HttpContentTypeProbe {
    fn probe<'a>(
        &'a self,
        url: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, std::result::Result<ProbeResponse, ProbeError>> {
        Box::pin(async move {
            let client = &self.client;
            let outcome = attempt(&self.retry, cancel, move |_| async move {
                let resp = client
                    .head(url)
                    .send()
                    .await
                    .map_err(|e| Step::Retry(e.to_string()))?;
                let content_type = resp
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok::<_, Step<String>>(ProbeResponse {
                    status: resp.status().as_u16(),
                    content_type,
                })
            })
            .await;
            outcome.map_err(|e| match e {
                AttemptError::Cancelled => ProbeError::Cancelled,
                AttemptError::TimedOut => ProbeError::Failed("timed out".into()),
                AttemptError::Exhausted(msg) | AttemptError::Aborted(msg) => ProbeError::Failed(msg),
            })
        })
    }
}
