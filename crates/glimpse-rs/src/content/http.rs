//! A [`PageSource`] that fetches observed pages over plain HTTP.
//!
//! The host tells the source where each page is with
//! [`HttpPageSource::set_location`] (the CLI does this from navigation
//! events). Capture downloads the document and extracts its text with
//! [`html`](super::html).

use super::html;
use super::{CaptureError, PageContent, PageSource};
use crate::BoxFuture;
use crate::config::ResearchConfig;
use crate::error::{ResearchError, Result};
use crate::session::SessionId;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// HTTP-backed page source keyed by session id.
pub struct HttpPageSource {
    client: reqwest::Client,
    locations: Mutex<HashMap<SessionId, String>>,
}

impl HttpPageSource {
    pub fn new(config: &ResearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("glimpse-rs/", env!("CARGO_PKG_VERSION")))
            .timeout(config.page_load_timeout)
            .build()
            .map_err(|e| ResearchError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            locations: Mutex::new(HashMap::new()),
        })
    }

    /// Record where the page for `id` is now.
    pub fn set_location(&self, id: &SessionId, location: impl Into<String>) {
        let mut locations = self.locations.lock().unwrap_or_else(|e| e.into_inner());
        locations.insert(id.clone(), location.into());
    }

    /// Forget a closed page.
    pub fn forget(&self, id: &SessionId) {
        let mut locations = self.locations.lock().unwrap_or_else(|e| e.into_inner());
        locations.remove(id);
    }

    fn tracked(&self, id: &SessionId) -> Option<String> {
        let locations = self.locations.lock().unwrap_or_else(|e| e.into_inner());
        locations.get(id).cloned()
    }

    async fn download(&self, location: String) -> std::result::Result<PageContent, CaptureError> {
        let scheme_ok = url::Url::parse(&location)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !scheme_ok {
            return Err(CaptureError::Restricted(format!(
                "unsupported location: {location}"
            )));
        }

        let resp = self
            .client
            .get(&location)
            .send()
            .await
            .map_err(|e| CaptureError::Transient(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CaptureError::Transient(format!("HTTP {}", status.as_u16())));
        }
        let is_html = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_none_or(|ct| ct.contains("html"));
        let body = resp
            .text()
            .await
            .map_err(|e| CaptureError::Transient(e.to_string()))?;
        debug!("Captured {} bytes from {location}", body.len());

        Ok(if is_html {
            PageContent {
                content: html::visible_text(&body),
                title: html::title(&body).unwrap_or_default(),
                description: html::meta_description(&body).unwrap_or_default(),
                location,
            }
        } else {
            PageContent {
                content: html::collapse_whitespace(&body),
                title: String::new(),
                description: String::new(),
                location,
            }
        })
    }
}

impl PageSource for HttpPageSource {
    fn location<'a>(
        &'a self,
        id: &'a SessionId,
    ) -> BoxFuture<'a, std::result::Result<String, CaptureError>> {
        Box::pin(async move { self.tracked(id).ok_or(CaptureError::NotFound) })
    }

    fn capture<'a>(
        &'a self,
        id: &'a SessionId,
    ) -> BoxFuture<'a, std::result::Result<PageContent, CaptureError>> {
        Box::pin(async move {
            let location = self.tracked(id).ok_or(CaptureError::NotFound)?;
            self.download(location).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_page_is_not_found() {
        let source = HttpPageSource::new(&ResearchConfig::default()).unwrap();
        let id = SessionId::from("missing");
        assert_eq!(source.location(&id).await, Err(CaptureError::NotFound));
        assert_eq!(source.capture(&id).await, Err(CaptureError::NotFound));
    }

    #[tokio::test]
    async fn tracks_and_forgets_locations() {
        let source = HttpPageSource::new(&ResearchConfig::default()).unwrap();
        let id = SessionId::from("tab");
        source.set_location(&id, "https://example.com/a");
        source.set_location(&id, "https://example.com/b");
        assert_eq!(
            source.location(&id).await.unwrap(),
            "https://example.com/b"
        );
        source.forget(&id);
        assert!(source.location(&id).await.is_err());
    }

    #[tokio::test]
    async fn non_http_location_is_restricted() {
        let source = HttpPageSource::new(&ResearchConfig::default()).unwrap();
        let id = SessionId::from("tab");
        source.set_location(&id, "file:///etc/hosts");
        assert!(matches!(
            source.capture(&id).await,
            Err(CaptureError::Restricted(_))
        ));
    }
}
