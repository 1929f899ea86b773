//! Render contexts: isolated, exclusively owned page-loading handles.
//!
//! The search executor opens one [`RenderedPage`] for the results page and
//! one per admitted link. Whoever opens a page must [`close`](RenderedPage::close)
//! it on every exit path; implementations also release resources on drop as
//! a backstop.
//!
//! [`HttpRenderer`] is the bundled implementation: "loading" is a background
//! `GET`, and closing aborts it. A headless browser can be plugged in through
//! the [`Renderer`] trait.

use crate::BoxFuture;
use crate::error::{ResearchError, Result};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;

/// Render-context failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("failed to open page: {0}")]
    Open(String),
    #[error("{0}")]
    Load(String),
    #[error("page is closed")]
    Closed,
}

/// One open page.
pub trait RenderedPage: Send + Sync {
    /// Resolves once the page finished loading (successfully or not).
    /// Callers bound this with their own timeout.
    fn loaded(&self) -> BoxFuture<'_, std::result::Result<(), RenderError>>;

    /// Current document markup.
    fn html(&self) -> BoxFuture<'_, std::result::Result<String, RenderError>>;

    /// Release the context. Idempotent.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Opens render contexts.
pub trait Renderer: Send + Sync {
    fn open<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Box<dyn RenderedPage>, RenderError>>;
}

// ── HTTP renderer ──────────────────────────────────────────────────

type LoadState = Option<std::result::Result<String, String>>;

/// Renders pages by downloading them with reqwest.
#[derive(Clone)]
pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("glimpse-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ResearchError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Renderer for HttpRenderer {
    fn open<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Box<dyn RenderedPage>, RenderError>> {
        Box::pin(async move {
            let parsed = url::Url::parse(url).map_err(|e| RenderError::Open(e.to_string()))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(RenderError::Open(format!("unsupported scheme: {}", parsed.scheme())));
            }

            let (tx, rx) = watch::channel::<LoadState>(None);
            let request = self.client.get(parsed);
            let task = tokio::spawn(async move {
                let result = async {
                    let resp = request.send().await.map_err(|e| e.to_string())?;
                    let status = resp.status();
                    if !status.is_success() {
                        return Err(format!("HTTP {}", status.as_u16()));
                    }
                    resp.text().await.map_err(|e| e.to_string())
                }
                .await;
                let _ = tx.send(Some(result));
            });
            trace!("Opened render context for {url}");
            Ok(Box::new(HttpPage {
                rx,
                task: Mutex::new(Some(task)),
                closed: AtomicBool::new(false),
            }) as Box<dyn RenderedPage>)
        })
    }
}

struct HttpPage {
    rx: watch::Receiver<LoadState>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl HttpPage {
    fn abort(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}

impl RenderedPage for HttpPage {
    fn loaded(&self) -> BoxFuture<'_, std::result::Result<(), RenderError>> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(RenderError::Closed);
            }
            let mut rx = self.rx.clone();
            rx.wait_for(Option::is_some)
                .await
                .map(|_| ())
                .map_err(|_| RenderError::Closed)
        })
    }

    fn html(&self) -> BoxFuture<'_, std::result::Result<String, RenderError>> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(RenderError::Closed);
            }
            match &*self.rx.borrow() {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(e)) => Err(RenderError::Load(e.clone())),
                None => Err(RenderError::Load("page did not finish loading".into())),
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.abort();
            }
        })
    }
}

impl Drop for HttpPage {
    fn drop(&mut self) {
        self.abort();
    }
}
