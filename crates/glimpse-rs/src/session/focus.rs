//! Page lifecycle wiring: which session runs, and when.
//!
//! A host (browser extension, editor plugin, the `glimpse watch` command)
//! reports four kinds of page events. [`FocusController`] turns them into
//! orchestrator calls so that only the focused page ever researches:
//!
//! | Event | Effect |
//! |-------|--------|
//! | [`navigated`](FocusController::navigated) | reset the session, remember the new location |
//! | [`load_complete`](FocusController::load_complete) | start the loop if the page is focused and idle |
//! | [`activated`](FocusController::activated) | interrupt every other page, then start or resume this one |
//! | [`removed`](FocusController::removed) | destroy the session |

use super::orchestrator::{Orchestrator, RunOutcome};
use super::{SessionId, SessionStatus};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Default)]
struct FocusState {
    focused: Option<SessionId>,
    /// Last reported location per page.
    locations: HashMap<SessionId, String>,
    /// Pages that navigated and have not finished loading.
    loading: HashSet<SessionId>,
}

/// Routes page events to an [`Orchestrator`].
pub struct FocusController {
    orchestrator: Orchestrator,
    state: Mutex<FocusState>,
}

impl FocusController {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            state: Mutex::new(FocusState::default()),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    fn lock(&self) -> MutexGuard<'_, FocusState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The page currently allowed to run.
    pub fn focused(&self) -> Option<SessionId> {
        self.lock().focused.clone()
    }

    /// The last location reported for `id`.
    pub fn location(&self, id: &SessionId) -> Option<String> {
        self.lock().locations.get(id).cloned()
    }

    /// The page started loading a new location.
    pub fn navigated(&self, id: &SessionId, location: impl Into<String>) {
        let location = location.into();
        debug!("[{id}] Navigated to {location}");
        {
            let mut state = self.lock();
            state.locations.insert(id.clone(), location);
            state.loading.insert(id.clone());
        }
        self.orchestrator.reset(id);
    }

    /// The page finished loading. Starts the loop when the page is focused
    /// and nothing runs for it yet.
    pub fn load_complete(
        &self,
        id: &SessionId,
        location: Option<String>,
    ) -> Option<JoinHandle<RunOutcome>> {
        let focused = {
            let mut state = self.lock();
            state.loading.remove(id);
            if let Some(location) = location {
                state.locations.insert(id.clone(), location);
            }
            state.focused.as_ref() == Some(id)
        };
        if !focused {
            trace!("[{id}] Loaded in the background");
            return None;
        }
        self.start_if_needed(id)
    }

    /// Focus moved to `id`. Every other running page is interrupted with its
    /// state kept; `id` starts, or resumes from where it was paused.
    pub fn activated(&self, id: &SessionId) -> Option<JoinHandle<RunOutcome>> {
        let loading = {
            let mut state = self.lock();
            state.focused = Some(id.clone());
            state.loading.contains(id)
        };
        for other in self.orchestrator.session_ids() {
            if &other == id {
                continue;
            }
            let busy = self
                .orchestrator
                .snapshot(&other)
                .is_some_and(|s| s.is_running() || s.status.is_working());
            if busy {
                self.orchestrator.interrupt(&other);
            }
        }
        if loading {
            trace!("[{id}] Focused while loading; waiting for load");
            return None;
        }
        self.start_if_needed(id)
    }

    /// The page closed.
    pub fn removed(&self, id: &SessionId) {
        {
            let mut state = self.lock();
            state.locations.remove(id);
            state.loading.remove(id);
            if state.focused.as_ref() == Some(id) {
                state.focused = None;
            }
        }
        self.orchestrator.destroy(id);
    }

    /// Start a fresh session or resume a paused one. Finished, failed, and
    /// not-analyzable sessions stay as they are until the page navigates.
    fn start_if_needed(&self, id: &SessionId) -> Option<JoinHandle<RunOutcome>> {
        let should_run = match self.orchestrator.snapshot(id) {
            None => true,
            Some(s) if s.is_running() => false,
            Some(s) => match s.status {
                SessionStatus::Interrupted => true,
                SessionStatus::Idle => !s.not_analyzable,
                _ => false,
            },
        };
        if !should_run {
            trace!("[{id}] Nothing to start");
            return None;
        }
        let expected = self.location(id);
        Some(self.orchestrator.start(id, expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResearchConfig;
    use crate::content::PageSource;
    use crate::testing::{Pages, Web, eager_backend};
    use std::sync::Arc;
    use tokio::sync::Notify;

    struct Harness {
        focus: FocusController,
        pages: Arc<Pages>,
        gate: Arc<Notify>,
        entered: Arc<Notify>,
    }

    fn harness() -> Harness {
        let gate = Arc::new(Notify::new());
        let web = Web {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        let entered = web.entered.clone();
        let pages = Arc::new(
            Pages::default()
                .with("1", "https://tokio.rs/", "Tokio")
                .with("2", "https://serde.rs/", "Serde"),
        );
        let source: Arc<dyn PageSource> = pages.clone();
        let orchestrator = Orchestrator::builder(ResearchConfig::default())
            .with_backend(eager_backend())
            .with_shared_page_source(source)
            .with_search(web)
            .build()
            .unwrap();
        Harness {
            focus: FocusController::new(orchestrator),
            pages,
            gate,
            entered,
        }
    }

    fn tab(id: &str) -> SessionId {
        SessionId::from(id)
    }

    #[tokio::test]
    async fn background_load_does_not_start() {
        let h = harness();
        h.focus.activated(&tab("1"));
        h.focus.navigated(&tab("2"), "https://serde.rs/");
        assert!(h.focus.load_complete(&tab("2"), None).is_none());
        assert_eq!(h.focus.location(&tab("2")).as_deref(), Some("https://serde.rs/"));
    }

    #[tokio::test]
    async fn activation_waits_for_load() {
        let h = harness();
        h.focus.navigated(&tab("1"), "https://tokio.rs/");
        assert!(h.focus.activated(&tab("1")).is_none());
        let handle = h
            .focus
            .load_complete(&tab("1"), Some("https://tokio.rs/".into()))
            .expect("focused page starts on load");
        h.entered.notified().await;
        h.focus.removed(&tab("1"));
        assert_eq!(handle.await.unwrap(), RunOutcome::Stale);
        assert_eq!(h.focus.focused(), None);
    }

    #[tokio::test]
    async fn switching_focus_pauses_and_resumes() {
        let h = harness();
        let one = h.focus.activated(&tab("1")).unwrap();
        h.entered.notified().await;

        let two = h.focus.activated(&tab("2")).unwrap();
        assert_eq!(one.await.unwrap(), RunOutcome::Cancelled);
        h.entered.notified().await;
        let paused = h.focus.orchestrator().snapshot(&tab("1")).unwrap();
        assert_eq!(paused.status, SessionStatus::Interrupted);
        assert_eq!(paused.intent, "learn tokio");

        let again = h.focus.activated(&tab("1")).unwrap();
        assert_eq!(two.await.unwrap(), RunOutcome::Cancelled);
        h.entered.notified().await;
        // Two captures in total: resuming "1" did not refetch.
        assert_eq!(h.pages.captures.load(std::sync::atomic::Ordering::SeqCst), 2);

        // Re-activating the running page starts nothing new.
        assert!(h.focus.activated(&tab("1")).is_none());
        h.focus.removed(&tab("1"));
        assert_eq!(again.await.unwrap(), RunOutcome::Stale);
        h.gate.notify_waiters();
    }

    #[tokio::test]
    async fn navigation_restarts_from_scratch() {
        let h = harness();
        let first = h.focus.activated(&tab("1")).unwrap();
        h.entered.notified().await;

        h.pages.set("1", "https://docs.rs/tokio", "tokio docs");
        h.focus.navigated(&tab("1"), "https://docs.rs/tokio");
        assert_eq!(first.await.unwrap(), RunOutcome::Stale);
        let fresh = h.focus.orchestrator().snapshot(&tab("1")).unwrap();
        assert!(fresh.intent.is_empty());

        let second = h.focus.load_complete(&tab("1"), None).unwrap();
        h.entered.notified().await;
        assert_eq!(h.pages.captures.load(std::sync::atomic::Ordering::SeqCst), 2);
        h.focus.removed(&tab("1"));
        assert_eq!(second.await.unwrap(), RunOutcome::Stale);
    }

    #[tokio::test]
    async fn restricted_page_is_not_restarted_on_reactivation() {
        let h = harness();
        h.pages.set("3", "chrome://settings", "Settings");
        let first = h.focus.activated(&tab("3")).unwrap();
        assert_eq!(first.await.unwrap(), RunOutcome::NotAnalyzable);
        assert!(h.focus.orchestrator().snapshot(&tab("3")).unwrap().not_analyzable);
        assert!(h.focus.activated(&tab("3")).is_none());

        // Navigating away gives the page a fresh session that runs again.
        h.pages.set("3", "https://serde.rs/", "Serde");
        h.focus.navigated(&tab("3"), "https://serde.rs/");
        assert!(!h.focus.orchestrator().snapshot(&tab("3")).unwrap().not_analyzable);
        let again = h.focus.load_complete(&tab("3"), None).unwrap();
        h.entered.notified().await;
        h.focus.removed(&tab("3"));
        assert_eq!(again.await.unwrap(), RunOutcome::Stale);
    }
}
