//! Shared session table with generation and run-ownership guards.
//!
//! Every mutation a research loop makes goes through [`SessionStore::commit`]
//! with the [`RunTicket`] it was given at start. The commit is applied only
//! while the ticket is still current: same generation, same run id, token not
//! revoked. Anything else is stale and dropped.

use super::{Session, SessionId, SessionStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Proof of ownership handed to a running loop.
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub id: SessionId,
    pub generation: u64,
    pub run_id: u64,
    pub cancel: CancellationToken,
}

impl RunTicket {
    /// Whether the ticket's token has been revoked.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Result of [`SessionStore::claim`].
#[derive(Debug)]
pub enum Claim {
    /// The caller now owns the session.
    Granted(RunTicket),
    /// A live loop already owns it.
    Busy,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    /// Source of generations and run ids.
    counter: u64,
}

impl Inner {
    fn next(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }
}

/// Thread-safe session table. Cheap to clone.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<Inner>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create the session if missing. Returns its generation.
    pub fn ensure(&self, id: &SessionId) -> u64 {
        let mut inner = self.lock();
        if let Some(s) = inner.sessions.get(id) {
            return s.generation;
        }
        let generation = inner.next();
        inner
            .sessions
            .insert(id.clone(), Session::new(id.clone(), generation));
        debug!("Created session {id} (generation {generation})");
        generation
    }

    /// Replace the session with a fresh one under a new generation,
    /// revoking the old token. Creates the session if missing.
    pub fn reset(&self, id: &SessionId) -> u64 {
        let mut inner = self.lock();
        let generation = inner.next();
        if let Some(old) = inner.sessions.get(id) {
            old.cancel.cancel();
        }
        inner
            .sessions
            .insert(id.clone(), Session::new(id.clone(), generation));
        debug!("Reset session {id} (generation {generation})");
        generation
    }

    /// Revoke the token and mark the session paused, keeping what it has
    /// learned. Returns `false` for unknown ids.
    pub fn interrupt(&self, id: &SessionId) -> bool {
        let mut inner = self.lock();
        let Some(session) = inner.sessions.get_mut(id) else {
            return false;
        };
        session.cancel.cancel();
        session.streaming_summary = None;
        if session.status.is_working() || session.status == SessionStatus::Idle {
            session.set_status(SessionStatus::Interrupted);
        }
        trace!("Interrupted session {id}");
        true
    }

    /// Bump the generation and drop the session.
    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        let mut inner = self.lock();
        let generation = inner.next();
        let mut removed = inner.sessions.remove(id)?;
        removed.cancel.cancel();
        removed.generation = generation;
        debug!("Destroyed session {id}");
        Some(removed)
    }

    /// Take ownership of the session for a new loop, creating it if needed.
    ///
    /// A revoked token is replaced so the new loop starts live; the old loop,
    /// if still unwinding, keeps its revoked token and a stale run id.
    pub fn claim(&self, id: &SessionId) -> Claim {
        let mut inner = self.lock();
        if !inner.sessions.contains_key(id) {
            let generation = inner.next();
            inner
                .sessions
                .insert(id.clone(), Session::new(id.clone(), generation));
        }
        let run_id = inner.next();
        let Some(session) = inner.sessions.get_mut(id) else {
            return Claim::Busy;
        };
        if session.is_running() {
            return Claim::Busy;
        }
        if session.cancel.is_cancelled() {
            session.cancel = CancellationToken::new();
        }
        session.active_run = Some(run_id);
        session.error = None;
        Claim::Granted(RunTicket {
            id: id.clone(),
            generation: session.generation,
            run_id,
            cancel: session.cancel.clone(),
        })
    }

    /// Apply `f` only if `ticket` still owns the session. Returns `None` when
    /// the ticket is stale.
    pub fn commit<R>(&self, ticket: &RunTicket, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut inner = self.lock();
        let session = inner.sessions.get_mut(&ticket.id)?;
        if !owns(session, ticket) {
            trace!(
                "Dropping stale commit for {} (run {})",
                ticket.id, ticket.run_id
            );
            return None;
        }
        let out = f(session);
        session.updated_at = chrono::Utc::now();
        Some(out)
    }

    /// Whether `ticket` still owns its session.
    pub fn is_current(&self, ticket: &RunTicket) -> bool {
        let inner = self.lock();
        inner
            .sessions
            .get(&ticket.id)
            .is_some_and(|s| owns(s, ticket))
    }

    /// Release ownership. A no-op when another run has taken over.
    pub fn release(&self, ticket: &RunTicket) {
        let mut inner = self.lock();
        if let Some(session) = inner.sessions.get_mut(&ticket.id)
            && session.active_run == Some(ticket.run_id)
        {
            session.active_run = None;
        }
    }

    pub fn snapshot(&self, id: &SessionId) -> Option<Session> {
        self.lock().sessions.get(id).cloned()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.lock().sessions.contains_key(id)
    }

    /// All session ids, sorted.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.lock().sessions.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn owns(session: &Session, ticket: &RunTicket) -> bool {
    session.generation == ticket.generation
        && session.active_run == Some(ticket.run_id)
        && !ticket.cancel.is_cancelled()
}
