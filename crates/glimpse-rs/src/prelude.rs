//! Convenience re-exports for common `glimpse-rs` types.
//!
//! Meant to be glob-imported by hosts that drive research sessions:
//!
//! ```ignore
//! use glimpse_rs::prelude::*;
//! ```
//!
//! This covers configuration, the [`Orchestrator`] and [`FocusController`],
//! session state, observers, and the seams a host usually replaces (page
//! source, chat backend, web search). Lower-level pieces (SSE decoding,
//! retry policy, result-page parsing) stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::config::{RateLimitConfig, ResearchConfig};
pub use crate::error::{ResearchError, Result};
pub use crate::{
    ChatBackend, ChatClient, DEFAULT_BASE_URL, DEFAULT_MODEL, Prompt, ResponseMode,
    json_schema_for,
};

// ── Page content ────────────────────────────────────────────────────
pub use crate::content::{ContentProvider, HttpPageSource, PageContent, PageSource};

// ── Search ──────────────────────────────────────────────────────────
pub use crate::search::{SearchExecutor, SearchItem, SearchOutcome, WebSearch};

// ── Agents ──────────────────────────────────────────────────────────
pub use crate::agent::{IntentGuess, PlanDecision};

// ── Sessions ────────────────────────────────────────────────────────
pub use crate::session::events::{
    CompositeObserver, FnObserver, LoggingObserver, NoopObserver, ResearchEvent,
    ResearchObserver,
};
pub use crate::session::focus::FocusController;
pub use crate::session::orchestrator::{Orchestrator, OrchestratorBuilder, RunOutcome};
pub use crate::session::{Reference, Session, SessionId, SessionStatus};
