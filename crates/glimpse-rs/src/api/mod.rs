//! Model-call plumbing shared by every component.
//!
//! - [`retry`]: the bounded attempt primitive (attempt count, backoff,
//!   per-attempt timeout, cancellation) reused by the content provider, the
//!   content-type probe, and render-context load waits.
//! - [`streaming`]: SSE decoder and the streaming variant of
//!   [`ChatClient`](crate::ChatClient).
//! - [`reasoning`]: stripping of a leading `<think>…</think>` preamble with
//!   configurable sentinels.

pub mod reasoning;
pub mod retry;
pub mod streaming;

// Re-export commonly used items at the module level.
pub use reasoning::ReasoningFilter;
pub use retry::{AttemptError, RetryConfig, Step, attempt};
pub use streaming::{SseDecoder, StreamEvent};
