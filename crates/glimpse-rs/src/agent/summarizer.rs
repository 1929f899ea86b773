//! Running-summary merges.
//!
//! Each merge is a full rewrite by the model: the current summary plus the
//! new search text go in, one standalone summary comes out. New information
//! wins on conflict, still-valid information is kept.

use crate::agent::prompt;
use crate::config::ResearchConfig;
use crate::error::Result;
use crate::{ChatBackend, PartialSink};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Merge `new_text` into `current`, streaming the accumulated rewrite to
/// `on_partial`.
///
/// An empty answer keeps `current`.
pub async fn merge(
    backend: &dyn ChatBackend,
    current: &str,
    new_text: &str,
    intent: &str,
    config: &ResearchConfig,
    cancel: &CancellationToken,
    on_partial: PartialSink<'_>,
) -> Result<String> {
    let prompt = prompt::merge_prompt(current, new_text, intent, config.language.as_deref());
    debug!(
        "Merging {} chars of search text into {} chars of summary",
        new_text.len(),
        current.len()
    );
    let merged = backend.complete_streaming(&prompt, cancel, on_partial).await?;
    let merged = merged.trim();
    if merged.is_empty() {
        warn!("Summarizer returned nothing; keeping the current summary");
        return Ok(current.to_string());
    }
    Ok(merged.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use std::sync::Mutex;

    #[tokio::test]
    async fn streams_partials_and_returns_rewrite() {
        let backend = ScriptedBackend::new([Ok("- tokio is a runtime")]);
        let partials = Mutex::new(Vec::new());
        let sink = |text: &str| partials.lock().unwrap().push(text.to_string());
        let merged = merge(
            &backend,
            "",
            "--- Query: tokio ---",
            "learn tokio",
            &ResearchConfig::default(),
            &CancellationToken::new(),
            &sink,
        )
        .await
        .unwrap();
        assert_eq!(merged, "- tokio is a runtime");
        let partials = partials.into_inner().unwrap();
        assert_eq!(partials.first().map(String::as_str), Some("- "));
        assert_eq!(partials.last().map(String::as_str), Some("- tokio is a runtime"));

        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].user.contains("learn tokio"));
        assert!(prompts[0].user.contains("--- Query: tokio ---"));
    }

    #[tokio::test]
    async fn empty_answer_keeps_current() {
        let backend = ScriptedBackend::new([Ok("   ")]);
        let merged = merge(
            &backend,
            "existing facts",
            "new",
            "intent",
            &ResearchConfig::default(),
            &CancellationToken::new(),
            &|_| {},
        )
        .await
        .unwrap();
        assert_eq!(merged, "existing facts");
    }

    #[tokio::test]
    async fn cancelled_merge_errors() {
        let backend = ScriptedBackend::new([Ok("never seen")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = merge(
            &backend,
            "a",
            "b",
            "c",
            &ResearchConfig::default(),
            &cancel,
            &|_| {},
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}
