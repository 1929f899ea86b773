//! Parsing JSON answers from chat models.
//!
//! Local models wrap JSON in markdown fences, add a sentence before it, or
//! return something else entirely. [`parse`] never fails: the caller gets
//! either the typed value or the raw text back and applies its own fallback.

use serde::de::DeserializeOwned;
use tracing::debug;

/// Result of parsing a model answer as `T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Structured<T> {
    Parsed(T),
    /// The answer could not be parsed; carries the cleaned raw text.
    Fallback(String),
}

impl<T> Structured<T> {
    /// The parsed value, or the result of `fallback` on the raw text.
    pub fn or_else(self, fallback: impl FnOnce(&str) -> T) -> T {
        match self {
            Structured::Parsed(value) => value,
            Structured::Fallback(raw) => fallback(&raw),
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Structured::Parsed(_))
    }
}

/// Parse a model answer as `T`.
///
/// Tries, in order: the whole answer with code fences removed, then the
/// span from the first `{` to the last `}`.
pub fn parse<T: DeserializeOwned>(answer: &str) -> Structured<T> {
    let cleaned = strip_code_fences(answer);
    if let Ok(value) = serde_json::from_str::<T>(&cleaned) {
        return Structured::Parsed(value);
    }
    if let Some(object) = object_span(&cleaned)
        && let Ok(value) = serde_json::from_str::<T>(object)
    {
        return Structured::Parsed(value);
    }
    debug!(
        "Unparseable structured answer ({} chars): {}",
        cleaned.len(),
        cleaned.chars().take(120).collect::<String>()
    );
    Structured::Fallback(cleaned)
}

/// Remove ```` ```json ```` / ```` ``` ```` fences anywhere in the text.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
        .trim()
        .to_string()
}

fn object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
