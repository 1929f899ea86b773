//! Stripping of a leading reasoning preamble (`<think>…</think>`) from model
//! output.
//!
//! Local reasoning models emit their chain of thought inline before the
//! answer. The sentinel pair is configurable; matching is ASCII
//! case-insensitive and only a block at the very start of the text (after
//! whitespace) is removed.

/// A leading reasoning block delimited by an open/close sentinel pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningFilter {
    pub open: String,
    pub close: String,
}

impl Default for ReasoningFilter {
    fn default() -> Self {
        Self::new("<think>", "</think>")
    }
}

impl ReasoningFilter {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    /// Strip a complete leading reasoning block and trim.
    ///
    /// An unterminated block is left in place: on a finished response it is
    /// more likely content than reasoning.
    pub fn strip(&self, text: &str) -> String {
        match self.split(text) {
            Preamble::None(body) | Preamble::Closed(body) => body.trim().to_string(),
            Preamble::Open => text.trim().to_string(),
        }
    }

    /// Strip for a response that is still streaming.
    ///
    /// While the reasoning block is open nothing is visible yet, so the
    /// partial answer is empty.
    pub fn strip_partial(&self, text: &str) -> String {
        match self.split(text) {
            Preamble::None(body) | Preamble::Closed(body) => body.trim().to_string(),
            Preamble::Open => String::new(),
        }
    }

    fn split<'t>(&self, text: &'t str) -> Preamble<'t> {
        let trimmed = text.trim_start();
        if self.open.is_empty() || !starts_with_ignore_case(trimmed, &self.open) {
            return Preamble::None(text);
        }
        let Some(after_open) = trimmed.get(self.open.len()..) else {
            return Preamble::None(text);
        };
        match find_ignore_case(after_open, &self.close)
            .and_then(|pos| after_open.get(pos + self.close.len()..))
        {
            Some(body) => Preamble::Closed(body),
            None => Preamble::Open,
        }
    }
}

enum Preamble<'t> {
    None(&'t str),
    Closed(&'t str),
    Open,
}

fn starts_with_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.len() >= needle.len()
        && haystack.as_bytes()[..needle.len()].eq_ignore_ascii_case(needle.as_bytes())
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    let hay = haystack.as_bytes();
    let pat = needle.as_bytes();
    (0..=hay.len().saturating_sub(pat.len()))
        .filter(|&i| haystack.is_char_boundary(i))
        .find(|&i| hay.len() >= i + pat.len() && hay[i..i + pat.len()].eq_ignore_ascii_case(pat))
}
