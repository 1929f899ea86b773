//! Prompt assembly for intent inference, planning, and summary merges.
//!
//! [`PromptBuilder`] joins a preamble and named sections with blank lines;
//! the `*_prompt` functions use it to build the three [`Prompt`]s the
//! research loop sends.

use crate::Prompt;
use crate::agent::intent::IntentGuess;
use crate::agent::planner::PlanDecision;
use crate::content::{PageContent, html};
use crate::json_schema_for;

/// Shown to the planner and summarizer when nothing has been summarized yet.
pub const NO_SUMMARY_YET: &str = "(nothing yet)";

/// Builder for multi-section prompts.
///
/// ```
/// use glimpse_rs::agent::prompt::PromptBuilder;
///
/// let prompt = PromptBuilder::new("You are a researcher.")
///     .section("Intent", "learn tokio")
///     .section_opt("Language", None::<String>)
///     .build();
/// assert_eq!(prompt, "You are a researcher.\n\n## Intent\n\nlearn tokio");
/// ```
pub struct PromptBuilder {
    sections: Vec<String>,
}

impl PromptBuilder {
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            sections: vec![preamble.into()],
        }
    }

    /// Append a `## heading` section. Skipped if `content` is empty.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.sections.push(format!("## {heading}\n\n{content}"));
        }
        self
    }

    pub fn section_opt(self, heading: &str, content: Option<impl Into<String>>) -> Self {
        match content {
            Some(c) => self.section(heading, c),
            None => self,
        }
    }

    /// Append raw text without a heading. Skipped if empty.
    pub fn raw(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.sections.push(content);
        }
        self
    }

    pub fn raw_opt(self, content: Option<impl Into<String>>) -> Self {
        match content {
            Some(c) => self.raw(c),
            None => self,
        }
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

fn language_rule(language: Option<&str>) -> Option<String> {
    language
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| format!("Write every natural-language value in {l}."))
}

fn json_contract<T: schemars::JsonSchema>() -> String {
    let schema = serde_json::to_string_pretty(&json_schema_for::<T>()).unwrap_or_default();
    format!("Respond with a single JSON object matching this schema and nothing else:\n{schema}")
}

// ── Intent ─────────────────────────────────────────────────────────

const INTENT_PREAMBLE: &str = "\
You help a person while they browse. They are currently reading the page described below.
Guess what they will want to know next: the question this page raises for them, or the
information they are most likely looking for. Then propose the first web search query that
would help answer it.

Rules:
- The intent is one short sentence describing what the reader wants to learn.
- The query is what you would type into a search engine, not a sentence.";

/// Prompt asking the model to infer the reader's intent from a page.
pub fn intent_prompt(page: &PageContent, max_content_chars: usize, language: Option<&str>) -> Prompt {
    let system = PromptBuilder::new(INTENT_PREAMBLE)
        .raw_opt(language_rule(language))
        .raw(json_contract::<IntentGuess>())
        .build();
    let user = PromptBuilder::new("--- Page ---")
        .raw(format!(
            "Title: {}\nURL: {}\nDescription: {}",
            page.title, page.location, page.description
        ))
        .raw(format!(
            "--- Page content (excerpt) ---\n{}",
            html::truncate_chars(&page.content, max_content_chars)
        ))
        .build();
    Prompt::json(system, user)
}

// ── Planner ────────────────────────────────────────────────────────

const PLAN_PREAMBLE: &str = "\
You are an autonomous researcher working for a reader. Your goal is to keep giving them the
deepest, most well-rounded information you can about what they want to know.

Do not stop after one search. Look for new angles, missing details, and follow-up questions
that another search could answer. Even if the findings look sufficient, check whether
anything could be explored further. Only when no further search would help, set
shouldSearch to false.

Never repeat a query that was already run.";

/// Prompt asking the planner for the next step.
pub fn plan_prompt(intent: &str, summary: &str, history: &[String], language: Option<&str>) -> Prompt {
    let summary = if summary.trim().is_empty() {
        NO_SUMMARY_YET
    } else {
        summary
    };
    let history = serde_json::to_string(history).unwrap_or_else(|_| "[]".into());
    let system = PromptBuilder::new(PLAN_PREAMBLE)
        .raw_opt(language_rule(language))
        .raw(json_contract::<PlanDecision>())
        .build();
    let user = PromptBuilder::new(format!("Reader's intent: \"{intent}\""))
        .section("Findings so far", summary)
        .section("Queries already run", history)
        .build();
    Prompt::json(system, user)
}

// ── Summary merge ──────────────────────────────────────────────────

const MERGE_PREAMBLE: &str = "\
You are an expert researcher maintaining a single, always-current answer for a reader.
Merge the new search results into the current summary and return the complete rewritten
summary.

Rules:
- Incorporate every relevant new fact.
- When new information conflicts with the current summary, the new information wins.
- Never drop information from the current summary that is still valid.
- Organize the result for easy reading: short headings and bullet points.
- Output only the summary itself. No greetings, no commentary about the process, no
  mention of searches or sources you could not read.";

/// Prompt asking the model to merge new search text into the running summary.
pub fn merge_prompt(current: &str, new_text: &str, intent: &str, language: Option<&str>) -> Prompt {
    let current = if current.trim().is_empty() {
        NO_SUMMARY_YET
    } else {
        current
    };
    let system = PromptBuilder::new(MERGE_PREAMBLE)
        .raw_opt(language_rule(language))
        .build();
    let user = PromptBuilder::new(format!("Reader's intent: {intent}"))
        .section("Current summary", current)
        .section("New search results", new_text)
        .build();
    Prompt::text(system, user)
}
