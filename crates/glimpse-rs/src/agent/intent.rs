//! Intent inference: what does the reader of this page want to know?

use crate::ChatBackend;
use crate::agent::prompt;
use crate::agent::structured::{self, Structured};
use crate::config::ResearchConfig;
use crate::content::PageContent;
use crate::error::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The model's guess at the reader's goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IntentGuess {
    /// What the reader wants to learn, in one sentence.
    pub intent: String,
    /// First search query to run, if the model proposed one.
    #[serde(default)]
    pub query: Option<String>,
}

impl IntentGuess {
    /// Guess used when the model's answer is unusable: the page title (or
    /// its location) with no query.
    pub fn fallback(page: &PageContent) -> Self {
        let intent = [page.title.trim(), page.location.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or("this page")
            .to_string();
        Self {
            intent,
            query: None,
        }
    }

    fn normalized(mut self, page: &PageContent) -> Self {
        self.intent = self.intent.trim().to_string();
        if self.intent.is_empty() {
            self.intent = Self::fallback(page).intent;
        }
        self.query = self
            .query
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());
        self
    }
}

/// Infer the reader's intent from a captured page.
///
/// Model errors (including cancellation) propagate; only an unparseable
/// answer falls back.
pub async fn infer(
    backend: &dyn ChatBackend,
    page: &PageContent,
    config: &ResearchConfig,
    cancel: &CancellationToken,
) -> Result<IntentGuess> {
    let prompt = prompt::intent_prompt(page, config.max_context_chars, config.language.as_deref());
    let answer = backend.complete(&prompt, cancel).await?;
    let guess = match structured::parse::<IntentGuess>(&answer) {
        Structured::Parsed(guess) => guess.normalized(page),
        Structured::Fallback(_) => {
            warn!("Intent answer was not valid JSON; falling back to page title");
            IntentGuess::fallback(page)
        }
    };
    debug!("Inferred intent: {} (query: {:?})", guess.intent, guess.query);
    Ok(guess)
}
