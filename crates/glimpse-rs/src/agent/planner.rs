//! The planner: search again, or stop?

use crate::ChatBackend;
use crate::agent::prompt;
use crate::agent::structured::{self, Structured};
use crate::config::ResearchConfig;
use crate::error::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The planner's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanDecision {
    /// Whether another search would add useful information.
    pub should_search: bool,
    /// The next query when `should_search` is true.
    #[serde(default)]
    pub query: Option<String>,
}

impl PlanDecision {
    pub fn search(query: impl Into<String>) -> Self {
        Self {
            should_search: true,
            query: Some(query.into()),
        }
    }

    pub fn stop() -> Self {
        Self {
            should_search: false,
            query: None,
        }
    }

    /// Decision used when the answer is unusable: search for the intent
    /// itself if nothing was searched yet, otherwise stop.
    pub fn fallback(intent: &str, history: &[String]) -> Self {
        if history.is_empty() {
            Self::search(intent)
        } else {
            Self::stop()
        }
    }

    /// The query to run, if this decision asks for a search.
    pub fn next_query(&self) -> Option<&str> {
        if !self.should_search {
            return None;
        }
        self.query.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    fn normalized(self) -> Self {
        match self.next_query() {
            Some(q) => Self::search(q),
            None => Self::stop(),
        }
    }
}

/// Ask the planner whether to search again.
///
/// Cancellation and transport errors propagate; only an unparseable answer
/// takes the fallback.
pub async fn decide(
    backend: &dyn ChatBackend,
    intent: &str,
    summary: &str,
    history: &[String],
    config: &ResearchConfig,
    cancel: &CancellationToken,
) -> Result<PlanDecision> {
    let prompt = prompt::plan_prompt(intent, summary, history, config.language.as_deref());
    let answer = backend.complete(&prompt, cancel).await?;
    let decision = match structured::parse::<PlanDecision>(&answer) {
        Structured::Parsed(decision) => decision.normalized(),
        Structured::Fallback(_) => {
            warn!("Planner answer was not valid JSON; using fallback");
            PlanDecision::fallback(intent, history)
        }
    };
    debug!("Plan: {decision:?}");
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use crate::error::ResearchError;

    async fn run(answer: Result<&str>, history: &[String]) -> Result<PlanDecision> {
        let backend = ScriptedBackend::new([answer]);
        decide(
            &backend,
            "learn tokio",
            "",
            history,
            &ResearchConfig::default(),
            &CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn parses_camel_case_answer() {
        let decision = run(Ok(r#"{"shouldSearch": true, "query": "tokio select"}"#), &[])
            .await
            .unwrap();
        assert_eq!(decision, PlanDecision::search("tokio select"));
    }

    #[tokio::test]
    async fn malformed_answer_with_empty_history_searches_intent() {
        let decision = run(Ok("let me think about it"), &[]).await.unwrap();
        assert_eq!(decision, PlanDecision::search("learn tokio"));
    }

    #[tokio::test]
    async fn malformed_answer_after_searches_stops() {
        let decision = run(Ok("{broken"), &["q1".to_string()]).await.unwrap();
        assert_eq!(decision, PlanDecision::stop());
    }

    #[tokio::test]
    async fn search_without_query_means_stop() {
        let decision = run(Ok(r#"{"shouldSearch": true, "query": "  "}"#), &[])
            .await
            .unwrap();
        assert_eq!(decision, PlanDecision::stop());
        assert_eq!(decision.next_query(), None);
    }

    #[tokio::test]
    async fn cancellation_is_not_a_fallback() {
        let err = run(Err(ResearchError::Cancelled), &[]).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn schema_uses_wire_names() {
        let schema = crate::json_schema_for::<PlanDecision>();
        assert!(schema["properties"]["shouldSearch"].is_object());
    }
}
