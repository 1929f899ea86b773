//! Model-facing steps of the research loop.
//!
//! - [`intent`] guesses what the reader of a page wants to know.
//! - [`planner`] decides whether another search is worthwhile.
//! - [`summarizer`] folds new search text into the running summary.
//! - [`prompt`] builds the prompts; [`structured`] parses JSON answers.
//!
//! Each step takes a [`ChatBackend`](crate::ChatBackend), so tests can script
//! the model.

pub mod intent;
pub mod planner;
pub mod prompt;
pub mod structured;
pub mod summarizer;

pub use intent::IntentGuess;
pub use planner::PlanDecision;
pub use structured::Structured;
