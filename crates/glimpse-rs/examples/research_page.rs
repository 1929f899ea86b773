//! Minimal research example: one page, one session, printed as it goes.
//!
//! Points the orchestrator at a local OpenAI-compatible server, researches
//! the given page, and prints status lines and the final summary.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example research_page -- https://tokio.rs/tokio/tutorial
//! ```

use glimpse_rs::prelude::*;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), String> {
    let url = std::env::args()
        .nth(1)
        .ok_or("usage: research_page <url>")?;

    // 1. Configure the backend and the loop.
    let config = ResearchConfig::default()
        .with_base_url(DEFAULT_BASE_URL)
        .with_max_searches(2);

    // 2. Tell the page source where the page is.
    let pages = Arc::new(HttpPageSource::new(&config).map_err(|e| e.to_string())?);
    let id = SessionId::from("example");
    pages.set_location(&id, url.clone());

    // 3. Build the orchestrator with a closure observer.
    let orchestrator = Orchestrator::builder(config)
        .with_shared_page_source(pages)
        .with_observer(FnObserver::new(|event: &ResearchEvent<'_>| match event {
            ResearchEvent::Status { message, .. } => println!("> {message}"),
            ResearchEvent::IntentInferred { intent, .. } => println!("intent: {intent}"),
            ResearchEvent::SearchCompleted { query, scraped, .. } => {
                println!("searched '{query}': {scraped} page(s) read");
            }
            _ => {}
        }))
        .build()
        .map_err(|e| e.to_string())?;

    // 4. Run to completion.
    let outcome = orchestrator.run(&id, Some(url)).await;

    // 5. Print results.
    if let Some(session) = orchestrator.snapshot(&id) {
        println!("\n{}", session.summary);
        println!(
            "\n--- {outcome:?} | {} searches | {} sources ---",
            session.search_count,
            session.references.len()
        );
    }
    Ok(())
}
