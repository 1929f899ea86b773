//! Research what a page's reader wants to know, from the command line.
//!
//! Talks to any OpenAI-compatible endpoint (LM Studio by default). The API
//! key is read from `GLIMPSE_API_KEY` when set.
//!
//! # Examples
//!
//! ```sh
//! # One-shot: research a page and print the summary with its sources
//! glimpse research https://tokio.rs/tokio/tutorial
//!
//! # Stream the summary while it is written, then print the session as JSON
//! glimpse research https://serde.rs/ --stream --json
//!
//! # Drive sessions from page events (one JSON object per line on stdin)
//! printf '%s\n' \
//!   '{"event":"navigated","page":"1","url":"https://tokio.rs/"}' \
//!   '{"event":"activated","page":"1"}' \
//!   '{"event":"load_complete","page":"1"}' | glimpse watch
//! ```

use clap::{Args, Parser, Subcommand};
use glimpse_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Infer what a page's reader wants to know, then search and summarize.
#[derive(Parser)]
#[command(name = "glimpse", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    options: Options,
}

#[derive(Subcommand)]
enum Command {
    /// Research one page to completion and print the result
    Research {
        /// Page to research
        url: String,

        /// Print the final session as JSON
        #[arg(long)]
        json: bool,

        /// Stream the summary to stderr while it is written
        #[arg(long)]
        stream: bool,
    },
    /// Read page events as JSON lines from stdin and print session updates
    Watch,
}

#[derive(Args)]
struct Options {
    // ── Model endpoint ─────────────────────────────────────────
    /// OpenAI-compatible base URL
    #[arg(long, global = true, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Model identifier
    #[arg(long, global = true, default_value = DEFAULT_MODEL)]
    model: String,

    /// Send `response_format: json_object` for JSON prompts
    #[arg(long, global = true)]
    json_response_format: bool,

    /// Disable streaming responses
    #[arg(long, global = true)]
    no_stream: bool,

    /// Language for intents and summaries (e.g. "Japanese")
    #[arg(long, global = true)]
    language: Option<String>,

    // ── Research limits ────────────────────────────────────────
    /// Searches per page before the loop stops
    #[arg(long, global = true, default_value_t = 3)]
    max_searches: u32,

    /// Result links scraped per search
    #[arg(long, global = true, default_value_t = 3)]
    max_results: usize,

    /// Bytes of text kept per scraped page
    #[arg(long, global = true, default_value_t = 8192)]
    max_page_bytes: usize,

    /// Pages scraped in parallel
    #[arg(long, global = true, default_value_t = 3)]
    concurrency: usize,

    /// Search URL template; `{query}` is replaced by the encoded query
    #[arg(long, global = true)]
    search_url: Option<String>,

    /// Pace searches (minimum interval, per-minute cap with cooldown)
    #[arg(long, global = true)]
    rate_limit: bool,

    // ── Output ─────────────────────────────────────────────────
    /// Log progress to stderr (repeat for more detail)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Options {
    fn config(&self) -> ResearchConfig {
        let mut config = ResearchConfig::default()
            .with_base_url(&self.base_url)
            .with_model(&self.model)
            .with_streaming(!self.no_stream)
            .with_max_searches(self.max_searches)
            .with_max_results(self.max_results)
            .with_max_page_bytes(self.max_page_bytes)
            .with_scrape_concurrency(self.concurrency);
        config.json_response_format = self.json_response_format;
        if let Ok(key) = std::env::var("GLIMPSE_API_KEY") {
            config = config.with_api_key(key);
        }
        if let Some(language) = &self.language {
            config = config.with_language(language);
        }
        if let Some(template) = &self.search_url {
            config = config.with_search_url(template);
        }
        if self.rate_limit {
            config = config.with_rate_limit(RateLimitConfig::default());
        }
        config
    }

    fn level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

// ── Streaming output ───────────────────────────────────────────────

/// Prints summary partials to stderr, writing only what is new.
#[derive(Default)]
struct PartialPrinter {
    printed: Mutex<String>,
}

impl ResearchObserver for PartialPrinter {
    fn on_event(&self, event: &ResearchEvent<'_>) {
        let mut printed = self.printed.lock().unwrap_or_else(|e| e.into_inner());
        let mut stderr = std::io::stderr().lock();
        match event {
            ResearchEvent::SummaryPartial { text, .. } => {
                if let Some(rest) = text.strip_prefix(printed.as_str()) {
                    let _ = write!(stderr, "{rest}");
                } else {
                    let _ = write!(stderr, "\n{text}");
                }
                let _ = stderr.flush();
                *printed = text.to_string();
            }
            ResearchEvent::SummaryUpdated { .. } => {
                let _ = writeln!(stderr);
                printed.clear();
            }
            ResearchEvent::SearchStarted { query, number, max, .. } => {
                let _ = writeln!(stderr, "\n[search {number}/{max}] {query}");
            }
            _ => {}
        }
    }
}

// ── research ───────────────────────────────────────────────────────

async fn research(options: &Options, url: &str, json: bool, stream: bool) -> Result<(), String> {
    let config = options.config();
    let pages = Arc::new(HttpPageSource::new(&config).map_err(|e| e.to_string())?);
    let id = SessionId::from("cli");
    pages.set_location(&id, url);

    let orchestrator = Orchestrator::builder(config)
        .with_shared_page_source(pages.clone())
        .with_observer(LoggingObserver)
        .with_observer(
            CompositeObserver::new().with_if(stream, PartialPrinter::default()),
        )
        .build()
        .map_err(|e| e.to_string())?;

    let outcome = orchestrator.run(&id, Some(url.to_string())).await;
    let session = orchestrator
        .snapshot(&id)
        .ok_or_else(|| "session disappeared".to_string())?;

    if json {
        let out = serde_json::to_string_pretty(&session)
            .map_err(|e| format!("failed to serialize session: {e}"))?;
        println!("{out}");
    } else {
        print_session(&session);
    }

    match outcome {
        RunOutcome::Failed(message) => Err(message),
        RunOutcome::NotAnalyzable if !json => Err(session.status_message),
        _ => Ok(()),
    }
}

fn print_session(session: &Session) {
    if !session.intent.is_empty() {
        println!("Intent: {}\n", session.intent);
    }
    if !session.summary.is_empty() {
        println!("{}\n", session.summary);
    }
    if !session.references.is_empty() {
        println!("Sources:");
        for (n, reference) in session.references.iter().enumerate() {
            println!("  [{}] {} <{}>", n + 1, reference.title, reference.url);
        }
    }
    if !session.search_history.is_empty() {
        println!("\nSearched: {}", session.search_history.join(" | "));
    }
}

// ── watch ──────────────────────────────────────────────────────────

/// One line of `glimpse watch` input.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum PageEvent {
    Navigated {
        page: String,
        url: String,
    },
    LoadComplete {
        page: String,
        #[serde(default)]
        url: Option<String>,
    },
    Activated {
        page: String,
    },
    Removed {
        page: String,
    },
    Snapshot {
        #[serde(default)]
        page: Option<String>,
    },
}

/// One line of `glimpse watch` output.
#[derive(Serialize)]
struct SessionLine<'a> {
    page: &'a SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<&'a Session>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    destroyed: bool,
}

/// Forwards the id of every changed session to the printer task.
struct ChangeNotifier(mpsc::UnboundedSender<SessionId>);

impl ResearchObserver for ChangeNotifier {
    fn on_event(&self, event: &ResearchEvent<'_>) {
        if matches!(event, ResearchEvent::SummaryPartial { .. }) {
            return;
        }
        let _ = self.0.send(event.session_id().clone());
    }
}

fn print_line(orchestrator: &Orchestrator, id: &SessionId) {
    let snapshot = orchestrator.snapshot(id);
    let line = SessionLine {
        page: id,
        session: snapshot.as_ref(),
        destroyed: snapshot.is_none(),
    };
    match serde_json::to_string(&line) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!("Failed to serialize session {id}: {e}"),
    }
}

async fn watch(options: &Options) -> Result<(), String> {
    let config = options.config();
    let pages = Arc::new(HttpPageSource::new(&config).map_err(|e| e.to_string())?);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let orchestrator = Orchestrator::builder(config)
        .with_shared_page_source(pages.clone())
        .with_observer(LoggingObserver)
        .with_observer(ChangeNotifier(tx))
        .build()
        .map_err(|e| e.to_string())?;
    let focus = FocusController::new(orchestrator.clone());

    let printer = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            while let Some(id) = rx.recv().await {
                print_line(&orchestrator, &id);
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| format!("failed to read stdin: {e}"))?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: PageEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring malformed event: {e}");
                continue;
            }
        };
        debug!("Event: {event:?}");
        match event {
            PageEvent::Navigated { page, url } => {
                let id = SessionId::from(page);
                pages.set_location(&id, url.clone());
                focus.navigated(&id, url);
            }
            PageEvent::LoadComplete { page, url } => {
                let id = SessionId::from(page);
                if let Some(url) = &url {
                    pages.set_location(&id, url.clone());
                }
                focus.load_complete(&id, url);
            }
            PageEvent::Activated { page } => {
                focus.activated(&SessionId::from(page));
            }
            PageEvent::Removed { page } => {
                let id = SessionId::from(page);
                focus.removed(&id);
                pages.forget(&id);
            }
            PageEvent::Snapshot { page: Some(page) } => {
                print_line(&orchestrator, &SessionId::from(page));
            }
            PageEvent::Snapshot { page: None } => {
                for id in orchestrator.session_ids() {
                    print_line(&orchestrator, &id);
                }
            }
        }
    }

    // Input closed: let the focused page finish, then stop.
    if let Some(id) = focus.focused() {
        while orchestrator.is_running(&id) {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    }
    drop(focus);
    drop(orchestrator);
    printer.abort();
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(cli.options.level())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    let result = match &cli.command {
        Command::Research { url, json, stream } => {
            research(&cli.options, url, *json, *stream).await
        }
        Command::Watch => watch(&cli.options).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
